//! Storage layer: the per-folder `workspace.json` record store, its backups,
//! rename execution, and exports.

pub mod backup;
mod error;
mod export;
mod rename;
mod workspace;

pub use error::StoreError;
pub use export::render_csv;
pub use rename::{RenameOutcome, RenameSkip, candidate_file_name, resolve_conflict};
pub use workspace::{
    DOCUMENT_FILE, IMAGE_EXTENSIONS, SaveOutcome, SkipReason, UpdateOutcome, WorkspaceStore,
};
