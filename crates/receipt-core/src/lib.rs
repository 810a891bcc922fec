pub mod fields;
pub mod record;
pub mod settings;
pub mod validation;

pub use fields::{CanonicalField, ExtractedData, FieldError};
pub use record::{
    EditEntry, FileInfo, ImageRecord, ProcessingStatus, Status, StatusError, WorkspaceDocument,
    WorkspaceMeta, WorkspaceSettings, now_iso,
};
pub use settings::{ApiSettings, BackupSettings, ResizeSettings, Settings, SettingsError};
pub use validation::{Validation, validate};
