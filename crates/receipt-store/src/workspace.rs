//! Workspace store: one `workspace.json` per opened folder.
//!
//! Every mutation rewrites the whole document, preceded by a backup copy of
//! the previous file. Persistence is best-effort: a failed save is reported
//! as [`SaveOutcome::Degraded`] and the in-memory document is kept as is.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use receipt_core::{
    BackupSettings, EditEntry, ExtractedData, FileInfo, ImageRecord, Status, StatusError,
    WorkspaceDocument, now_iso, validate,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::StoreError;
use crate::backup;

pub const DOCUMENT_FILE: &str = "workspace.json";

/// Extensions picked up by the folder scan, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Result of persisting the document.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum SaveOutcome {
    /// Written to disk. `backup` is the copy of the previous file, if one
    /// was made.
    Saved { backup: Option<PathBuf> },
    /// Not written; the in-memory document may be ahead of the file.
    Degraded { reason: String },
}

impl SaveOutcome {
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Result of a best-effort record update.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum UpdateOutcome {
    Applied(SaveOutcome),
    Skipped(SkipReason),
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoWorkspace,
    UnknownKey(String),
}

pub(crate) struct Session {
    pub(crate) folder: PathBuf,
    pub(crate) document_path: PathBuf,
    pub(crate) document: WorkspaceDocument,
}

/// Record store for one folder at a time.
///
/// Constructed empty; [`open`](Self::open) binds it to a folder.
pub struct WorkspaceStore {
    backup: BackupSettings,
    pub(crate) session: Option<Session>,
    last_save: Option<SaveOutcome>,
}

impl WorkspaceStore {
    pub fn new(backup: BackupSettings) -> Self {
        Self {
            backup,
            session: None,
            last_save: None,
        }
    }

    /// Load (or create) the folder's document and scan it for images.
    ///
    /// A corrupt `workspace.json` is replaced by a fresh document; the
    /// corrupt file survives as the first backup of the next save. Returns
    /// the records of the images found, in directory enumeration order.
    pub fn open(&mut self, folder: &Path) -> Result<Vec<ImageRecord>, StoreError> {
        if !folder.is_dir() {
            return Err(StoreError::FolderNotFound(folder.to_path_buf()));
        }
        let folder = folder
            .canonicalize()
            .map_err(|e| StoreError::io(folder, e))?;
        let document_path = folder.join(DOCUMENT_FILE);

        let (document, mut dirty) = match load_document(&document_path) {
            Some(doc) => (doc, false),
            None => {
                let name = folder
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info!(folder = %folder.display(), "creating new workspace");
                (WorkspaceDocument::new(name), true)
            }
        };

        let mut session = Session {
            folder,
            document_path,
            document,
        };
        let keys = scan_images(&mut session, &mut dirty)?;
        let records: Vec<ImageRecord> = keys
            .iter()
            .filter_map(|k| session.document.images.get(k).cloned())
            .collect();
        info!(count = records.len(), folder = %session.folder.display(), "opened workspace");

        self.session = Some(session);
        self.last_save = None;
        if dirty {
            if let SaveOutcome::Degraded { reason } = self.save() {
                warn!(reason = %reason, "workspace opened but not yet written to disk");
            }
        }
        Ok(records)
    }

    /// Back up the previous file, stamp `last_modified`, and rewrite the
    /// document.
    pub fn save(&mut self) -> SaveOutcome {
        let outcome = self.write_with_backup();
        self.last_save = Some(outcome.clone());
        outcome
    }

    fn write_with_backup(&mut self) -> SaveOutcome {
        let generations = self.backup.effective_generations();
        let Some(session) = self.session.as_mut() else {
            return SaveOutcome::Degraded {
                reason: StoreError::NoWorkspace.to_string(),
            };
        };

        let backup = if session.document_path.exists() {
            match backup::backup_document(&session.folder, &session.document_path, generations) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "workspace backup failed, saving without one");
                    None
                }
            }
        } else {
            None
        };

        let image_dir = session.folder.join(backup::IMAGE_BACKUP_DIR);
        if let Err(e) = backup::rotate_latest_per_original(&image_dir) {
            warn!(error = %e, "image backup rotation failed");
        }

        session.document.workspace.last_modified = now_iso();
        match write_document(&session.document_path, &session.document) {
            Ok(()) => {
                debug!(path = %session.document_path.display(), "workspace saved");
                SaveOutcome::Saved { backup }
            }
            Err(e) => {
                error!(error = %e, "workspace save failed; changes are only in memory");
                SaveOutcome::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Set an image's processing status. An error records its class and
    /// message; no error clears them.
    pub fn update_status(
        &mut self,
        key: &str,
        status: Status,
        error: Option<&StatusError>,
    ) -> UpdateOutcome {
        self.apply(key, |record| {
            let ps = &mut record.processing_status;
            ps.status = status;
            ps.last_processed = Some(now_iso());
            ps.error_type = error.map(|e| e.class.clone());
            ps.error_details = error.map(|e| e.message.clone());
        })
    }

    /// Replace an image's extracted data, revalidate it, and mark it
    /// completed in the same save. Edit history is left untouched.
    pub fn update_extracted_data(&mut self, key: &str, data: ExtractedData) -> UpdateOutcome {
        self.apply(key, |record| {
            record.validation = validate(&data);
            record.extracted_data = data;
            let ps = &mut record.processing_status;
            ps.status = Status::Completed;
            ps.last_processed = Some(now_iso());
            ps.error_type = None;
            ps.error_details = None;
        })
    }

    /// Append a manual edit to an image's history.
    pub fn add_edit_history(
        &mut self,
        key: &str,
        field: &str,
        old_value: Value,
        new_value: Value,
        reason: &str,
    ) -> UpdateOutcome {
        let entry = EditEntry {
            timestamp: now_iso(),
            field: field.to_string(),
            old_value,
            new_value,
            edited_by: "user".to_string(),
            reason: reason.to_string(),
        };
        self.apply(key, |record| record.edit_history.push(entry))
    }

    fn apply(&mut self, key: &str, f: impl FnOnce(&mut ImageRecord)) -> UpdateOutcome {
        let Some(session) = self.session.as_mut() else {
            warn!(key, "no workspace open, update skipped");
            return UpdateOutcome::Skipped(SkipReason::NoWorkspace);
        };
        let Some(resolved) = resolve_key(session, key) else {
            warn!(key, "image not in workspace, update skipped");
            return UpdateOutcome::Skipped(SkipReason::UnknownKey(key.to_string()));
        };
        if let Some(record) = session.document.images.get_mut(&resolved) {
            f(record);
        }
        UpdateOutcome::Applied(self.save())
    }

    // ── Accessors ──

    /// Outcome of the most recent save since the folder was opened.
    /// `None` when nothing has been written yet.
    pub fn last_save(&self) -> Option<&SaveOutcome> {
        self.last_save.as_ref()
    }

    pub fn folder(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.folder.as_path())
    }

    pub fn document(&self) -> Option<&WorkspaceDocument> {
        self.session.as_ref().map(|s| &s.document)
    }

    /// Look up a record by relative key or absolute path.
    pub fn record(&self, key: &str) -> Option<&ImageRecord> {
        let session = self.session.as_ref()?;
        let resolved = resolve_key(session, key)?;
        session.document.images.get(&resolved)
    }

    /// The relative key for a key or absolute path, if tracked.
    pub fn key_of(&self, key: &str) -> Option<String> {
        resolve_key(self.session.as_ref()?, key)
    }

    /// All records in document order.
    pub fn records(&self) -> impl Iterator<Item = (&str, &ImageRecord)> {
        self.session
            .iter()
            .flat_map(|s| s.document.images.iter().map(|(k, r)| (k.as_str(), r)))
    }
}

/// Map a relative key or an absolute path to the document key.
///
/// Paths outside the folder fall back to their file name.
pub(crate) fn resolve_key(session: &Session, key: &str) -> Option<String> {
    if session.document.images.contains_key(key) {
        return Some(key.to_string());
    }
    let path = Path::new(key);
    let relative = match path.strip_prefix(&session.folder) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.file_name()?.to_string_lossy().into_owned(),
    };
    session
        .document
        .images
        .contains_key(&relative)
        .then_some(relative)
}

pub(crate) fn relative_key(folder: &Path, path: &Path) -> String {
    path.strip_prefix(folder)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn load_document(path: &Path) -> Option<WorkspaceDocument> {
    if !path.exists() {
        return None;
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(doc) => {
            info!(path = %path.display(), "loaded existing workspace");
            Some(doc)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "workspace unreadable, starting fresh");
            None
        }
    }
}

/// Write through a sibling temp file so a crash never leaves a truncated
/// document behind.
pub(crate) fn write_document(path: &Path, document: &WorkspaceDocument) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(document)?;
    write_atomically(path, json.as_bytes())
}

pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Create or refresh a record for every image directly inside the folder.
/// Returns the keys found, in enumeration order.
fn scan_images(session: &mut Session, dirty: &mut bool) -> Result<Vec<String>, StoreError> {
    let entries =
        std::fs::read_dir(&session.folder).map_err(|e| StoreError::io(&session.folder, e))?;

    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(&session.folder, e))?;
        let path = entry.path();
        if !is_image(&path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        let key = relative_key(&session.folder, &path);
        match session.document.images.get_mut(&key) {
            Some(record) => {
                if record.file_info.size != metadata.len() || record.file_info.path != path {
                    record.file_info.size = metadata.len();
                    record.file_info.path = path.clone();
                    *dirty = true;
                }
            }
            None => {
                let created_at = metadata
                    .created()
                    .or_else(|_| metadata.modified())
                    .ok()
                    .map(iso_from_system_time);
                let record = ImageRecord::new(FileInfo {
                    path: path.clone(),
                    size: metadata.len(),
                    created_at,
                    hash: None,
                });
                debug!(key = %key, "new image record");
                session.document.images.insert(key.clone(), record);
                *dirty = true;
            }
        }
        keys.push(key);
    }
    Ok(keys)
}

pub(crate) fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn iso_from_system_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}
