//! Renaming images after their extracted date and store name.
//!
//! Order of operations: back up the image, rewrite the document under the
//! new key, then rename on disk. The document is committed first, so an
//! interruption before the final step leaves it pointing at a file name the
//! filesystem does not have yet; the failure is reported as
//! [`StoreError::RenameFailed`].

use std::path::{Path, PathBuf};

use receipt_core::{ExtractedData, ImageRecord};
use tracing::{info, warn};

use crate::StoreError;
use crate::backup;
use crate::workspace::{SaveOutcome, WorkspaceStore, relative_key, resolve_key};

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum RenameOutcome {
    Renamed {
        old_key: String,
        new_key: String,
        new_path: PathBuf,
        backup: PathBuf,
        save: SaveOutcome,
    },
    Skipped(RenameSkip),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameSkip {
    /// Date or store name has not been extracted yet.
    MissingFields,
    /// The file already carries the name its fields produce, possibly with
    /// a `_<n>` conflict suffix.
    AlreadyNamed,
}

impl WorkspaceStore {
    /// Rename the image behind `record` to `<date>_<store><ext>`.
    ///
    /// The record is looked up by its path; the stored copy's extracted data
    /// decides the new name.
    pub fn rename(&mut self, record: &ImageRecord) -> Result<RenameOutcome, StoreError> {
        let session = self.session.as_ref().ok_or(StoreError::NoWorkspace)?;
        let lookup = record.file_info.path.to_string_lossy();
        let old_key = resolve_key(session, &lookup)
            .ok_or_else(|| StoreError::UnknownImage(lookup.to_string()))?;
        let folder = session.folder.clone();
        let data = session.document.images[&old_key].extracted_data.clone();

        let old_path = folder.join(&old_key);
        let extension = old_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let Some(file_name) = candidate_file_name(&data, &extension) else {
            info!(key = %old_key, "date or store name missing, rename skipped");
            return Ok(RenameOutcome::Skipped(RenameSkip::MissingFields));
        };
        if old_path
            .file_name()
            .is_some_and(|n| is_named_after(&n.to_string_lossy(), &file_name, &extension))
        {
            return Ok(RenameOutcome::Skipped(RenameSkip::AlreadyNamed));
        }
        let new_path = resolve_conflict(&folder.join(&file_name));

        let backup = backup::backup_image(&old_path).map_err(|source| {
            warn!(path = %old_path.display(), error = %source, "image backup failed, rename aborted");
            StoreError::Backup {
                path: old_path.clone(),
                source,
            }
        })?;

        let new_key = relative_key(&folder, &new_path);
        if let Some(session) = self.session.as_mut() {
            let images = &mut session.document.images;
            if let Some(mut moved) = images.shift_remove(&old_key) {
                moved.file_info.path = new_path.clone();
                images.insert(new_key.clone(), moved);
            }
        }
        let save = self.save();

        std::fs::rename(&old_path, &new_path).map_err(|source| StoreError::RenameFailed {
            from: old_path.clone(),
            to: new_path.clone(),
            source,
        })?;
        info!(from = %old_path.display(), to = %new_path.display(), "image renamed");

        Ok(RenameOutcome::Renamed {
            old_key,
            new_key,
            new_path,
            backup,
            save,
        })
    }
}

/// `<date>_<store><extension>`, or `None` if either field is missing.
///
/// Slashes in the date become hyphens. In both parts, characters that are
/// not alphanumeric and not one of `._- ` become `_`.
pub fn candidate_file_name(data: &ExtractedData, extension: &str) -> Option<String> {
    let date = data.transaction_date.as_deref()?;
    let store = data.store_name.as_deref()?;
    Some(format!(
        "{}_{}{extension}",
        sanitize(&date.replace('/', "-")),
        sanitize(store)
    ))
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || "._- ".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Whether `current` is `candidate` or `candidate` with a `_<n>` suffix
/// before the extension.
fn is_named_after(current: &str, candidate: &str, extension: &str) -> bool {
    if current == candidate {
        return true;
    }
    let (Some(current_stem), Some(candidate_stem)) = (
        current.strip_suffix(extension),
        candidate.strip_suffix(extension),
    ) else {
        return false;
    };
    current_stem
        .strip_prefix(candidate_stem)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// `path` if free, else the first of `<stem>_1<ext>`, `<stem>_2<ext>`, ...
/// that does not exist.
pub fn resolve_conflict(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    (1..)
        .map(|n| parent.join(format!("{stem}_{n}{extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
