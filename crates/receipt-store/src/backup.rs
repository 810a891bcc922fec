//! Backup copies and their retention.
//!
//! Two policies, applied to two directories inside the workspace folder:
//!
//! - `.backupjson`: `workspace_<timestamp>.json`, the newest N generations
//!   are kept.
//! - `.backupimage`: `<timestamp>_<original name>`, only the newest copy per
//!   original file name is kept.
//!
//! Timestamps contain no `_`, so the original name of an image backup is
//! everything after the first underscore.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use tracing::{debug, info};

pub const DOCUMENT_BACKUP_DIR: &str = ".backupjson";
pub const IMAGE_BACKUP_DIR: &str = ".backupimage";

const DOCUMENT_BACKUP_PREFIX: &str = "workspace_";
const DOCUMENT_BACKUP_SUFFIX: &str = ".json";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S%3f";

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Copy the workspace document into `<folder>/.backupjson` and prune old
/// generations down to `keep`.
pub fn backup_document(folder: &Path, document: &Path, keep: usize) -> io::Result<PathBuf> {
    let dir = folder.join(DOCUMENT_BACKUP_DIR);
    std::fs::create_dir_all(&dir)?;

    let target = dir.join(format!(
        "{DOCUMENT_BACKUP_PREFIX}{}{DOCUMENT_BACKUP_SUFFIX}",
        timestamp()
    ));
    std::fs::copy(document, &target)?;
    info!(backup = %target.display(), "workspace backup created");

    rotate_generations(&dir, keep)?;
    Ok(target)
}

/// Copy an image into `.backupimage` next to it, then drop older copies of
/// the same original.
pub fn backup_image(image: &Path) -> io::Result<PathBuf> {
    let name = image
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "image path has no file name"))?
        .to_string_lossy()
        .into_owned();
    let dir = image
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(IMAGE_BACKUP_DIR);
    std::fs::create_dir_all(&dir)?;

    let target = dir.join(format!("{}_{name}", timestamp()));
    std::fs::copy(image, &target)?;
    info!(backup = %target.display(), "image backup created");

    rotate_latest_per_original(&dir)?;
    Ok(target)
}

/// Keep the `keep` newest `workspace_*.json` files in `dir`. Returns the
/// removed paths.
pub fn rotate_generations(dir: &Path, keep: usize) -> io::Result<Vec<PathBuf>> {
    let backups = list_files(dir, |name| {
        name.starts_with(DOCUMENT_BACKUP_PREFIX) && name.ends_with(DOCUMENT_BACKUP_SUFFIX)
    })?;

    let mut removed = Vec::new();
    for path in newest_first(backups).into_iter().skip(keep) {
        std::fs::remove_file(&path)?;
        debug!(path = %path.display(), "removed old workspace backup");
        removed.push(path);
    }
    Ok(removed)
}

/// Keep only the newest backup per original file name in `dir`. Returns the
/// removed paths.
pub fn rotate_latest_per_original(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let backups = list_files(dir, |name| original_name(name).is_some())?;

    let mut groups: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for path in backups {
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(original_name)
            .unwrap_or_default()
            .to_string();
        groups.entry(key).or_default().push(path);
    }

    let mut removed = Vec::new();
    for group in groups.into_values() {
        for path in newest_first(group).into_iter().skip(1) {
            std::fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed old image backup");
            removed.push(path);
        }
    }
    Ok(removed)
}

/// The original file name encoded in an image backup name.
pub fn original_name(backup_name: &str) -> Option<&str> {
    backup_name
        .split_once('_')
        .map(|(_, original)| original)
        .filter(|original| !original.is_empty())
}

fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if keep(&entry.file_name().to_string_lossy()) {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// Sort by modification time, newest first. Equal times fall back to the
/// file name, whose timestamp prefix sorts chronologically.
fn newest_first(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut keyed: Vec<(SystemTime, PathBuf)> = paths
        .into_iter()
        .map(|p| {
            let mtime = std::fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (mtime, p)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    keyed.into_iter().map(|(_, p)| p).collect()
}
