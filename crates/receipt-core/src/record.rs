//! The `workspace.json` document and its image records.

use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::{CanonicalField, ExtractedData};
use crate::validation::Validation;

/// Current time as an RFC 3339 string, the format used for every timestamp
/// stored in the document.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Root of persistence for one folder.
///
/// `images` keeps insertion order so CSV rows and the JSON file follow the
/// order in which records were discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceDocument {
    pub workspace: WorkspaceMeta,
    #[serde(default)]
    pub images: IndexMap<String, ImageRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub id: String,
    pub name: String,
    /// ISO 8601 timestamp string.
    pub created_at: String,
    /// ISO 8601 timestamp string.
    pub last_modified: String,
    #[serde(default)]
    pub settings: WorkspaceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// CSV column order.
    pub output_format: Vec<String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            output_format: CanonicalField::ALL
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
        }
    }
}

impl WorkspaceDocument {
    /// A fresh, empty document for the folder called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workspace: WorkspaceMeta {
                id: now.format("%Y%m%d_%H%M%S").to_string(),
                name: name.into(),
                created_at: now.to_rfc3339(),
                last_modified: now.to_rfc3339(),
                settings: WorkspaceSettings::default(),
            },
            images: IndexMap::new(),
        }
    }

    pub fn output_format(&self) -> &[String] {
        &self.workspace.settings.output_format
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub file_info: FileInfo,
    #[serde(default)]
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub extracted_data: ExtractedData,
    #[serde(default)]
    pub validation: Validation,
    #[serde(default)]
    pub edit_history: Vec<EditEntry>,
}

impl ImageRecord {
    /// A newly discovered image: pending, nothing extracted.
    pub fn new(file_info: FileInfo) -> Self {
        Self {
            file_info,
            processing_status: ProcessingStatus::default(),
            extracted_data: ExtractedData::default(),
            validation: Validation::default(),
            edit_history: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.processing_status.status
    }

    pub fn file_name(&self) -> Option<String> {
        self.file_info
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Absolute path of the image on disk.
    pub path: PathBuf,
    pub size: u64,
    /// ISO 8601 timestamp string.
    pub created_at: Option<String>,
    /// Reserved for content hashing; always `None`.
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingStatus {
    pub status: Status,
    /// ISO 8601 timestamp string.
    pub last_processed: Option<String>,
    /// Error class, e.g. `PROCESSING_ERROR`.
    pub error_type: Option<String>,
    pub error_details: Option<String>,
}

/// Error information recorded against an image when its status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub class: String,
    pub message: String,
}

impl StatusError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

/// One manual change to an extracted field. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEntry {
    /// ISO 8601 timestamp string.
    pub timestamp: String,
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub edited_by: String,
    pub reason: String,
}
