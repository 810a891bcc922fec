//! Application settings consumed by the store and the extraction pipeline.
//!
//! Settings live in a JSON file whose shape matches the dotted keys used
//! throughout (`backup.generations`, `processing.image.resize.max_width`, ...).
//! Every field has a default, so partial files are fine and unknown keys are
//! ignored.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("malformed settings file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backup: BackupSettings,
    pub processing: ProcessingSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Number of workspace document backups to keep.
    pub generations: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self { generations: 3 }
    }
}

impl BackupSettings {
    /// Retention never drops below one generation, so the backup taken by
    /// the current save always survives its own rotation.
    pub fn effective_generations(&self) -> usize {
        self.generations.max(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub image: ImageSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub resize: ResizeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeSettings {
    pub enabled: bool,
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_width: 1920,
            max_height: 1080,
            quality: 85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub model_name: String,
    pub key: Option<String>,
    /// Base URL of the generative language API.
    pub endpoint: String,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            model_name: "gemini-2.0-flash".to_string(),
            key: None,
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            timeout: 30,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.backup.generations, 3);
        assert_eq!(settings.processing.image.resize.max_width, 1920);
        assert_eq!(settings.api.model_name, "gemini-2.0-flash");
    }

    #[test]
    fn partial_file_is_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "backup": { "generations": 5, "max_generations": 10 },
                "processing": { "image": { "resize": { "quality": 70 } } },
                "ui": { "theme": "dark" }
            }"#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.backup.generations, 5);
        assert_eq!(settings.processing.image.resize.quality, 70);
        assert!(settings.processing.image.resize.enabled);
        assert_eq!(settings.api.timeout, 30);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn zero_generations_still_keeps_one() {
        let backup = BackupSettings { generations: 0 };
        assert_eq!(backup.effective_generations(), 1);
    }
}
