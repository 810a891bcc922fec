use std::fmt;

use receipt_core::StatusError;
use thiserror::Error;

/// Failure class recorded on an image and used to decide whether a batch
/// can continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    AuthInvalid,
    AuthMissing,
    QuotaExceeded,
    Processing,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "AUTH_INVALID",
            Self::AuthMissing => "AUTH_MISSING",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Processing => "PROCESSING_ERROR",
        }
    }

    /// Fatal classes invalidate every remaining item of the batch.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("AUTH_INVALID: {0}")]
    AuthInvalid(String),

    #[error("AUTH_MISSING: {0}")]
    AuthMissing(String),

    #[error("QUOTA_EXCEEDED: {0}")]
    QuotaExceeded(String),

    #[error("PROCESSING_ERROR: {0}")]
    Processing(String),
}

impl ExtractionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthInvalid(_) => ErrorClass::AuthInvalid,
            Self::AuthMissing(_) => ErrorClass::AuthMissing,
            Self::QuotaExceeded(_) => ErrorClass::QuotaExceeded,
            Self::Processing(_) => ErrorClass::Processing,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::AuthInvalid(m)
            | Self::AuthMissing(m)
            | Self::QuotaExceeded(m)
            | Self::Processing(m) => m,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class().is_fatal()
    }

    /// The class/message pair stored on the image record.
    pub fn to_status_error(&self) -> StatusError {
        StatusError::new(self.class().as_str(), self.message())
    }
}

impl From<NormalizeError> for ExtractionError {
    fn from(e: NormalizeError) -> Self {
        Self::Processing(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to read image {path}: {source}")]
    Decode {
        path: std::path::PathBuf,
        source: image::ImageError,
    },

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Why a batch did not run to a normal end.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("a batch is already running")]
    AlreadyRunning,

    #[error("the queue is empty")]
    EmptyQueue,

    #[error("extraction client is not initialized")]
    ClientNotInitialized,

    #[error("batch aborted: {0}")]
    Fatal(ExtractionError),
}

impl QueueError {
    /// True for the fail-fast cases where no item was touched.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}
