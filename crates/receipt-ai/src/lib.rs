//! Receipt extraction: image normalization, the extraction service client,
//! and the batch queue that drives both against a workspace.

pub mod client;
mod error;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod normalize;
pub mod queue;

pub use client::{ExtractionClient, RawFields, classify_failure, parse_fields};
pub use error::{ErrorClass, ExtractionError, NormalizeError, QueueError};
#[cfg(feature = "gemini")]
pub use gemini::GeminiClient;
pub use normalize::{ImageNormalizer, NormalizedImage, ResizingNormalizer};
pub use queue::{BatchSummary, ExtractionQueue};
