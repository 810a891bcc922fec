//! The extraction service boundary.
//!
//! A client takes a normalized image and returns the raw field map the
//! service produced. Legacy-name migration happens afterwards, in
//! [`receipt_core::ExtractedData::from_fields`], so clients never need to
//! know about it.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ExtractionError;
use crate::normalize::NormalizedImage;

/// Raw field map as returned by the service.
pub type RawFields = Map<String, Value>;

#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, image: &NormalizedImage) -> Result<RawFields, ExtractionError>;
}

/// Parse the model's text output into a field map.
///
/// Tolerates a surrounding ```` ```json ```` fence.
pub fn parse_fields(text: &str) -> Result<RawFields, ExtractionError> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    let body = body.trim();
    if body.is_empty() {
        return Err(ExtractionError::Processing(
            "empty response from extraction service".to_string(),
        ));
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ExtractionError::Processing(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(ExtractionError::Processing(format!(
            "malformed JSON from extraction service: {e}"
        ))),
    }
}

/// Classify a failed service call from its HTTP status (if any) and body.
pub fn classify_failure(status: Option<u16>, body: &str) -> ExtractionError {
    let lower = body.to_ascii_lowercase();
    let detail = body.trim().to_string();

    if body.contains("API_KEY_INVALID") || matches!(status, Some(401 | 403)) {
        ExtractionError::AuthInvalid(detail)
    } else if lower.contains("api key not found") {
        ExtractionError::AuthMissing(detail)
    } else if status == Some(429) || lower.contains("quota") {
        ExtractionError::QuotaExceeded(detail)
    } else {
        let detail = match status {
            Some(code) => format!("service returned {code}: {detail}"),
            None => detail,
        };
        ExtractionError::Processing(detail)
    }
}
