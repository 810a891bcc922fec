//! HTTP client for the Gemini `generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use receipt_core::{ApiSettings, CanonicalField};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::client::{ExtractionClient, RawFields, classify_failure, parse_fields};
use crate::error::ExtractionError;
use crate::normalize::NormalizedImage;

/// Extraction client backed by a Gemini model.
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    InlineData(InlineData),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    /// Build a client from the `api` settings.
    ///
    /// Returns `Ok(None)` when no API key is configured; callers treat that
    /// as an uninitialized client.
    pub fn from_settings(api: &ApiSettings) -> Result<Option<Self>, ExtractionError> {
        let Some(api_key) = api.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
            warn!("no API key configured, extraction client not initialized");
            return Ok(None);
        };
        let timeout = Duration::from_secs(api.timeout.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Processing(format!("failed to build HTTP client: {e}")))?;

        info!(model = %api.model_name, "extraction client initialized");
        Ok(Some(Self {
            client,
            endpoint: api.endpoint.trim_end_matches('/').to_string(),
            model: api.model_name.clone(),
            api_key: api_key.to_string(),
            timeout,
        }))
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }

    fn transport_error(&self, e: reqwest::Error) -> ExtractionError {
        if e.is_timeout() {
            ExtractionError::Processing(format!(
                "request timed out after {}s",
                self.timeout.as_secs()
            ))
        } else {
            ExtractionError::Processing(format!("request failed: {e}"))
        }
    }

    fn request(&self, image: &NormalizedImage) -> GenerateRequest {
        GenerateRequest {
            system_instruction: Content {
                parts: vec![Part::Text(instruction())],
            },
            contents: vec![Content {
                parts: vec![Part::InlineData(InlineData {
                    mime_type: image.mime_type.clone(),
                    data: STANDARD.encode(&image.bytes),
                })],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        }
    }
}

#[async_trait]
impl ExtractionClient for GeminiClient {
    async fn extract(&self, image: &NormalizedImage) -> Result<RawFields, ExtractionError> {
        let url = self.url();
        debug!(url = %url, bytes = image.bytes.len(), "sending extraction request");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request(image))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(classify_failure(Some(status.as_u16()), &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            ExtractionError::Processing(format!("unexpected response shape: {e}"))
        })?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();
        parse_fields(&text)
    }
}

fn instruction() -> String {
    let fields: Vec<String> = CanonicalField::ALL
        .iter()
        .map(|f| format!("- \"{}\"", f.name()))
        .collect();
    format!(
        "Extract the following fields from the receipt image and answer with a single JSON \
         object using exactly these keys:\n{}\n\
         Amounts are integers without currency symbols or separators. Use null for anything \
         not printed on the receipt.",
        fields.join("\n")
    )
}

fn response_schema() -> Value {
    let properties: serde_json::Map<String, Value> = CanonicalField::ALL
        .iter()
        .map(|f| {
            let kind = if f.is_amount() { "INTEGER" } else { "STRING" };
            (f.name().to_string(), json!({ "type": kind, "nullable": true }))
        })
        .collect();
    let required: Vec<&str> = CanonicalField::REQUIRED.iter().map(|f| f.name()).collect();
    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": required,
    })
}
