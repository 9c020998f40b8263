//! Remote OCR client.
//!
//! Sends a single-page PDF to a Gemini-style `generateContent` endpoint and
//! returns the Markdown conversion. Rate limiting (HTTP 429) surfaces as
//! [`OcrError::RateLimited`] with the parsed `Retry-After` delay so the
//! orchestrator can suspend just that page.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;

use crate::config::Config;

const OCR_PROMPT: &str = "Convert this PDF page to Markdown. Preserve headings, lists, tables, \
                          and formatting. Return only the Markdown content.";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors raised by the remote OCR backend.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The backend asked us to slow down (transient).
    #[error("rate limited by OCR backend")]
    RateLimited {
        /// Server-provided delay, when the response carried one.
        retry_after: Option<Duration>,
    },
    /// The HTTP layer failed before a response arrived (transient).
    #[error("OCR transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The backend rejected the page or returned an unusable body (permanent).
    #[error("OCR extraction failed: {0}")]
    Extraction(String),
}

impl OcrError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport(_))
    }

    /// Server-provided retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Interface implemented by remote OCR backends.
#[async_trait]
pub trait RemoteOcr: Send + Sync {
    /// Convert a single-page PDF into normalized Markdown text.
    async fn extract_page(&self, page_pdf: &[u8]) -> Result<String, OcrError>;
}

/// Gemini-style OCR client over the `generateContent` REST API.
pub struct GeminiOcrClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiOcrClient {
    /// Build a client from configuration; `None` when no API key is set.
    pub fn from_config(config: &Config) -> Result<Option<Self>, OcrError> {
        let Some(api_key) = config.ocr_api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .user_agent("docdex/0.3")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let endpoint = config.ocr_api_url.clone().unwrap_or_else(|| {
            format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                config.ocr_model
            )
        });
        tracing::debug!(endpoint = %endpoint, "Initialized remote OCR client");
        Ok(Some(Self {
            client,
            endpoint,
            api_key,
        }))
    }
}

#[derive(Serialize)]
struct OcrRequest {
    contents: Vec<OcrContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct OcrContent {
    parts: Vec<OcrPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OcrPart {
    InlineData { inline_data: InlineData },
    Text { text: String },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct OcrResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[async_trait]
impl RemoteOcr for GeminiOcrClient {
    async fn extract_page(&self, page_pdf: &[u8]) -> Result<String, OcrError> {
        let request = OcrRequest {
            contents: vec![OcrContent {
                parts: vec![
                    OcrPart::InlineData {
                        inline_data: InlineData {
                            mime_type: "application/pdf".to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(page_pdf),
                        },
                    },
                    OcrPart::Text {
                        text: OCR_PROMPT.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.1 },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            return Err(OcrError::RateLimited { retry_after });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Extraction(format!(
                "OCR API error ({status}): {body}"
            )));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|err| OcrError::Extraction(format!("unparseable OCR response: {err}")))?;

        if let Some(error) = parsed.error {
            return Err(OcrError::Extraction(error.message));
        }

        parsed
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or_else(|| OcrError::Extraction("OCR response contained no text".to_string()))
    }
}

/// Parse a `Retry-After` header value: either delta seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse::<u64>().ok().map(Duration::from_secs);
    }
    let retry_at = OffsetDateTime::parse(value, &Rfc2822).ok()?;
    let delta = retry_at - OffsetDateTime::now_utc();
    if delta.is_positive() {
        Some(Duration::from_secs_f64(delta.as_seconds_f64()))
    } else {
        Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EmbeddingProvider};
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn test_config(server: &MockServer) -> Config {
        Config {
            qdrant_url: "http://localhost:6333".into(),
            qdrant_collection_name: "chunks".into(),
            qdrant_api_key: None,
            embedding_provider: EmbeddingProvider::Hash,
            embedding_model: "test".into(),
            embedding_dimension: 8,
            ollama_url: None,
            text_splitter_chunk_size: None,
            text_splitter_chunk_overlap: None,
            data_dir: std::env::temp_dir(),
            max_concurrent_files: 2,
            max_concurrent_ocr: 1,
            ocr_api_url: Some(format!("{}/v1beta/models/test:generateContent", server.base_url())),
            ocr_api_key: Some("test-key".into()),
            ocr_model: "test".into(),
            ocr_max_retries: 2,
        }
    }

    #[test]
    fn retry_after_parses_delta_seconds() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn retry_after_parses_past_http_dates_to_zero() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 +0000"),
            Some(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn successful_response_yields_page_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/test:generateContent");
                then.status(200).json_body(json!({
                    "candidates": [
                        { "content": { "parts": [ { "text": "# Page one" } ] } }
                    ]
                }));
            })
            .await;

        let client = GeminiOcrClient::from_config(&test_config(&server))
            .expect("client")
            .expect("configured");
        let text = client.extract_page(b"%PDF-1.4 fake").await.expect("text");

        mock.assert();
        assert_eq!(text, "# Page one");
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/test:generateContent");
                then.status(429).header("Retry-After", "3");
            })
            .await;

        let client = GeminiOcrClient::from_config(&test_config(&server))
            .expect("client")
            .expect("configured");
        let err = client
            .extract_page(b"%PDF-1.4 fake")
            .await
            .expect_err("rate limit expected");

        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn server_errors_are_permanent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/test:generateContent");
                then.status(400).body("bad page");
            })
            .await;

        let client = GeminiOcrClient::from_config(&test_config(&server))
            .expect("client")
            .expect("configured");
        let err = client
            .extract_page(b"%PDF-1.4 fake")
            .await
            .expect_err("error expected");

        assert!(!err.is_transient());
        assert!(matches!(err, OcrError::Extraction(_)));
    }

    #[test]
    fn missing_api_key_disables_the_client() {
        let server_less = Config {
            ocr_api_key: None,
            ..Config {
                qdrant_url: "http://localhost:6333".into(),
                qdrant_collection_name: "chunks".into(),
                qdrant_api_key: None,
                embedding_provider: EmbeddingProvider::Hash,
                embedding_model: "test".into(),
                embedding_dimension: 8,
                ollama_url: None,
                text_splitter_chunk_size: None,
                text_splitter_chunk_overlap: None,
                data_dir: std::env::temp_dir(),
                max_concurrent_files: 2,
                max_concurrent_ocr: 1,
                ocr_api_url: None,
                ocr_api_key: None,
                ocr_model: "test".into(),
                ocr_max_retries: 2,
            }
        };
        assert!(GeminiOcrClient::from_config(&server_less).expect("ok").is_none());
    }
}
