//! Text extraction boundary: Azure Document Intelligence (`prebuilt-read`).
//!
//! The service runs analysis as a long-running operation: submit the bytes,
//! then poll the returned operation URL until it settles. Both steps run
//! inside the retry executor; a transient failure re-submits the document.
//! Input validation happens before any network call and never consumes a
//! retry attempt.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::OcrConfig;
use crate::error::ApiError;
use crate::retry::{execute_with_retry, RetryPolicy};

/// Extensions the OCR boundary accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "pdf"];

/// Extracted text plus the metadata the rest of the pipeline cares about.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
    pub page_count: usize,
    pub word_count: usize,
    pub character_count: usize,
    /// BCP-47 language codes the service detected, most confident first.
    pub languages: Vec<String>,
    pub processing_time: Duration,
    pub file_size_bytes: u64,
}

/// Anything that turns a file on disk into text + metadata.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<OcrResult, ApiError>;
}

/// Azure Document Intelligence client (`prebuilt-read` model).
pub struct DocIntelligenceClient {
    endpoint: String,
    api_version: String,
    api_key: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    max_file_size_bytes: u64,
    poll_interval: Duration,
    max_polls: u32,
}

impl DocIntelligenceClient {
    pub fn new(config: &OcrConfig, api_key: String, policy: RetryPolicy) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ApiError::from)?;

        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(100));
        // The poll budget tracks the configured request timeout: a document
        // that has not settled within it is treated as a transient failure.
        let max_polls =
            ((config.timeout_secs * 1000) / poll_interval.as_millis().max(1) as u64).max(1) as u32;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            api_key,
            client,
            policy,
            max_file_size_bytes: config.max_file_size_mb * 1024 * 1024,
            poll_interval,
            max_polls,
        })
    }

    async fn analyze_once(&self, bytes: &[u8]) -> Result<Value, ApiError> {
        let url = format!(
            "{}/documentintelligence/documentModels/prebuilt-read:analyze?api-version={}",
            self.endpoint, self.api_version
        );

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::Unexpected("analyze response missing operation-location header".into())
            })?;

        for _ in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let poll = self
                .client
                .get(&operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .send()
                .await?;

            let status = poll.status();
            if !status.is_success() {
                let body = poll.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, body));
            }

            let body: Value = poll.json().await?;
            match body.get("status").and_then(Value::as_str) {
                Some("succeeded") => {
                    return body
                        .get("analyzeResult")
                        .cloned()
                        .ok_or_else(|| ApiError::Unexpected("missing analyzeResult".into()))
                }
                Some("failed") => {
                    let message = body
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("analysis failed");
                    return Err(ApiError::Unexpected(format!("document analysis failed: {}", message)));
                }
                // notStarted / running
                _ => debug!("analysis still running"),
            }
        }

        Err(ApiError::Network("document analysis did not settle within the poll budget".into()))
    }
}

#[async_trait]
impl TextExtractor for DocIntelligenceClient {
    async fn extract(&self, path: &Path) -> Result<OcrResult, ApiError> {
        let file_size_bytes = validate_input(path, self.max_file_size_bytes)?;
        let bytes = std::fs::read(path)
            .map_err(|e| ApiError::Validation(format!("cannot read {}: {}", path.display(), e)))?;

        let started = Instant::now();
        let analyze_result = execute_with_retry(
            self.policy,
            ApiError::retry_class,
            || self.analyze_once(&bytes),
        )
        .await?;

        let result = parse_analyze_result(&analyze_result, started.elapsed(), file_size_bytes);
        info!(
            path = %path.display(),
            pages = result.page_count,
            words = result.word_count,
            "extracted text"
        );
        Ok(result)
    }
}

/// Pre-flight checks: existence, supported extension, size cap. Failures
/// are terminal and never consume a retry attempt.
fn validate_input(path: &Path, max_bytes: u64) -> Result<u64, ApiError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::Validation(format!(
            "unsupported file extension: {:?}",
            path.extension().unwrap_or_default()
        )));
    }

    let metadata = std::fs::metadata(path)
        .map_err(|e| ApiError::Validation(format!("cannot stat {}: {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(ApiError::Validation(format!("not a regular file: {}", path.display())));
    }
    if metadata.len() > max_bytes {
        return Err(ApiError::Validation(format!(
            "file exceeds size limit ({} > {} bytes)",
            metadata.len(),
            max_bytes
        )));
    }
    Ok(metadata.len())
}

fn parse_analyze_result(result: &Value, elapsed: Duration, file_size_bytes: u64) -> OcrResult {
    let text = result
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let page_count = result
        .get("pages")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    let languages = result
        .get("languages")
        .and_then(Value::as_array)
        .map(|langs| {
            langs
                .iter()
                .filter_map(|l| l.get("locale").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    OcrResult {
        word_count: text.split_whitespace().count(),
        character_count: text.chars().count(),
        text,
        page_count,
        languages,
        processing_time: elapsed,
        file_size_bytes,
    }
}
