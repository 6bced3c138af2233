//! Embedding boundary: Azure OpenAI embeddings plus the chunking utility
//! for documents that exceed the model's input budget.
//!
//! # Retry Strategy
//!
//! Rate limits back off exponentially, server and network errors linearly,
//! auth and other client errors fail immediately — the shared
//! [`ApiError::retry_class`] table, driven by the retry executor.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::error::ApiError;
use crate::retry::{execute_with_retry, RetryPolicy};

/// Approximate chars-per-token ratio for this domain.
const CHARS_PER_TOKEN: usize = 4;

/// How far back from a chunk boundary to look for a sentence break.
const SENTENCE_SEARCH_WINDOW: usize = 800;

/// Chunks shorter than this after trimming are discarded as noise.
const MIN_CHUNK_CHARS: usize = 10;

/// Anything that turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;
    /// Vector dimensionality this embedder produces.
    fn dims(&self) -> usize;
}

/// Vector dimensionality by deployment name. The config `dims` field
/// overrides this table for nonstandard deployments.
pub fn dims_for_model(deployment: &str) -> usize {
    if deployment.contains("text-embedding-3-large") {
        3072
    } else if deployment.contains("text-embedding-3-small") {
        384
    } else {
        // text-embedding-ada-002 and unknown deployments
        1536
    }
}

/// Azure OpenAI embeddings client.
pub struct AzureOpenAiEmbedder {
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: String,
    dims: usize,
    max_chars: usize,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl AzureOpenAiEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        api_key: String,
        policy: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
            api_key,
            dims: config.dims.unwrap_or_else(|| dims_for_model(&config.deployment)),
            max_chars: config.max_tokens * CHARS_PER_TOKEN,
            client,
            policy,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&serde_json::json!({ "input": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        let body: Value = response.json().await?;
        parse_embedding_response(&body)
    }
}

#[async_trait]
impl Embedder for AzureOpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::Validation("empty text provided for embedding".into()));
        }
        if text.chars().count() > self.max_chars {
            return Err(ApiError::Validation(format!(
                "text exceeds embedding budget ({} > {} chars); chunk it first",
                text.chars().count(),
                self.max_chars
            )));
        }

        debug!(chars = text.len(), "generating embedding");
        let vector =
            execute_with_retry(self.policy, ApiError::retry_class, || self.embed_once(text)).await?;

        if vector.len() != self.dims {
            debug!(
                got = vector.len(),
                expected = self.dims,
                "embedding dimension differs from configured model table"
            );
        }
        Ok(vector)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_embedding_response(body: &Value) -> Result<Vec<f32>, ApiError> {
    let embedding = body
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(|item| item.get("embedding"))
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::Unexpected("embedding response missing data[0].embedding".into()))?;

    Ok(embedding.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

/// Split `text` into chunks that respect the token budget.
///
/// Text at or under the budget is returned whole. Otherwise each chunk
/// boundary prefers the nearest sentence end (`". "`, `"! "`, `"? "`) or
/// paragraph break within [`SENTENCE_SEARCH_WINDOW`] chars of the hard
/// limit; consecutive chunks overlap by `overlap_tokens` worth of
/// characters so no sentence is stranded between chunks.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let hard_end = floor_char_boundary(text, (start + max_chars).min(text.len()));
        let end = if hard_end < text.len() {
            find_sentence_break(text, start, hard_end).unwrap_or(hard_end)
        } else {
            hard_end
        };

        let chunk = text[start..end].trim();
        if chunk.chars().count() >= MIN_CHUNK_CHARS {
            chunks.push(chunk.to_string());
        }

        if end >= text.len() {
            break;
        }
        let next = floor_char_boundary(text, end.saturating_sub(overlap_chars));
        // Overlap must never stall the walk.
        start = if next > start { next } else { end };
    }

    info!(count = chunks.len(), "split text into chunks");
    chunks
}

/// Nearest sentence-ending punctuation or paragraph break before `end`,
/// searched within the bounded window. Returns the boundary just past the
/// separator.
fn find_sentence_break(text: &str, start: usize, end: usize) -> Option<usize> {
    let window_start = floor_char_boundary(text, end.saturating_sub(SENTENCE_SEARCH_WINDOW).max(start));
    let window = &text[window_start..end];

    let mut best: Option<usize> = None;
    for pattern in [". ", "! ", "? ", "\n\n"] {
        if let Some(pos) = window.rfind(pattern) {
            let boundary = window_start + pos + pattern.len();
            if boundary > start && best.map_or(true, |b| boundary > b) {
                best = Some(boundary);
            }
        }
    }
    best
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
