//! Search index boundary: Azure AI Search upserts and queries.
//!
//! Documents are keyed by a deterministic ID derived from the file path,
//! so re-indexing the same file overwrites its record instead of
//! duplicating it — the storage-layer half of the pipeline's idempotency,
//! independent of the ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::ApiError;
use crate::retry::{execute_with_retry, RetryPolicy};

/// Longest content snippet returned with a search hit.
const SNIPPET_CHARS: usize = 500;

/// A document record ready for upsert.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocument {
    pub id: String,
    pub content: String,
    pub file_path: String,
    pub file_name: String,
    pub category: String,
    pub source: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub word_count: usize,
    pub content_vector: Vec<f32>,
    /// Extra metadata merged into the record at upsert time.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A search query against the index.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub vector: Option<Vec<f32>>,
    pub top: usize,
    pub filter: Option<String>,
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub file_name: String,
    pub file_path: String,
    pub snippet: String,
    pub category: String,
    pub source: String,
    pub title: String,
    pub score: f64,
}

/// Anything that stores and searches document records.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or update the index schema. Idempotent.
    async fn ensure_index(&self) -> Result<(), ApiError>;
    async fn index_document(&self, document: &IndexDocument) -> Result<(), ApiError>;
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ApiError>;
    async fn document_count(&self) -> Result<u64, ApiError>;
}

/// Derive the stable document ID for a file path.
///
/// Path separators become `_`, every character outside the allow-list
/// (letters, digits, `_`, `-`, `=`) becomes `_`, and leading delimiters
/// are removed. The same path always produces the same ID.
pub fn document_id(path: &str) -> String {
    let replaced: String = path
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' {
                '_'
            } else if c.is_alphanumeric() || c == '_' || c == '-' || c == '=' {
                c
            } else {
                '_'
            }
        })
        .collect();
    replaced.trim_start_matches('_').to_string()
}

/// Category/source/title derived from the file's position under the
/// watched root: `<root>/<category>/<source>/<file>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub category: String,
    pub source: String,
    pub title: String,
}

pub fn derive_metadata(path: &Path, watch_root: &Path) -> DocumentMetadata {
    let relative = path.strip_prefix(watch_root).unwrap_or(path);
    let components: Vec<String> = relative
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();

    let category = components.first().cloned().unwrap_or_else(|| "unknown".to_string());
    let source = components.get(1).cloned().unwrap_or_else(|| "unknown".to_string());

    let title = source
        .replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    DocumentMetadata { category, source, title }
}

/// Azure AI Search client.
pub struct AzureSearchClient {
    endpoint: String,
    index_name: String,
    api_version: String,
    api_key: String,
    dims: usize,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl AzureSearchClient {
    pub fn new(
        config: &IndexConfig,
        api_key: String,
        dims: usize,
        policy: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index_name: config.name.clone(),
            api_version: config.api_version.clone(),
            api_key,
            dims,
            client,
            policy,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/indexes/{}{}?api-version={}",
            self.endpoint, self.index_name, suffix, self.api_version
        )
    }

    fn index_schema(&self) -> Value {
        serde_json::json!({
            "name": self.index_name,
            "fields": [
                { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
                { "name": "content", "type": "Edm.String", "searchable": true },
                { "name": "file_path", "type": "Edm.String", "filterable": true, "sortable": true },
                { "name": "file_name", "type": "Edm.String", "filterable": true },
                { "name": "category", "type": "Edm.String", "filterable": true, "facetable": true },
                { "name": "source", "type": "Edm.String", "filterable": true, "facetable": true },
                { "name": "title", "type": "Edm.String", "searchable": true, "filterable": true },
                { "name": "created_at", "type": "Edm.DateTimeOffset", "filterable": true, "sortable": true },
                { "name": "indexed_at", "type": "Edm.DateTimeOffset", "filterable": true, "sortable": true },
                { "name": "word_count", "type": "Edm.Int32", "filterable": true, "sortable": true },
                {
                    "name": "content_vector",
                    "type": "Collection(Edm.Single)",
                    "searchable": true,
                    "dimensions": self.dims,
                    "vectorSearchProfile": "vector-profile"
                }
            ],
            "vectorSearch": {
                "algorithms": [ { "name": "hnsw-config", "kind": "hnsw" } ],
                "profiles": [ { "name": "vector-profile", "algorithm": "hnsw-config" } ]
            }
        })
    }

    async fn fetch_count(&self, url: &str) -> Result<u64, ApiError> {
        let response = self
            .client
            .get(url)
            .header("api-key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, text));
        }
        let text = response.text().await?;
        text.trim()
            .parse::<u64>()
            .map_err(|_| ApiError::Unexpected(format!("unparseable document count: {}", text)))
    }

    async fn send_json(&self, method: reqwest::Method, url: &str, body: &Value) -> Result<Value, ApiError> {
        let response = self
            .client
            .request(method, url)
            .header("api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, text));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl SearchIndex for AzureSearchClient {
    async fn ensure_index(&self) -> Result<(), ApiError> {
        let url = self.url("");
        let schema = self.index_schema();
        execute_with_retry(self.policy, ApiError::retry_class, || {
            self.send_json(reqwest::Method::PUT, &url, &schema)
        })
        .await?;
        info!(index = %self.index_name, "index schema created/updated");
        Ok(())
    }

    async fn index_document(&self, document: &IndexDocument) -> Result<(), ApiError> {
        if document.id.is_empty() {
            return Err(ApiError::Validation("document id must not be empty".into()));
        }
        if document.content_vector.len() != self.dims {
            return Err(ApiError::Validation(format!(
                "embedding vector has {} dims, index expects {}",
                document.content_vector.len(),
                self.dims
            )));
        }

        let url = self.url("/docs/index");
        let mut record = serde_json::to_value(document)
            .map_err(|e| ApiError::Unexpected(format!("document serialization failed: {}", e)))?;
        match record.as_object_mut() {
            Some(object) => {
                object.insert("@search.action".to_string(), Value::String("mergeOrUpload".to_string()));
            }
            None => return Err(ApiError::Unexpected("document did not serialize to an object".into())),
        }
        let body = serde_json::json!({ "value": [record] });

        let response = execute_with_retry(self.policy, ApiError::retry_class, || {
            self.send_json(reqwest::Method::POST, &url, &body)
        })
        .await?;

        let accepted = response
            .get("value")
            .and_then(Value::as_array)
            .and_then(|v| v.first())
            .and_then(|item| item.get("status"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !accepted {
            return Err(ApiError::Unexpected(format!(
                "index rejected document {}: {}",
                document.id, response
            )));
        }
        debug!(id = %document.id, "document upserted");
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ApiError> {
        let url = self.url("/docs/search");

        let mut body = serde_json::json!({
            "search": request.query,
            "select": "file_name,file_path,content,category,source,title",
            "top": request.top,
        });
        if let Some(filter) = &request.filter {
            body["filter"] = Value::String(filter.clone());
        }
        if let Some(vector) = &request.vector {
            body["vectorQueries"] = serde_json::json!([{
                "kind": "vector",
                "vector": vector,
                "k": request.top,
                "fields": "content_vector"
            }]);
        }

        let response = execute_with_retry(self.policy, ApiError::retry_class, || {
            self.send_json(reqwest::Method::POST, &url, &body)
        })
        .await?;

        let hits = response
            .get("value")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(parse_hit).collect())
            .unwrap_or_default();
        Ok(hits)
    }

    async fn document_count(&self) -> Result<u64, ApiError> {
        let url = self.url("/docs/$count");
        execute_with_retry(self.policy, ApiError::retry_class, || self.fetch_count(&url)).await
    }
}

fn parse_hit(value: &Value) -> SearchHit {
    let string = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    SearchHit {
        file_name: string("file_name"),
        file_path: string("file_path"),
        snippet: truncate_chars(&string("content"), SNIPPET_CHARS),
        category: string("category"),
        source: string("source"),
        title: string("title"),
        score: value.get("@search.score").and_then(Value::as_f64).unwrap_or(0.0),
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}
