//! TOML configuration loading and validation.
//!
//! One [`Config`] value is built at process start and passed by reference
//! into every component constructor — there is no ambient global lookup.
//! Service credentials never live in the file; they are read from the
//! environment into [`Secrets`] alongside it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Environment variable holding the OCR service key.
pub const OCR_KEY_ENV: &str = "SCANDEX_OCR_KEY";
/// Environment variable holding the embedding service key.
pub const EMBEDDING_KEY_ENV: &str = "SCANDEX_EMBEDDING_KEY";
/// Environment variable holding the search service key.
pub const SEARCH_KEY_ENV: &str = "SCANDEX_SEARCH_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub watch: WatchConfig,
    pub state: StateConfig,
    pub ocr: OcrConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    #[serde(default = "default_watch_mode")]
    pub mode: WatchMode,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

/// Detection backend for the watcher.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Try OS file events, fall back to polling.
    Auto,
    /// OS file events only.
    Events,
    /// Periodic re-scan only.
    Polling,
}

fn default_watch_mode() -> WatchMode {
    WatchMode::Auto
}
fn default_polling_interval() -> u64 {
    180
}
fn default_settle_delay() -> u64 {
    1000
}
fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "bmp", "tiff", "pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_ocr_api_version")]
    pub api_version: String,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ocr_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_ocr_api_version() -> String {
    "2024-07-31".to_string()
}
fn default_max_file_size_mb() -> u64 {
    50
}
fn default_service_timeout() -> u64 {
    30
}
fn default_ocr_poll_interval() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Override the model dimension table for nonstandard deployments.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_chunk_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
}

fn default_deployment() -> String {
    "text-embedding-3-small".to_string()
}
fn default_api_version() -> String {
    "2024-02-01".to_string()
}
fn default_chunk_max_tokens() -> usize {
    8000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
}

fn default_index_name() -> String {
    "second-brain-notes".to_string()
}
fn default_search_api_version() -> String {
    "2023-11-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), base_delay_ms: default_base_delay_ms() }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { webhook_url: None, timeout_secs: default_webhook_timeout() }
    }
}

fn default_webhook_timeout() -> u64 {
    10
}

/// Service credentials, read from the environment once at startup.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub ocr_key: Option<String>,
    pub embedding_key: Option<String>,
    pub search_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            ocr_key: read(OCR_KEY_ENV),
            embedding_key: read(EMBEDDING_KEY_ENV),
            search_key: read(SEARCH_KEY_ENV),
        }
    }
}

/// Load and structurally validate the configuration file.
///
/// Service endpoints and credentials are checked separately by
/// [`Config::validate_services`] so administrative commands that never
/// touch the cloud still work with a minimal file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !(30..=3600).contains(&config.watch.polling_interval_secs) {
        anyhow::bail!("watch.polling_interval_secs must be between 30 and 3600");
    }
    if config.watch.extensions.is_empty() {
        anyhow::bail!("watch.extensions must not be empty");
    }
    if config.embedding.max_tokens == 0 {
        anyhow::bail!("embedding.max_tokens must be > 0");
    }
    if config.embedding.overlap_tokens >= config.embedding.max_tokens {
        anyhow::bail!("embedding.overlap_tokens must be smaller than embedding.max_tokens");
    }
    if config.ocr.max_file_size_mb == 0 {
        anyhow::bail!("ocr.max_file_size_mb must be > 0");
    }
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    Ok(config)
}

fn validate_url(url: &str, name: &str) -> Result<()> {
    if url.is_empty() {
        anyhow::bail!("{} is required", name);
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        anyhow::bail!("{} must be an http(s) URL (got: {})", name, url);
    }
    Ok(())
}

impl Config {
    /// Validate everything the cloud-facing commands need: endpoints,
    /// credentials, and the index name charset.
    pub fn validate_services(&self, secrets: &Secrets) -> Result<()> {
        validate_url(&self.ocr.endpoint, "ocr.endpoint")?;
        validate_url(&self.embedding.endpoint, "embedding.endpoint")?;
        validate_url(&self.index.endpoint, "index.endpoint")?;

        if let Some(url) = &self.notify.webhook_url {
            validate_url(url, "notify.webhook_url")?;
        }

        if self.index.name.is_empty()
            || !self
                .index
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!(
                "index.name must be non-empty lowercase letters, digits, and hyphens (got: {})",
                self.index.name
            );
        }

        if secrets.ocr_key.is_none() {
            anyhow::bail!("{} is required and cannot be empty", OCR_KEY_ENV);
        }
        if secrets.embedding_key.is_none() {
            anyhow::bail!("{} is required and cannot be empty", EMBEDDING_KEY_ENV);
        }
        if secrets.search_key.is_none() {
            anyhow::bail!("{} is required and cannot be empty", SEARCH_KEY_ENV);
        }

        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.watch.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[watch]
root = "/brain-notes"

[state]
path = "/tmp/scandex/processed_files.json"

[ocr]
endpoint = "https://ocr.example.com"

[embedding]
endpoint = "https://aoai.example.com"

[index]
endpoint = "https://search.example.com"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.watch.mode, WatchMode::Auto);
        assert_eq!(config.watch.polling_interval_secs, 180);
        assert_eq!(config.watch.extensions.len(), 6);
        assert_eq!(config.embedding.deployment, "text-embedding-3-small");
        assert_eq!(config.embedding.max_tokens, 8000);
        assert_eq!(config.index.name, "second-brain-notes");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn polling_interval_out_of_range_rejected() {
        let file = write_config(&MINIMAL.replace(
            "root = \"/brain-notes\"",
            "root = \"/brain-notes\"\npolling_interval_secs = 5",
        ));
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn overlap_must_be_under_budget() {
        let file = write_config(&MINIMAL.replace(
            "endpoint = \"https://aoai.example.com\"",
            "endpoint = \"https://aoai.example.com\"\nmax_tokens = 100\noverlap_tokens = 100",
        ));
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn service_validation_requires_keys() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();
        let err = config.validate_services(&Secrets::default()).unwrap_err();
        assert!(err.to_string().contains(OCR_KEY_ENV));

        let secrets = Secrets {
            ocr_key: Some("k1".into()),
            embedding_key: Some("k2".into()),
            search_key: Some("k3".into()),
        };
        config.validate_services(&secrets).unwrap();
    }

    #[test]
    fn bad_index_name_rejected() {
        let file = write_config(&MINIMAL.replace(
            "endpoint = \"https://search.example.com\"",
            "endpoint = \"https://search.example.com\"\nname = \"Bad_Name\"",
        ));
        let config = load_config(file.path()).unwrap();
        let secrets = Secrets {
            ocr_key: Some("k".into()),
            embedding_key: Some("k".into()),
            search_key: Some("k".into()),
        };
        assert!(config.validate_services(&secrets).is_err());
    }
}
