//! Best-effort webhook notifications.
//!
//! Delivery is fire-and-forget: a webhook outage must never affect
//! pipeline correctness, so failures are logged at warn and swallowed.
//! Discord webhook URLs get the `{"content": ...}` shape Discord expects;
//! every other endpoint (ntfy.sh, Slack, custom) receives the full payload.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NotifyConfig;
use crate::error::ApiError;

/// An outcome worth reporting on the side channel.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    FileProcessed {
        file_name: String,
        file_path: String,
        word_count: usize,
        category: String,
        source: String,
        title: String,
    },
    BatchComplete {
        files_processed: usize,
        duration_seconds: f64,
    },
    ProcessingError {
        file_name: String,
        file_path: String,
        error: String,
    },
}

impl NotifyEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            NotifyEvent::FileProcessed { .. } => "file_processed",
            NotifyEvent::BatchComplete { .. } => "batch_complete",
            NotifyEvent::ProcessingError { .. } => "processing_error",
        }
    }

    /// Short human-readable summary, used verbatim for Discord.
    pub fn message(&self) -> String {
        match self {
            NotifyEvent::FileProcessed { file_name, title, word_count, .. } => {
                let display = if title.is_empty() { file_name } else { title };
                format!("Processed: {} ({} words)", display, word_count)
            }
            NotifyEvent::BatchComplete { files_processed, duration_seconds } => {
                format!(
                    "Batch complete: {} file(s) processed in {:.1}s",
                    files_processed, duration_seconds
                )
            }
            NotifyEvent::ProcessingError { file_name, error, .. } => {
                format!("Error processing {}: {}", file_name, error)
            }
        }
    }

    /// Full JSON payload for generic webhook endpoints.
    pub fn payload(&self) -> Value {
        let timestamp = Utc::now().to_rfc3339();
        let message = self.message();
        match self {
            NotifyEvent::FileProcessed {
                file_name,
                file_path,
                word_count,
                category,
                source,
                title,
            } => serde_json::json!({
                "event": "file_processed",
                "timestamp": timestamp,
                "file": { "name": file_name, "path": file_path, "word_count": word_count },
                "metadata": { "category": category, "source": source, "title": title },
                "message": message,
            }),
            NotifyEvent::BatchComplete { files_processed, duration_seconds } => serde_json::json!({
                "event": "batch_complete",
                "timestamp": timestamp,
                "summary": {
                    "files_processed": files_processed,
                    "duration_seconds": (duration_seconds * 100.0).round() / 100.0,
                },
                "message": message,
            }),
            NotifyEvent::ProcessingError { file_name, file_path, error } => serde_json::json!({
                "event": "processing_error",
                "timestamp": timestamp,
                "file": { "name": file_name, "path": file_path },
                "error": error,
                "message": message,
            }),
        }
    }
}

/// Side-channel reporting of pipeline outcomes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `event` on a best-effort basis. Never fails.
    async fn send(&self, event: NotifyEvent);
}

/// Webhook-backed notifier; inert when no URL is configured.
pub struct WebhookNotifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ApiError::from)?;
        Ok(Self { url: config.webhook_url.clone(), client })
    }

    pub fn enabled(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, event: NotifyEvent) {
        let Some(url) = &self.url else {
            return;
        };

        let payload = if url.contains("discord.com") {
            serde_json::json!({ "content": event.message() })
        } else {
            event.payload()
        };

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(event = event.event_name(), "webhook sent");
            }
            Ok(response) => {
                warn!(
                    event = event.event_name(),
                    status = %response.status(),
                    "webhook rejected"
                );
            }
            Err(e) => {
                warn!(event = event.event_name(), "failed to send webhook notification: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_processed_payload_shape() {
        let event = NotifyEvent::FileProcessed {
            file_name: "scan.jpg".into(),
            file_path: "/brain-notes/work/alpha/scan.jpg".into(),
            word_count: 42,
            category: "work".into(),
            source: "alpha".into(),
            title: "Alpha".into(),
        };
        let payload = event.payload();
        assert_eq!(payload["event"], "file_processed");
        assert_eq!(payload["file"]["word_count"], 42);
        assert_eq!(payload["metadata"]["category"], "work");
        assert!(payload["timestamp"].is_string());
        assert_eq!(payload["message"], "Processed: Alpha (42 words)");
    }

    #[test]
    fn file_processed_message_falls_back_to_file_name() {
        let event = NotifyEvent::FileProcessed {
            file_name: "scan.jpg".into(),
            file_path: "/n/scan.jpg".into(),
            word_count: 7,
            category: String::new(),
            source: String::new(),
            title: String::new(),
        };
        assert_eq!(event.message(), "Processed: scan.jpg (7 words)");
    }

    #[test]
    fn batch_complete_message_rounds_duration() {
        let event = NotifyEvent::BatchComplete { files_processed: 3, duration_seconds: 12.3456 };
        assert_eq!(event.message(), "Batch complete: 3 file(s) processed in 12.3s");
        assert_eq!(event.payload()["summary"]["duration_seconds"], 12.35);
    }

    #[test]
    fn error_payload_carries_the_error() {
        let event = NotifyEvent::ProcessingError {
            file_name: "bad.pdf".into(),
            file_path: "/n/bad.pdf".into(),
            error: "extraction failed".into(),
        };
        let payload = event.payload();
        assert_eq!(payload["event"], "processing_error");
        assert_eq!(payload["error"], "extraction failed");
        assert_eq!(payload["message"], "Error processing bad.pdf: extraction failed");
    }

    #[tokio::test]
    async fn disabled_notifier_is_inert() {
        let notifier = WebhookNotifier::new(&NotifyConfig::default()).unwrap();
        assert!(!notifier.enabled());
        // No URL configured: send returns without any network activity.
        notifier
            .send(NotifyEvent::BatchComplete { files_processed: 0, duration_seconds: 0.0 })
            .await;
    }
}
