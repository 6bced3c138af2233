//! Uniform component health checks.
//!
//! Every component reports the same shape — name, a boolean, and an
//! optional detail string — so the CLI can print one table and callers
//! never branch on per-component result types.

use crate::config::{Config, Secrets, EMBEDDING_KEY_ENV, OCR_KEY_ENV, SEARCH_KEY_ENV};

/// Health of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub component: &'static str,
    pub healthy: bool,
    pub detail: Option<String>,
}

/// Implemented uniformly by everything that can report readiness.
pub trait HealthCheck {
    fn health(&self) -> Health;
}

struct WatchRootCheck<'a>(&'a Config);

impl HealthCheck for WatchRootCheck<'_> {
    fn health(&self) -> Health {
        let root = &self.0.watch.root;
        if root.is_dir() {
            Health { component: "watcher", healthy: true, detail: None }
        } else {
            Health {
                component: "watcher",
                healthy: false,
                detail: Some(format!("watch root does not exist: {}", root.display())),
            }
        }
    }
}

struct LedgerCheck<'a>(&'a Config);

impl HealthCheck for LedgerCheck<'_> {
    fn health(&self) -> Health {
        let path = &self.0.state.path;
        if !path.exists() {
            return Health {
                component: "ledger",
                healthy: true,
                detail: Some("no ledger yet (cold start)".to_string()),
            };
        }
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<serde_json::Value>(&content).map_err(|e| e.to_string())
            }) {
            Ok(value) => {
                let count = value
                    .get("processed_files")
                    .and_then(|v| v.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0);
                Health {
                    component: "ledger",
                    healthy: true,
                    detail: Some(format!("{} processed files", count)),
                }
            }
            Err(e) => Health {
                component: "ledger",
                healthy: false,
                detail: Some(format!("ledger unreadable (backup recovery will run): {}", e)),
            },
        }
    }
}

struct ServiceCheck {
    component: &'static str,
    endpoint: String,
    key_present: bool,
    key_env: &'static str,
}

impl HealthCheck for ServiceCheck {
    fn health(&self) -> Health {
        if self.endpoint.is_empty() {
            return Health {
                component: self.component,
                healthy: false,
                detail: Some("endpoint not configured".to_string()),
            };
        }
        if !self.key_present {
            return Health {
                component: self.component,
                healthy: false,
                detail: Some(format!("{} not set", self.key_env)),
            };
        }
        Health { component: self.component, healthy: true, detail: None }
    }
}

/// Run every component's health check and collect the results.
pub fn run_health_checks(config: &Config, secrets: &Secrets) -> Vec<Health> {
    let checks: Vec<Box<dyn HealthCheck + '_>> = vec![
        Box::new(WatchRootCheck(config)),
        Box::new(LedgerCheck(config)),
        Box::new(ServiceCheck {
            component: "ocr",
            endpoint: config.ocr.endpoint.clone(),
            key_present: secrets.ocr_key.is_some(),
            key_env: OCR_KEY_ENV,
        }),
        Box::new(ServiceCheck {
            component: "embedding",
            endpoint: config.embedding.endpoint.clone(),
            key_present: secrets.embedding_key.is_some(),
            key_env: EMBEDDING_KEY_ENV,
        }),
        Box::new(ServiceCheck {
            component: "index",
            endpoint: config.index.endpoint.clone(),
            key_present: secrets.search_key.is_some(),
            key_env: SEARCH_KEY_ENV,
        }),
    ];
    checks.iter().map(|c| c.health()).collect()
}
