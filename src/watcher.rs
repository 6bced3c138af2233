//! Directory watching and backlog scanning.
//!
//! Two detection modes funnel into the same channel: OS file events
//! (`notify::RecommendedWatcher`) and periodic re-scans
//! (`notify::PollWatcher`). `auto` tries events first and falls back to
//! polling, mirroring deployments on network mounts where inotify never
//! fires. The startup backlog scan walks the tree with `walkdir` and drops
//! anything the ledger already knows.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Config as BackendConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{WatchConfig, WatchMode};
use crate::state::StateLedger;

/// Extension and exclude-glob filtering shared by the watcher and the
/// backlog scan.
#[derive(Clone)]
pub struct CandidateFilter {
    root: PathBuf,
    extensions: Vec<String>,
    excludes: GlobSet,
}

impl CandidateFilter {
    pub fn new(config: &WatchConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_globs {
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("invalid exclude glob: {}", pattern))?,
            );
        }
        Ok(Self {
            root: config.root.clone(),
            extensions: config.extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            excludes: builder.build()?,
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        // Sync tools drop dotfile placeholders while uploading; skip them.
        if path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'))
        {
            return false;
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !self.extensions.iter().any(|e| e == &extension) {
            return false;
        }

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        !self.excludes.is_match(relative)
    }
}

enum WatchBackend {
    Events(RecommendedWatcher),
    Polling(PollWatcher),
}

/// Watches the configured root and yields candidate file paths.
pub struct FileWatcher {
    _backend: WatchBackend,
    rx: tokio_mpsc::Receiver<PathBuf>,
    mode: &'static str,
}

impl FileWatcher {
    /// Start watching. Creates the root directory if it does not exist.
    pub fn start(config: &WatchConfig) -> Result<Self> {
        if !config.root.exists() {
            warn!(root = %config.root.display(), "watch directory does not exist, creating it");
            std::fs::create_dir_all(&config.root)
                .with_context(|| format!("cannot create watch root {}", config.root.display()))?;
        }

        let filter = CandidateFilter::new(config)?;
        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
        let (tx, rx) = tokio_mpsc::channel::<PathBuf>(256);

        // Bridge notify's callback thread into the async channel.
        std::thread::spawn(move || {
            while let Ok(result) = event_rx.recv() {
                match result {
                    Ok(event) => {
                        for path in candidate_paths(&event, &filter) {
                            info!(path = %path.display(), "new file detected");
                            if tx.blocking_send(path).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("watch error: {}", e),
                }
            }
        });

        let handler = move |result: notify::Result<Event>| {
            let _ = event_tx.send(result);
        };

        let poll_config = BackendConfig::default()
            .with_poll_interval(Duration::from_secs(config.polling_interval_secs));

        let (mut backend, mode) = match config.mode {
            WatchMode::Events => (
                WatchBackend::Events(RecommendedWatcher::new(handler, BackendConfig::default())?),
                "event-based",
            ),
            WatchMode::Polling => {
                (WatchBackend::Polling(PollWatcher::new(handler, poll_config)?), "polling")
            }
            WatchMode::Auto => match RecommendedWatcher::new(handler.clone(), BackendConfig::default()) {
                Ok(watcher) => (WatchBackend::Events(watcher), "event-based"),
                Err(e) => {
                    warn!("event-based watcher unavailable ({}), falling back to polling", e);
                    (WatchBackend::Polling(PollWatcher::new(handler, poll_config)?), "polling")
                }
            },
        };

        match &mut backend {
            WatchBackend::Events(w) => w.watch(&config.root, RecursiveMode::Recursive)?,
            WatchBackend::Polling(w) => w.watch(&config.root, RecursiveMode::Recursive)?,
        }

        info!(mode, root = %config.root.display(), "file watcher started");
        Ok(Self { _backend: backend, rx, mode })
    }

    /// Next detected candidate file, or `None` once the watcher is gone.
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }

    pub fn mode(&self) -> &'static str {
        self.mode
    }
}

/// Paths from a create event that pass the candidate filter.
fn candidate_paths(event: &Event, filter: &CandidateFilter) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| filter.matches(path))
        .cloned()
        .collect()
}

/// Walk the watched tree and return supported files not yet in the ledger,
/// in traversal order.
pub fn scan_backlog(config: &WatchConfig, ledger: &StateLedger) -> Result<Vec<PathBuf>> {
    if !config.root.exists() {
        warn!(root = %config.root.display(), "watch directory does not exist");
        return Ok(Vec::new());
    }

    let filter = CandidateFilter::new(config)?;
    let mut unprocessed = Vec::new();

    for entry in WalkDir::new(&config.root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if filter.matches(path) && !ledger.is_processed(&path.to_string_lossy()) {
            unprocessed.push(path.to_path_buf());
        }
    }

    info!(count = unprocessed.len(), "backlog scan complete");
    Ok(unprocessed)
}
