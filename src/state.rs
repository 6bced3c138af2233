//! Durable ledger of processed file identities.
//!
//! The ledger is the single source of truth for "do not touch again": the
//! pipeline marks a file only after the search index accepted it, and the
//! watcher consults the ledger before doing any work. Persistence is a
//! flat JSON file written atomically (temp file + rename) with the previous
//! version rotated to a `.backup` sibling, so a crash mid-write can never
//! leave a torn file and a corrupted write can be recovered from on the
//! next load.
//!
//! Losing the ledger entirely is degraded but safe: documents re-index
//! under the same deterministic ID, so reprocessing overwrites rather than
//! duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::identity;
use crate::retry::{execute_with_retry, RetryClass, RetryPolicy};

/// On-disk shape of the ledger file (and its `.backup` sibling).
#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    processed_files: Vec<String>,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    total_files: usize,
    #[serde(default)]
    statistics: LedgerStatistics,
}

/// Lifetime counters carried alongside the processed set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub lifetime_marked: u64,
    pub lifetime_removed: u64,
}

/// Durable set of processed file identities.
pub struct StateLedger {
    path: PathBuf,
    processed: BTreeSet<String>,
    statistics: LedgerStatistics,
    save_policy: RetryPolicy,
}

impl StateLedger {
    /// Load the ledger from `path`, or start empty.
    ///
    /// Never fails: a missing file is a cold start, a corrupted file
    /// triggers one recovery attempt from the `.backup` sibling, and if
    /// that also fails the ledger starts empty (reprocessing is safe,
    /// crashing is not).
    pub fn load(path: impl Into<PathBuf>, save_policy: RetryPolicy) -> Self {
        let path = path.into();
        let (processed, statistics) = match read_ledger(&path) {
            Ok(Some(file)) => {
                info!(count = file.processed_files.len(), "loaded processed-files ledger");
                (normalized_set(file.processed_files), file.statistics)
            }
            Ok(None) => {
                info!("no existing ledger found, starting fresh");
                (BTreeSet::new(), LedgerStatistics::default())
            }
            Err(e) => {
                warn!("ledger file unreadable ({}), attempting backup recovery", e);
                match read_ledger(&backup_path(&path)) {
                    Ok(Some(file)) => {
                        warn!(
                            count = file.processed_files.len(),
                            "recovered ledger from backup"
                        );
                        (normalized_set(file.processed_files), file.statistics)
                    }
                    _ => {
                        error!("ledger and backup both unreadable, starting with empty set");
                        (BTreeSet::new(), LedgerStatistics::default())
                    }
                }
            }
        };
        Self { path, processed, statistics, save_policy }
    }

    /// Whether `path`'s identity has completed the pipeline before.
    pub fn is_processed(&self, path: &str) -> bool {
        self.processed.contains(&identity::normalize(path))
    }

    /// Record `path` as processed and persist. Returns `false` when the
    /// persist step failed after exhausting retries; the in-memory set is
    /// updated either way, but the caller should treat the file as not
    /// durably processed.
    pub async fn mark_processed(&mut self, path: &str) -> bool {
        let id = identity::normalize(path);
        if self.processed.insert(id.clone()) {
            self.statistics.lifetime_marked += 1;
            debug!(identity = %id, "marked as processed");
            self.save().await
        } else {
            // Already present: set semantics make this a no-op.
            true
        }
    }

    /// Bulk [`Self::mark_processed`] with a single persist for the batch.
    pub async fn mark_batch_processed<I, S>(&mut self, paths: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inserted = 0u64;
        for path in paths {
            if self.processed.insert(identity::normalize(path.as_ref())) {
                inserted += 1;
            }
        }
        if inserted == 0 {
            return true;
        }
        self.statistics.lifetime_marked += inserted;
        info!(count = inserted, "marked batch as processed");
        self.save().await
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Sorted identities, for administrative listing.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.processed.iter().map(String::as_str)
    }

    pub fn statistics(&self) -> &LedgerStatistics {
        &self.statistics
    }

    /// Administrative: forget one identity so the file reprocesses on the
    /// next scan.
    pub async fn remove_processed(&mut self, path: &str) -> bool {
        if self.processed.remove(&identity::normalize(path)) {
            self.statistics.lifetime_removed += 1;
            self.save().await
        } else {
            true
        }
    }

    /// Administrative: forget everything.
    pub async fn clear_processed(&mut self) -> bool {
        if self.processed.is_empty() {
            return true;
        }
        self.statistics.lifetime_removed += self.processed.len() as u64;
        self.processed.clear();
        self.save().await
    }

    async fn save(&self) -> bool {
        let path = &self.path;
        let processed = &self.processed;
        let statistics = &self.statistics;
        let result = execute_with_retry(
            self.save_policy,
            // I/O hiccups (NFS blips, transient ENOSPC) back off exponentially.
            |_: &std::io::Error| RetryClass::Exponential,
            move || async move { write_ledger(path, processed, statistics) },
        )
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("failed to persist ledger after retries: {}", e);
                false
            }
        }
    }
}

/// Entries are normalized on write, but re-normalizing on load keeps the
/// identity invariant even for hand-edited ledger files.
fn normalized_set(paths: Vec<String>) -> BTreeSet<String> {
    paths.iter().map(|p| identity::normalize(p)).collect()
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".backup");
    PathBuf::from(os)
}

fn read_ledger(path: &Path) -> std::io::Result<Option<LedgerFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let file: LedgerFile = serde_json::from_str(&content)?;
    Ok(Some(file))
}

fn write_ledger(
    path: &Path,
    processed: &BTreeSet<String>,
    statistics: &LedgerStatistics,
) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let file = LedgerFile {
        processed_files: processed.iter().cloned().collect(),
        last_updated: Utc::now(),
        total_files: processed.len(),
        statistics: statistics.clone(),
    };
    let json = serde_json::to_vec_pretty(&file)?;

    // Temp file in the same directory so the final rename stays on one
    // filesystem and is atomic.
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;

    // Rotate the current file before replacing it; the main file stays
    // intact until the atomic persist below.
    if path.exists() {
        std::fs::copy(path, backup_path(path))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> RetryPolicy {
        RetryPolicy::new(1, std::time::Duration::from_millis(1))
    }

    #[tokio::test]
    async fn round_trip_through_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let mut ledger = StateLedger::load(&path, test_policy());
        assert!(!ledger.is_processed("/notes/a.jpg"));
        assert!(ledger.mark_processed("/notes/a.jpg").await);

        let reloaded = StateLedger::load(&path, test_policy());
        assert!(reloaded.is_processed("/notes/a.jpg"));
        assert_eq!(reloaded.processed_count(), 1);
    }

    #[tokio::test]
    async fn normalized_identities_match_across_representations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let mut ledger = StateLedger::load(&path, test_policy());
        assert!(ledger.mark_processed("/a\u{202f}b.jpg").await);
        assert!(ledger.is_processed("/a b.jpg"));

        let reloaded = StateLedger::load(&path, test_policy());
        assert!(reloaded.is_processed("/a b.jpg"));
    }

    #[tokio::test]
    async fn marking_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let mut ledger = StateLedger::load(&path, test_policy());
        assert!(ledger.mark_processed("/notes/a.jpg").await);
        let count = ledger.processed_count();
        assert!(ledger.mark_processed("/notes/a.jpg").await);
        assert_eq!(ledger.processed_count(), count);
        assert_eq!(ledger.statistics().lifetime_marked, 1);
    }

    #[tokio::test]
    async fn batch_mark_persists_once_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let mut ledger = StateLedger::load(&path, test_policy());
        assert!(
            ledger
                .mark_batch_processed(["/n/a.jpg", "/n/b.jpg", "/n/a.jpg"])
                .await
        );
        assert_eq!(ledger.processed_count(), 2);

        let reloaded = StateLedger::load(&path, test_policy());
        assert_eq!(reloaded.processed_count(), 2);
        assert_eq!(reloaded.statistics().lifetime_marked, 2);
    }

    #[tokio::test]
    async fn on_disk_list_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let mut ledger = StateLedger::load(&path, test_policy());
        ledger.mark_processed("/z.jpg").await;
        ledger.mark_processed("/a.jpg").await;
        ledger.mark_processed("/m.jpg").await;

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let files: Vec<&str> = parsed["processed_files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(files, vec!["/a.jpg", "/m.jpg", "/z.jpg"]);
        assert_eq!(parsed["total_files"], 3);
        assert!(parsed["last_updated"].is_string());
    }

    #[tokio::test]
    async fn corrupted_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");
        std::fs::write(&path, "{ not valid json").unwrap();

        let ledger = StateLedger::load(&path, test_policy());
        assert_eq!(ledger.processed_count(), 0);
    }

    #[tokio::test]
    async fn corrupted_file_recovers_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let mut ledger = StateLedger::load(&path, test_policy());
        ledger.mark_processed("/notes/a.jpg").await;
        // Second save rotates the first file into the backup slot.
        ledger.mark_processed("/notes/b.jpg").await;
        drop(ledger);

        std::fs::write(&path, "garbage").unwrap();

        let recovered = StateLedger::load(&path, test_policy());
        assert!(recovered.processed_count() >= 1);
        assert!(recovered.is_processed("/notes/a.jpg"));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.json");

        let mut ledger = StateLedger::load(&path, test_policy());
        ledger.mark_processed("/a.jpg").await;
        ledger.mark_processed("/b.jpg").await;

        assert!(ledger.remove_processed("/a.jpg").await);
        assert!(!ledger.is_processed("/a.jpg"));
        assert_eq!(ledger.processed_count(), 1);
        // Removing an absent identity is a successful no-op.
        assert!(ledger.remove_processed("/a.jpg").await);

        assert!(ledger.clear_processed().await);
        assert_eq!(ledger.processed_count(), 0);

        let reloaded = StateLedger::load(&path, test_policy());
        assert_eq!(reloaded.processed_count(), 0);
        assert_eq!(reloaded.statistics().lifetime_removed, 2);
    }

    #[tokio::test]
    async fn cold_start_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StateLedger::load(dir.path().join("missing/processed.json"), test_policy());
        assert_eq!(ledger.processed_count(), 0);
    }
}
