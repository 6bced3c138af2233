//! Per-file processing pipeline.
//!
//! One file moves through extract → embed → index → mark, in that order,
//! with the ledger as the single source of truth for "done". Two
//! invariants hold everywhere: the ledger is never marked without a prior
//! successful index, and a marked file is never reprocessed. Every failure
//! maps to a terminal [`ProcessOutcome`] — nothing here panics or
//! propagates, because one bad file must not stop the watcher.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedding::{chunk_text, Embedder};
use crate::indexer::{self, IndexDocument, SearchIndex};
use crate::notifier::{Notifier, NotifyEvent};
use crate::ocr::TextExtractor;
use crate::state::StateLedger;

/// Pipeline stage a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Embed,
    Index,
    MarkState,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Extract => "extraction",
            Stage::Embed => "embedding",
            Stage::Index => "indexing",
            Stage::MarkState => "state marking",
        };
        f.write_str(name)
    }
}

/// Terminal result of processing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Ledger already knew this identity; nothing was invoked.
    Skipped,
    /// Extraction succeeded but produced no usable text.
    EmptyText,
    /// A stage failed; the ledger was not touched.
    Failed(Stage),
    /// Indexed and durably marked.
    Success,
}

/// Counts for one backlog run.
#[derive(Debug, Default, Clone, Copy)]
pub struct BacklogSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub empty: usize,
    pub failed: usize,
}

/// Settings the pipeline needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub watch_root: PathBuf,
    pub chunk_max_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            watch_root: config.watch.root.clone(),
            chunk_max_tokens: config.embedding.max_tokens,
            chunk_overlap_tokens: config.embedding.overlap_tokens,
        }
    }
}

/// Sequence controller for the extract → embed → index → mark flow.
pub struct Pipeline {
    ledger: StateLedger,
    extractor: Box<dyn TextExtractor>,
    embedder: Box<dyn Embedder>,
    indexer: Box<dyn SearchIndex>,
    notifier: Box<dyn Notifier>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        ledger: StateLedger,
        extractor: Box<dyn TextExtractor>,
        embedder: Box<dyn Embedder>,
        indexer: Box<dyn SearchIndex>,
        notifier: Box<dyn Notifier>,
        options: PipelineOptions,
    ) -> Self {
        Self { ledger, extractor, embedder, indexer, notifier, options }
    }

    pub fn ledger(&self) -> &StateLedger {
        &self.ledger
    }

    /// Run one file through the pipeline. Terminal states never transition
    /// further within this run; a future scan restarts from the top.
    pub async fn process_file(&mut self, path: &Path) -> ProcessOutcome {
        let path_str = path.to_string_lossy().to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path_str.clone());

        if self.ledger.is_processed(&path_str) {
            info!(file = %file_name, "skipping already processed file");
            return ProcessOutcome::Skipped;
        }

        info!(path = %path.display(), "processing new file");

        let ocr = match self.extractor.extract(path).await {
            Ok(result) => result,
            Err(e) => {
                error!(file = %file_name, "extraction failed: {}", e);
                self.notify_error(&file_name, &path_str, &e.to_string()).await;
                return ProcessOutcome::Failed(Stage::Extract);
            }
        };

        if ocr.text.trim().is_empty() {
            warn!(file = %file_name, "no text extracted");
            self.notify_error(&file_name, &path_str, "no text extracted").await;
            return ProcessOutcome::EmptyText;
        }

        let embed_input = self.embedding_input(&ocr.text, &file_name);
        let Some(embed_input) = embed_input else {
            warn!(file = %file_name, "text reduced to nothing after chunking");
            self.notify_error(&file_name, &path_str, "no text extracted").await;
            return ProcessOutcome::EmptyText;
        };

        let vector = match self.embedder.embed(&embed_input).await {
            Ok(vector) => vector,
            Err(e) => {
                error!(file = %file_name, "embedding failed: {}", e);
                self.notify_error(&file_name, &path_str, &e.to_string()).await;
                return ProcessOutcome::Failed(Stage::Embed);
            }
        };

        let metadata = indexer::derive_metadata(path, &self.options.watch_root);
        let now = Utc::now();
        let document = IndexDocument {
            id: indexer::document_id(&path_str),
            content: ocr.text.clone(),
            file_path: path_str.clone(),
            file_name: file_name.clone(),
            category: metadata.category.clone(),
            source: metadata.source.clone(),
            title: metadata.title.clone(),
            created_at: now,
            indexed_at: now,
            word_count: ocr.word_count,
            content_vector: vector,
            extra: serde_json::Map::new(),
        };

        if let Err(e) = self.indexer.index_document(&document).await {
            error!(file = %file_name, "indexing failed: {}", e);
            self.notify_error(&file_name, &path_str, &e.to_string()).await;
            return ProcessOutcome::Failed(Stage::Index);
        }

        // The only transition that grants permanent "done" status. If the
        // persist fails the document is already durable in the index; the
        // file reprocesses on a future scan and upserts the same record.
        if !self.ledger.mark_processed(&path_str).await {
            error!(file = %file_name, "indexed but failed to persist ledger mark");
            return ProcessOutcome::Failed(Stage::MarkState);
        }

        info!(file = %file_name, words = ocr.word_count, "successfully processed");
        self.notifier
            .send(NotifyEvent::FileProcessed {
                file_name,
                file_path: path_str,
                word_count: ocr.word_count,
                category: metadata.category,
                source: metadata.source,
                title: metadata.title,
            })
            .await;

        ProcessOutcome::Success
    }

    /// Process a backlog sequentially, one file end-to-end at a time.
    pub async fn process_backlog(&mut self, files: &[PathBuf]) -> BacklogSummary {
        let started = Instant::now();
        let mut summary = BacklogSummary { total: files.len(), ..Default::default() };

        for file in files {
            match self.process_file(file).await {
                ProcessOutcome::Success => summary.succeeded += 1,
                ProcessOutcome::Skipped => summary.skipped += 1,
                ProcessOutcome::EmptyText => summary.empty += 1,
                ProcessOutcome::Failed(_) => summary.failed += 1,
            }
        }

        if summary.succeeded > 0 {
            self.notifier
                .send(NotifyEvent::BatchComplete {
                    files_processed: summary.succeeded,
                    duration_seconds: started.elapsed().as_secs_f64(),
                })
                .await;
        }
        summary
    }

    /// The default flow embeds the whole document, or the first chunk when
    /// the text exceeds the model budget.
    fn embedding_input(&self, text: &str, file_name: &str) -> Option<String> {
        let budget_chars = self.options.chunk_max_tokens * 4;
        if text.chars().count() <= budget_chars {
            return Some(text.to_string());
        }
        let chunks = chunk_text(text, self.options.chunk_max_tokens, self.options.chunk_overlap_tokens);
        info!(
            file = %file_name,
            chunks = chunks.len(),
            "document exceeds embedding budget, embedding first chunk"
        );
        chunks.into_iter().next()
    }

    async fn notify_error(&self, file_name: &str, file_path: &str, error: &str) {
        self.notifier
            .send(NotifyEvent::ProcessingError {
                file_name: file_name.to_string(),
                file_path: file_path.to_string(),
                error: error.to_string(),
            })
            .await;
    }
}
