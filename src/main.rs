//! # Scandex CLI (`sdx`)
//!
//! The `sdx` binary is the interface to the ingestion pipeline: a
//! long-running watcher, a one-shot backlog scan, index search, and
//! administrative access to the processed-files ledger.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sdx run` | Process the backlog, then watch for new files |
//! | `sdx scan` | Process the existing backlog once and exit |
//! | `sdx search "<query>"` | Search indexed documents |
//! | `sdx state count\|list\|remove\|clear` | Inspect or edit the ledger |
//! | `sdx stats` | Ledger and index counters |
//! | `sdx health` | Per-component readiness table |
//!
//! All commands accept `--config` pointing to a TOML file; service keys
//! come from `SCANDEX_OCR_KEY`, `SCANDEX_EMBEDDING_KEY`, and
//! `SCANDEX_SEARCH_KEY`. Configuration validation failures exit with
//! status 1.

use anyhow::Result;
use clap::{Parser, Subcommand};
use scandex::config::{self, Config, Secrets};
use scandex::embedding::{AzureOpenAiEmbedder, Embedder};
use scandex::health;
use scandex::indexer::{AzureSearchClient, SearchIndex, SearchRequest};
use scandex::notifier::WebhookNotifier;
use scandex::ocr::DocIntelligenceClient;
use scandex::pipeline::{Pipeline, PipelineOptions};
use scandex::state::StateLedger;
use scandex::watcher::{scan_backlog, FileWatcher};
use std::path::PathBuf;
use tracing::{error, info};

/// Scandex — watched-folder OCR ingestion for a personal second brain.
#[derive(Parser)]
#[command(
    name = "sdx",
    about = "Scandex — watch a folder of scans, OCR them, and index them for search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Process the backlog, then watch the folder until interrupted.
    Run,

    /// Process the existing backlog once and exit.
    Scan {
        /// Show what would be processed without touching any service.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed documents.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` or `semantic` (adds a query vector).
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        top: usize,

        /// OData filter expression (e.g. `category eq 'work'`).
        #[arg(long)]
        filter: Option<String>,
    },

    /// Inspect or edit the processed-files ledger.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Ledger and index counters.
    Stats,

    /// Per-component readiness table.
    Health,
}

/// Ledger administration subcommands.
#[derive(Subcommand)]
enum StateAction {
    /// Number of processed files.
    Count,
    /// All processed identities, sorted.
    List,
    /// Forget one file so the next scan reprocesses it.
    Remove {
        /// Path (raw or normalized) to forget.
        path: String,
    },
    /// Forget everything the ledger knows.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics on stderr so stdout stays parseable for scripts.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SCANDEX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    let secrets = Secrets::from_env();

    match cli.command {
        Commands::Run => run(&config, &secrets).await,
        Commands::Scan { dry_run } => scan(&config, &secrets, dry_run).await,
        Commands::Search { query, mode, top, filter } => {
            search(&config, &secrets, &query, &mode, top, filter).await
        }
        Commands::State { action } => state_admin(&config, action).await,
        Commands::Stats => stats(&config, &secrets).await,
        Commands::Health => {
            print_health(&config, &secrets);
            Ok(())
        }
    }
}

fn build_embedder(config: &Config, secrets: &Secrets) -> Result<AzureOpenAiEmbedder> {
    Ok(AzureOpenAiEmbedder::new(
        &config.embedding,
        secrets.embedding_key.clone().unwrap_or_default(),
        config.retry.policy(),
    )?)
}

fn build_indexer(config: &Config, secrets: &Secrets, dims: usize) -> Result<AzureSearchClient> {
    Ok(AzureSearchClient::new(
        &config.index,
        secrets.search_key.clone().unwrap_or_default(),
        dims,
        config.retry.policy(),
    )?)
}

/// Wire up the full pipeline: ledger, clients, notifier.
fn build_pipeline(config: &Config, secrets: &Secrets) -> Result<Pipeline> {
    let ledger = StateLedger::load(&config.state.path, config.retry.policy());
    let extractor = DocIntelligenceClient::new(
        &config.ocr,
        secrets.ocr_key.clone().unwrap_or_default(),
        config.retry.policy(),
    )?;
    let embedder = build_embedder(config, secrets)?;
    let indexer = build_indexer(config, secrets, embedder.dims())?;
    let notifier = WebhookNotifier::new(&config.notify)?;
    if notifier.enabled() {
        info!("webhook notifications enabled");
    }

    Ok(Pipeline::new(
        ledger,
        Box::new(extractor),
        Box::new(embedder),
        Box::new(indexer),
        Box::new(notifier),
        PipelineOptions::from_config(config),
    ))
}

async fn scan(config: &Config, secrets: &Secrets, dry_run: bool) -> Result<()> {
    config.validate_services(secrets)?;

    if dry_run {
        let ledger = StateLedger::load(&config.state.path, config.retry.policy());
        let backlog = scan_backlog(&config.watch, &ledger)?;
        println!("scan (dry-run)");
        println!("  unprocessed files: {}", backlog.len());
        for path in &backlog {
            println!("  {}", path.display());
        }
        return Ok(());
    }

    let mut pipeline = build_pipeline(config, secrets)?;
    ensure_index(config, secrets).await?;

    let backlog = scan_backlog(&config.watch, pipeline.ledger())?;
    let summary = pipeline.process_backlog(&backlog).await;
    print_summary(&summary);
    Ok(())
}

async fn run(config: &Config, secrets: &Secrets) -> Result<()> {
    config.validate_services(secrets)?;

    let mut pipeline = build_pipeline(config, secrets)?;
    ensure_index(config, secrets).await?;

    // Startup backlog first, then the watcher takes over.
    let backlog = scan_backlog(&config.watch, pipeline.ledger())?;
    if !backlog.is_empty() {
        info!(count = backlog.len(), "found unprocessed files");
        let summary = pipeline.process_backlog(&backlog).await;
        print_summary(&summary);
    }

    let mut watcher = FileWatcher::start(&config.watch)?;
    println!(
        "scandex running ({} mode), watching {} — press Ctrl+C to stop",
        watcher.mode(),
        config.watch.root.display()
    );

    let settle = config.settle_delay();
    let mut processed = 0u64;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            detected = watcher.next() => {
                match detected {
                    Some(path) => {
                        // Let the file finish landing before reading it.
                        tokio::time::sleep(settle).await;
                        if pipeline.process_file(&path).await == scandex::pipeline::ProcessOutcome::Success {
                            processed += 1;
                        }
                    }
                    None => {
                        error!("watcher channel closed unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    println!("shutting down");
    println!("  files processed this session: {}", processed);
    println!("  ledger total: {}", pipeline.ledger().processed_count());
    println!("ok");
    Ok(())
}

async fn ensure_index(config: &Config, secrets: &Secrets) -> Result<()> {
    let embedder = build_embedder(config, secrets)?;
    let indexer = build_indexer(config, secrets, embedder.dims())?;
    indexer
        .ensure_index()
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize search index: {}", e))
}

async fn search(
    config: &Config,
    secrets: &Secrets,
    query: &str,
    mode: &str,
    top: usize,
    filter: Option<String>,
) -> Result<()> {
    config.validate_services(secrets)?;

    let embedder = build_embedder(config, secrets)?;
    let indexer = build_indexer(config, secrets, embedder.dims())?;

    let vector = match mode {
        "semantic" => Some(embedder.embed(query).await?),
        "keyword" => None,
        other => anyhow::bail!("unknown search mode: '{}'. Must be keyword or semantic.", other),
    };

    let hits = indexer
        .search(&SearchRequest { query: query.to_string(), vector, top, filter })
        .await?;

    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {} (score {:.3})", i + 1, hit.title, hit.score);
        println!("   {} [{} / {}]", hit.file_path, hit.category, hit.source);
        if !hit.snippet.is_empty() {
            println!("   {}", hit.snippet.replace('\n', " "));
        }
    }
    Ok(())
}

async fn state_admin(config: &Config, action: StateAction) -> Result<()> {
    let mut ledger = StateLedger::load(&config.state.path, config.retry.policy());

    match action {
        StateAction::Count => {
            println!("{}", ledger.processed_count());
        }
        StateAction::List => {
            for identity in ledger.identities() {
                println!("{}", identity);
            }
        }
        StateAction::Remove { path } => {
            if !ledger.remove_processed(&path).await {
                anyhow::bail!("failed to persist ledger after remove");
            }
            println!("removed: {}", path);
        }
        StateAction::Clear => {
            let count = ledger.processed_count();
            if !ledger.clear_processed().await {
                anyhow::bail!("failed to persist ledger after clear");
            }
            println!("cleared {} entries", count);
        }
    }
    Ok(())
}

async fn stats(config: &Config, secrets: &Secrets) -> Result<()> {
    config.validate_services(secrets)?;

    let ledger = StateLedger::load(&config.state.path, config.retry.policy());
    let embedder = build_embedder(config, secrets)?;
    let indexer = build_indexer(config, secrets, embedder.dims())?;
    let index_count = indexer.document_count().await?;

    println!("Scandex — Stats");
    println!("===============");
    println!();
    println!("  Ledger:            {}", config.state.path.display());
    println!("  Processed files:   {}", ledger.processed_count());
    println!("  Lifetime marked:   {}", ledger.statistics().lifetime_marked);
    println!("  Lifetime removed:  {}", ledger.statistics().lifetime_removed);
    println!();
    println!("  Index:             {}", config.index.name);
    println!("  Documents:         {}", index_count);
    println!("  Embedding dims:    {}", embedder.dims());
    Ok(())
}

fn print_health(config: &Config, secrets: &Secrets) {
    println!("{:<12} {:<10} DETAIL", "COMPONENT", "HEALTHY");
    for result in health::run_health_checks(config, secrets) {
        println!(
            "{:<12} {:<10} {}",
            result.component,
            result.healthy,
            result.detail.unwrap_or_default()
        );
    }
}

fn print_summary(summary: &scandex::pipeline::BacklogSummary) {
    println!("scan complete");
    println!("  total:     {}", summary.total);
    println!("  succeeded: {}", summary.succeeded);
    println!("  skipped:   {}", summary.skipped);
    println!("  empty:     {}", summary.empty);
    println!("  failed:    {}", summary.failed);
    println!("ok");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
