//! pcat - polaroid catalog sync and enrichment
//!
//! Keeps a JSON catalog of scanned polaroids in step with the harvested
//! source rows, indexes it chronologically, and fills in AI analysis for
//! every record that does not have one yet.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pcat_common::config::{self, TomlConfig};
use pcat_common::events::{CatalogEvent, EventBus, ItemStatus};
use pcat_sync::models::{harvested_row, EnrichmentParameters, SyncParameters};
use pcat_sync::services::{
    catalog_search, directory_scanner, CatalogStore, ChronologicalIndexer, EnrichmentScheduler,
    HttpAnalysisClient, HttpAssetFetcher, SearchQuery, SourceSync,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for pcat
#[derive(Parser, Debug)]
#[command(name = "pcat")]
#[command(about = "Polaroid catalog sync and AI enrichment")]
#[command(version)]
struct Args {
    /// TOML config file (default: $PCAT_CONFIG, then the OS config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root folder relative catalog paths resolve against
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Catalog snapshot file (overrides [catalog].snapshot)
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config file
    Init,

    /// Merge harvested source rows (CSV) into the catalog
    Sync {
        /// CSV file with year,date_title_raw,image_url,thumbnail_url,source_page
        #[arg(long)]
        rows: PathBuf,
    },

    /// Merge image files from local directories into the catalog
    Scan {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },

    /// Recompute chronological positions and display locators
    Index,

    /// Analyze every pending record
    Enrich {
        /// Concurrent analysis workers
        #[arg(long)]
        workers: Option<usize>,

        /// Save the catalog after every K finalized records
        #[arg(long)]
        checkpoint_every: Option<usize>,

        /// Analyze at most N records in this run
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search analyzed records
    Search {
        terms: Vec<String>,

        /// Maximum results printed
        #[arg(long, default_value = "20")]
        max: usize,
    },

    /// Print catalog totals
    Status,
}

/// Resolved settings shared by all commands
struct Settings {
    config_path: PathBuf,
    toml: TomlConfig,
    snapshot: PathBuf,
    assets_dir: PathBuf,
}

impl Settings {
    fn resolve(args: &Args) -> Result<Self> {
        let config_path = config::resolve_config_path(args.config.as_deref())?;
        let toml = config::load_toml_config(&config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?;

        let root = config::resolve_root_folder(
            args.root_folder.as_deref(),
            config::ROOT_FOLDER_ENV_VAR,
            &toml,
        );
        let snapshot = match &args.snapshot {
            Some(path) => path.clone(),
            None => config::resolve_under(&root, &toml.catalog.snapshot),
        };
        let assets_dir = config::resolve_under(&root, &toml.catalog.assets_dir);

        Ok(Self {
            config_path,
            toml,
            snapshot,
            assets_dir,
        })
    }

    fn load_store(&self) -> Result<CatalogStore> {
        CatalogStore::load(&self.snapshot)
            .with_context(|| format!("Failed to load catalog {}", self.snapshot.display()))
    }

    fn indexer(&self) -> ChronologicalIndexer {
        ChronologicalIndexer::new(self.toml.catalog.display_base_url.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::resolve(&args)?;

    init_tracing(&settings.toml)?;
    info!("{}", pcat_sync::build_info());
    info!("Config: {}", settings.config_path.display());
    info!("Catalog: {}", settings.snapshot.display());

    match args.command {
        Command::Init => init_config(&settings.config_path),
        Command::Sync { rows } => sync(&settings, &rows).await,
        Command::Scan { dirs } => scan(&settings, &dirs),
        Command::Index => index(&settings),
        Command::Enrich {
            workers,
            checkpoint_every,
            limit,
        } => enrich(&settings, workers, checkpoint_every, limit).await,
        Command::Search { terms, max } => search(&settings, &terms, max),
        Command::Status => status(&settings),
    }
}

/// `RUST_LOG` wins over `[logging].level`; `[logging].file` replaces stderr
fn init_tracing(toml: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(toml.logging.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    match &toml.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Config file {} already exists, not overwriting", path.display());
    }
    config::write_toml_config(&TomlConfig::default(), path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn sync(settings: &Settings, rows_path: &Path) -> Result<()> {
    let rows = harvested_row::load_rows(rows_path)
        .with_context(|| format!("Failed to read harvested rows {}", rows_path.display()))?;
    let mut store = settings.load_store()?;

    let fetcher = HttpAssetFetcher::new(
        &config::get_user_agent(),
        Duration::from_secs(settings.toml.enrichment.request_timeout_secs.max(1)),
    )?;
    let params = SyncParameters::new(settings.assets_dir.clone(), &settings.toml.catalog);
    let report = SourceSync::new(Arc::new(fetcher), params)
        .sync(&mut store, rows)
        .await;

    settings.indexer().index(&mut store);
    store.save().context("Failed to save catalog")?;

    println!(
        "Sync: {} created ({} without a parsed date), {} updated, {} skipped",
        report.created,
        report.unparsed,
        report.updated,
        report.skipped()
    );
    if report.skipped_fetch_failed > 0 {
        println!(
            "  {} rows could not be downloaded and will be retried on the next sync",
            report.skipped_fetch_failed
        );
    }
    Ok(())
}

fn scan(settings: &Settings, dirs: &[PathBuf]) -> Result<()> {
    let mut store = settings.load_store()?;
    let report = directory_scanner::scan_into(&mut store, dirs)?;

    settings.indexer().index(&mut store);
    store.save().context("Failed to save catalog")?;

    println!(
        "Scan: {} images found, {} created, {} updated",
        report.found, report.created, report.updated
    );
    if !report.unparsed.is_empty() {
        println!("{} filenames could not be parsed:", report.unparsed.len());
        let (shown, rest) = report.unparsed_preview();
        for name in shown {
            println!("  {}", name);
        }
        if rest > 0 {
            println!("  ... and {} more", rest);
        }
    }
    Ok(())
}

fn index(settings: &Settings) -> Result<()> {
    let mut store = settings.load_store()?;
    let report = settings.indexer().index(&mut store);
    store.save().context("Failed to save catalog")?;

    for (year, count) in &report.years {
        println!("{}: {} records", year, count);
    }
    println!("{} records repositioned", report.repositioned);
    Ok(())
}

async fn enrich(
    settings: &Settings,
    workers: Option<usize>,
    checkpoint_every: Option<usize>,
    limit: Option<usize>,
) -> Result<()> {
    let mut store = settings.load_store()?;

    let mut params = EnrichmentParameters::from_config(&settings.toml.enrichment);
    if let Some(workers) = workers {
        params.workers = workers.max(1);
    }
    if let Some(k) = checkpoint_every {
        params.checkpoint_interval = k.max(1);
    }
    params.limit = limit;

    if EnrichmentScheduler::select_candidates(&store, params.limit).is_empty() {
        println!("No records need analysis.");
        return Ok(());
    }

    let api_key = pcat_sync::config::resolve_analysis_api_key(&settings.toml)?;
    let client = HttpAnalysisClient::new(
        api_key,
        settings.toml.analysis.clone(),
        &config::get_user_agent(),
        params.request_timeout,
        pcat_sync::models::parameters::per_minute(settings.toml.enrichment.requests_per_minute),
    )?;

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing in-flight requests");
            ctrl_c_token.cancel();
        }
    });

    let event_bus = EventBus::new(256);
    let printer = tokio::spawn(print_progress(event_bus.subscribe()));

    let scheduler = EnrichmentScheduler::new(Arc::new(client), params).with_event_bus(event_bus);
    let result = scheduler.run(&mut store, cancel_token).await;

    drop(scheduler);
    let _ = printer.await;

    let stats = result.context("Enrichment run aborted")?;
    println!("{}", stats.display_string());
    Ok(())
}

async fn print_progress(mut rx: tokio::sync::broadcast::Receiver<CatalogEvent>) {
    loop {
        match rx.recv().await {
            Ok(CatalogEvent::ItemAnalyzed {
                filename,
                status,
                completed,
                total,
                ..
            }) => {
                let label = match status {
                    ItemStatus::Succeeded => "ok".to_string(),
                    ItemStatus::Failed { reason } => format!("failed ({})", reason),
                    ItemStatus::Deferred => "deferred".to_string(),
                };
                println!("[{}/{}] {} {}", completed, total, filename, label);
            }
            Ok(CatalogEvent::CheckpointSaved { finalized, .. }) => {
                println!("  checkpoint saved ({} finalized)", finalized);
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Progress printer lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn search(settings: &Settings, terms: &[String], max: usize) -> Result<()> {
    let store = settings.load_store()?;
    let query = SearchQuery::parse(&terms.join(" "));
    let hits = catalog_search::search(store.records(), &query);

    println!("{} record(s) found", hits.len());
    for hit in hits.iter().take(max) {
        let record = hit.record;
        println!(
            "{:>4}  {}  {}",
            hit.score,
            record.filename,
            record.display_page_url.as_deref().unwrap_or("-")
        );
        if let Some(pcat_sync::models::Analysis::Success(result)) = &record.ai_analysis {
            if !result.keywords.is_empty() {
                println!("      keywords: {}", result.keywords.join(", "));
            }
        }
    }
    Ok(())
}

fn status(settings: &Settings) -> Result<()> {
    let store = settings.load_store()?;
    let summary = store.summary();

    println!("Catalog: {}", store.path().display());
    println!("  records:  {}", summary.total);
    println!("  analyzed: {}", summary.analyzed);
    println!("  pending:  {}", summary.pending);
    println!("  failed:   {}", summary.failed());
    for (reason, count) in &summary.failed_by_reason {
        println!("    {}: {}", reason, count);
    }
    for (year, count) in &summary.per_year {
        println!("  {}: {}", year, count);
    }
    Ok(())
}
