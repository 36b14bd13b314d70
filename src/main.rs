// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SnapSort: AI image categorizer
//!
//! Command-line front end: scan, sort, cache, history and config commands.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use snapsort::apply::{ApplyAction, ApplyReport};
use snapsort::classifier::{ClassifierClient, GeminiBackend};
use snapsort::config::AppConfig;
use snapsort::db::{Database, CACHE_SLOT};
use snapsort::entry::{ClassificationMode, EntryStatus};
use snapsort::history::{undo_record, History};
use snapsort::persist::load_cache;
use snapsort::progress::{CancelFlag, ProgressSnapshot, StatusEvent};
use snapsort::session::{RunSummary, Session};
use snapsort::storage::{LocalStorage, Storage};
use snapsort::{Result, SnapsortError};

/// SnapSort CLI - AI image categorizer
#[derive(Parser, Debug)]
#[command(name = "snapsort")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Sort images into category folders with a vision model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the images a sort would consider
    Scan {
        /// Directory to scan
        dir: PathBuf,
    },

    /// Categorize images and place them into category folders
    Sort {
        /// Directory to sort
        dir: PathBuf,

        /// Fixed category list (comma separated)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,

        /// Let the model choose categories (overrides config and --categories)
        #[arg(long, conflicts_with = "categories")]
        auto: bool,

        /// Parallel classifier requests (1-10)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Copy or move files into the output folder
        #[arg(long)]
        action: Option<ApplyAction>,

        /// Categorize only; leave files where they are
        #[arg(long)]
        no_apply: bool,

        /// Gemini API key
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Result cache operations
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// History and undo operations
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Drop every cached result
    Clear,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent apply operations
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Undo recent apply operations
    Undo {
        /// Number of operations to undo
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Dry run (show what would be undone)
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Scan { dir } => run_scan(&config, &dir, json).await,
        Commands::Sort {
            dir,
            categories,
            auto,
            concurrency,
            action,
            no_apply,
            api_key,
        } => {
            let mut config = config;
            if auto {
                config.categories.auto = true;
            } else if !categories.is_empty() {
                config.categories.auto = false;
                config.categories.names = categories;
            }
            if let Some(concurrency) = concurrency {
                config.pipeline.concurrency = concurrency;
            }
            if let Some(action) = action {
                config.output.action = action;
            }
            run_sort(config, dir, api_key, no_apply, json, cli.quiet).await
        }
        Commands::Cache { action } => run_cache_command(&config, action, json),
        Commands::History { action } => run_history_command(&config, action, json).await,
        Commands::Config { action } => run_config_command(config, action, &cli.config),
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    config
        .validate()
        .map_err(|problems| SnapsortError::Config(problems.join("; ")))
}

/// List discovered images
async fn run_scan(config: &AppConfig, dir: &Path, json: bool) -> Result<()> {
    let files = LocalStorage::new().scan(dir, &config.output.folder_name).await?;

    if json {
        let output: Vec<serde_json::Value> = files
            .iter()
            .map(|f| {
                serde_json::json!({
                    "path": f.path.to_string_lossy(),
                    "relative_path": f.relative_path,
                    "size": f.size,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for file in &files {
            println!("{:>10}  {}", file.size, file.relative_path);
        }
        println!("\nFound {} images", files.len());
    }

    Ok(())
}

/// Set `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancelFlag, stopping: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, {}", stopping),
            _ = terminate => info!("Received SIGTERM, {}", stopping),
        }

        cancel.cancel();
    })
}

/// Print one line per finished image until the session is dropped
fn spawn_reporter(
    mut events: broadcast::Receiver<StatusEvent>,
    snapshots: watch::Receiver<ProgressSnapshot>,
    root: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Progress reporter skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let shown = event.path.strip_prefix(&root).unwrap_or(&event.path).display().to_string();
            let percent = snapshots.borrow().percent();
            match event.status {
                EntryStatus::Done => println!(
                    "[{:>3}%] {} -> {}",
                    percent,
                    shown,
                    event.detail.unwrap_or_default()
                ),
                EntryStatus::Error => println!(
                    "[{:>3}%] {} failed: {}",
                    percent,
                    shown,
                    event.detail.unwrap_or_default()
                ),
                _ => {}
            }
        }
    })
}

/// Scan, categorize and apply
async fn run_sort(
    config: AppConfig,
    dir: PathBuf,
    api_key: Option<String>,
    no_apply: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    check_config(&config)?;

    let api_key = api_key.ok_or_else(|| {
        SnapsortError::Config("No API key; pass --api-key or set GEMINI_API_KEY".to_string())
    })?;

    let backend = GeminiBackend::new(
        &config.classifier.url,
        &config.classifier.model,
        &api_key,
        Duration::from_secs(config.classifier.timeout_secs),
    )?;
    let classifier = ClassifierClient::with_retry(backend, config.retry_policy());

    let db = Database::open(&config.cache.database)?;
    info!("Cache database: {}", config.cache.database);

    let mut session = Session::new(
        dir.clone(),
        Arc::new(LocalStorage::new()),
        Arc::new(classifier),
        Arc::new(db),
        config.session_settings(),
    );

    if session.scan().await? == 0 {
        println!("No images found in {}", dir.display());
        return session.close().await;
    }

    let options = config.run_options();
    match &options.mode {
        ClassificationMode::Auto => info!("Categories: chosen by {}", config.classifier.model),
        ClassificationMode::FixedList(names) => info!("Categories: {}", names.join(", ")),
    }

    let signals = spawn_signal_handler(
        session.progress().cancel_flag(),
        "stopping after in-flight images...",
    );
    let reporter = (!json && !quiet).then(|| {
        let progress = session.progress();
        spawn_reporter(progress.subscribe(), progress.watch(), dir.clone())
    });

    let summary = session.run(&options).await;
    signals.abort();
    let _ = signals.await;

    if session.progress().is_cancelled() {
        warn!(
            "Run was cancelled; {} images categorized before the stop",
            summary.categorized
        );
    }

    let report = if no_apply {
        None
    } else {
        // Tokio keeps the signal handlers installed, so apply needs its own listener
        let stop = CancelFlag::new();
        let signals = spawn_signal_handler(stop.clone(), "stopping after the current file...");
        let report = session.apply_until(config.output.action, &stop).await;
        signals.abort();
        let _ = signals.await;
        Some(report)
    };

    session.close().await?;
    if let Some(reporter) = reporter {
        if let Err(e) = reporter.await {
            debug!("Progress reporter ended abnormally: {}", e);
        }
    }

    if json {
        let output = serde_json::json!({
            "summary": summary,
            "apply": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&summary, report.as_ref(), &config, &dir);
    }

    Ok(())
}

fn print_summary(summary: &RunSummary, report: Option<&ApplyReport>, config: &AppConfig, dir: &Path) {
    println!(
        "\nCategorized {} of {} images ({} from cache, {} failed)",
        summary.categorized, summary.queued, summary.cache_hits, summary.errored
    );
    if summary.cancelled + summary.not_started > 0 {
        println!(
            "Cancelled: {} images left pending; run sort again to continue",
            summary.cancelled + summary.not_started
        );
    }
    for (category, count) in &summary.categories {
        println!("  {:<20} {}", category, count);
    }

    if let Some(report) = report {
        let verb = match config.output.action {
            ApplyAction::Copy => "Copied",
            ApplyAction::Move => "Moved",
        };
        println!(
            "\n{} {} images into {}",
            verb,
            report.applied,
            dir.join(&config.output.folder_name).display()
        );
        if report.skipped > 0 {
            println!("  {} already in place", report.skipped);
        }
        if report.remaining > 0 {
            println!("  Stopped: {} categorized images left where they are", report.remaining);
        }
        for failure in &report.failed {
            println!("  Failed: {}: {}", failure.path.display(), failure.error);
        }
    }
}

/// Run cache commands
fn run_cache_command(config: &AppConfig, action: CacheCommands, json: bool) -> Result<()> {
    let db = Database::open(&config.cache.database)?;

    match action {
        CacheCommands::Stats => {
            let info = db.slot_info(CACHE_SLOT)?;
            let entries = load_cache(&db, config.cache.max_entries).len();

            if json {
                let output = serde_json::json!({
                    "database": config.cache.database,
                    "entries": entries,
                    "capacity": config.cache.max_entries,
                    "slot": info,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Result cache ({}):", config.cache.database);
                println!("  Entries: {} / {}", entries, config.cache.max_entries);
                match info {
                    Some(info) => {
                        println!("  Size: {} bytes", info.bytes);
                        println!("  Updated: {}", info.updated_at.format("%Y-%m-%d %H:%M:%S"));
                    }
                    None => println!("  Never written"),
                }
            }
        }
        CacheCommands::Clear => {
            if db.delete_slot(CACHE_SLOT)? {
                db.vacuum()?;
                println!("Result cache cleared");
            } else {
                println!("Result cache is already empty");
            }
        }
    }

    Ok(())
}

/// Run history commands
async fn run_history_command(config: &AppConfig, action: HistoryCommands, json: bool) -> Result<()> {
    let history = History::new(PathBuf::from(&config.history.path));

    match action {
        HistoryCommands::List { count } => {
            let records = history.get_recent(count)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }

            println!("Recent history ({} entries):", records.len());
            for record in records {
                let status = if record.undone { "[UNDONE]" } else { "" };
                println!(
                    "  {} {} {} -> {} {}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.action,
                    record.source.display(),
                    record.destination.display(),
                    status
                );
            }
        }
        HistoryCommands::Undo { count, dry_run } => {
            let to_undo: Vec<_> = history.get_undoable()?.into_iter().take(count).collect();

            if to_undo.is_empty() {
                println!("Nothing to undo");
                return Ok(());
            }

            let storage = LocalStorage::new();
            for record in to_undo {
                if !record.destination.exists() {
                    warn!("File no longer exists: {}", record.destination.display());
                    continue;
                }

                if dry_run {
                    println!(
                        "Would undo {}: {} -> {}",
                        record.action,
                        record.destination.display(),
                        record.source.display()
                    );
                    continue;
                }

                match undo_record(&storage, &record).await {
                    Ok(()) => {
                        history.mark_undone(&record.id)?;
                        println!("Undone: {}", record.destination.display());
                    }
                    Err(e) => eprintln!("Cannot undo {}: {}", record.destination.display(), e),
                }
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            check_config(&config)?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Model: {}", config.classifier.model);
            println!("  Concurrency: {}", config.pipeline.concurrency);
            println!("  Output: {} ({})", config.output.folder_name, config.output.action);
            println!("  Cache: {}", config.cache.database);
        }
    }

    Ok(())
}
