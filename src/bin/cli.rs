//! Watcher CLI
//!
//! Runs the configured sources once and exits; scheduling is left to cron
//! or a CI workflow.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use watcher::{
    error::{AppError, Result},
    models::{Config, SourceDescriptor},
    pipeline::IngestionEngine,
    storage::{LocalStorage, RecordStore},
};

/// Watcher - incremental ingestion for government publication portals
#[derive(Parser, Debug)]
#[command(
    name = "watcher",
    version,
    about = "Poll publication portals and persist only new records"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch all (or selected) sources and persist new records
    Run {
        /// Only run these source ids
        #[arg(short, long)]
        source: Vec<String>,
    },

    /// Validate the configuration file
    Validate,

    /// Show master store and last delta per source
    Info,

    /// Rewrite master stores whose header differs from the configured columns
    Migrate {
        /// Only migrate these source ids
        #[arg(short, long)]
        source: Vec<String>,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Resolve `--source` filters against the configuration.
fn select_sources(config: &Config, ids: &[String]) -> Result<Vec<SourceDescriptor>> {
    if ids.is_empty() {
        return Ok(config.sources.clone());
    }
    ids.iter()
        .map(|id| {
            config
                .source(id)
                .cloned()
                .ok_or_else(|| AppError::config(format!("unknown source '{id}'")))
        })
        .collect()
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(&cli.config).inspect_err(|e| {
        log::error!("Could not load {}: {}", cli.config.display(), e)
    })?;
    log::info!("Loaded configuration from {}", cli.config.display());

    let storage = LocalStorage::new(&config.storage.data_dir);

    match cli.command {
        Command::Run { source } => {
            config.validate()?;
            let sources = select_sources(&config, &source)?;

            let engine = IngestionEngine::from_config(&config)?;
            let batch = engine.run_all(&sources).await;
            batch.log_summary();

            for report in &batch.sources {
                println!("{report}");
            }

            if !batch.persistence_ok() {
                let failed: Vec<&str> = batch
                    .sources
                    .iter()
                    .filter(|r| r.persistence_failed())
                    .map(|r| r.source_id.as_str())
                    .collect();
                return Err(AppError::persistence(
                    &config.storage.data_dir,
                    format!("could not persist: {}", failed.join(", ")),
                ));
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            watcher::extract::ExtractorRegistry::from_config(&config)?;
            log::info!(
                "✓ Config OK ({} sources, extractor rules compiled)",
                config.sources.len()
            );
        }

        Command::Info => {
            log::info!("Data directory: {}", storage.root_dir().display());

            for source in &config.sources {
                let rows = storage.load_entries(source).await?.len();
                let migrate = if storage.needs_migration(source).await? {
                    " (header differs, run `migrate`)"
                } else {
                    ""
                };
                let last = match storage.load_delta(source).await? {
                    Some(delta) => format!(
                        "last run {} {:?}, {} new",
                        delta.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        delta.status,
                        delta.count
                    ),
                    None => "never run".to_string(),
                };
                println!("{}: {} stored{}; {}", source.id, rows, migrate, last);
            }
        }

        Command::Migrate { source } => {
            for source in select_sources(&config, &source)? {
                if !storage.needs_migration(&source).await? {
                    log::info!("[{}] store is up to date", source.id);
                    continue;
                }
                let entries = storage.load_entries(&source).await?;
                storage.rewrite(&source, &entries).await?;
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
