//! heatwatch CLI
//!
//! Runs the live watchers or backfills a single racer into the local store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use heatwatch::{
    error::{AppError, Result},
    models::Config,
    pipeline::{self, BackfillRequest},
    services::{FetchOrchestrator, RacerDataAssembler},
    storage::{LocalStore, RaceStore},
    utils::{HttpTransport, Transport},
};
use tokio_util::sync::CancellationToken;

/// heatwatch - kart race timing ingestion
#[derive(Parser, Debug)]
#[command(name = "heatwatch", version, about = "Kart race timing ingestion")]
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
    /// Watch every venue's live scoreboard until Ctrl-C
    Watch,

    /// Fetch one racer's history from every venue and store it
    AddRacer {
        /// Vendor racer id
        racer_id: u64,

        /// Flag the racer as fast
        #[arg(long)]
        fast: bool,

        /// Follow the racer
        #[arg(long)]
        follow: bool,

        /// Only keep heats after this date (YYYY-MM-DD, default Jan 1 last year)
        #[arg(long)]
        since: Option<NaiveDate>,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn build_orchestrator(config: &Config) -> Result<Arc<FetchOrchestrator>> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.fetch)?);
    let registry = Arc::new(config.registry()?);
    Ok(Arc::new(FetchOrchestrator::new(
        transport,
        config.fetch.clone(),
        registry,
    )))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);

    match cli.command {
        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            let registry = config.registry()?;
            for venue in registry.iter() {
                log::info!(
                    "  {} ({}): {} track(s), {}",
                    venue.name,
                    config.fetch.base_url(&venue.subdomain),
                    venue.tracks,
                    venue.timezone
                );
            }
            log::info!("Config OK: {} venues", registry.len());
        }

        Command::Watch => {
            config.validate()?;
            let orchestrator = build_orchestrator(&config)?;
            let store: Arc<dyn RaceStore> = Arc::new(LocalStore::open(&config.storage.path).await?);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Interrupt received, stopping watchers...");
                }
                on_signal.cancel();
            });

            pipeline::run_watchers(&config.watcher, orchestrator, store, cancel).await?;
        }

        Command::AddRacer {
            racer_id,
            fast,
            follow,
            since,
        } => {
            config.validate()?;
            let mut request = BackfillRequest::new(racer_id);
            request.is_fast = fast;
            request.follow = follow;
            if let Some(date) = since {
                request.since = Utc.from_utc_datetime(
                    &date
                        .and_hms_opt(0, 0, 0)
                        .ok_or_else(|| AppError::validation("invalid --since date"))?,
                );
            }

            let assembler = RacerDataAssembler::new(build_orchestrator(&config)?);
            let store = LocalStore::open(&config.storage.path).await?;
            let summary = pipeline::run_backfill(&request, &assembler, &store).await?;

            match summary.name {
                Some(name) => log::info!(
                    "Added {} ({}): {} heats, {} sessions",
                    name,
                    summary.racer_id,
                    summary.heats,
                    summary.sessions
                ),
                None => log::warn!("Racer {} has no history at any venue", summary.racer_id),
            }
        }
    }

    Ok(())
}
