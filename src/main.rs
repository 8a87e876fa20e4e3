//! CLI entry point
//!
//! `bdns-sync sync` runs one synchronization pass and exits non-zero on a
//! run-level fatal error so schedulers notice. `status` and `stats` read
//! the job-tracking row and the mirror aggregates. SIGINT closes the pool
//! and exits; in-flight pages are abandoned, the next run re-covers the
//! window.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use bdns_sync::application::SyncService;
use bdns_sync::domain::SyncMode;
use bdns_sync::infrastructure::{
    ConfigManager, ConvocatoriaRepository, DatabaseConnection, RegistryClient, SyncJobRepository,
    logging,
};

#[derive(Parser)]
#[command(name = "bdns-sync", version, about = "Mirror the BDNS grants registry into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a synchronization pass against the registry
    Sync {
        #[arg(long, value_enum, default_value = "incremental")]
        mode: ModeArg,
    },
    /// Show the most recent sync run
    Status,
    /// Show cumulative mirror statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Incremental,
    Full,
    CompleteHistorical,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Incremental => SyncMode::Incremental,
            ModeArg::Full => SyncMode::Full,
            ModeArg::CompleteHistorical => SyncMode::CompleteHistorical,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be up yet if config loading failed.
            error!("fatal error: {e:#}");
            eprintln!("bdns-sync: fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigManager::new()?.load_config().await?;
    logging::init_logging(&config.logging)?;

    let db = DatabaseConnection::new(&config.database.url, config.database.max_connections).await?;
    db.migrate().await?;

    let records = ConvocatoriaRepository::new(db.pool().clone());
    let jobs = SyncJobRepository::new(db.pool().clone());
    let fetcher = Arc::new(RegistryClient::new(&config.registry)?);
    let service = SyncService::new(fetcher, records, jobs, config.registry.clone());

    match cli.command {
        Command::Sync { mode } => {
            let mode = SyncMode::from(mode);
            tokio::select! {
                result = service.start_sync(mode) => {
                    let report = result?;
                    info!(
                        job_id = %report.job_id,
                        pages = report.processed_pages,
                        records = report.processed_records,
                        new = report.new_records,
                        updated = report.updated_records,
                        errors = report.errors.len(),
                        "sync finished"
                    );
                    for e in report.errors.iter().take(5) {
                        warn!("{e}");
                    }
                    db.close().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    // Abandon in-flight pages; the wall-clock-based window
                    // of the next incremental run re-covers them.
                    warn!("interrupted, shutting down");
                    db.close().await;
                }
            }
        }
        Command::Status => {
            match service.latest_job().await? {
                Some(job) => {
                    println!(
                        "{} {} {} pages {}/{} records {} (new {} / updated {})",
                        job.id,
                        job.sync_type,
                        job.status.as_str(),
                        job.processed_pages,
                        job.total_pages,
                        job.processed_records,
                        job.new_records,
                        job.updated_records,
                    );
                    if let Some(message) = job.error_message {
                        println!("errors: {message}");
                    }
                }
                None => println!("no sync run recorded"),
            }
            db.close().await;
        }
        Command::Stats => {
            let stats = service.statistics().await?;
            println!(
                "convocatorias: {} (open: {}), last synced: {}",
                stats.total_convocatorias,
                stats.convocatorias_abiertas,
                stats
                    .last_synced_at
                    .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
            );
            db.close().await;
        }
    }

    Ok(())
}
