//! Tutorly server: runs migrations, extends the occurrence horizon once
//! a day and drives the periodic compliance scans.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use surrealdb::engine::remote::ws::Client;
use tracing_subscriber::EnvFilter;
use tutorly_core::clock::SystemClock;
use tutorly_db::{DbManager, SurrealNotificationSink, SurrealStore};
use tutorly_scheduling::{ScanReport, SchedulingEngine};

use crate::config::ServerConfig;

type Engine = SchedulingEngine<SurrealStore<Client>, SurrealNotificationSink<Client>>;

#[derive(Parser)]
#[command(name = "tutorly")]
#[command(about = "Tutoring session scheduling and lifecycle engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TUTORLY_CONFIG", default_value = "tutorly.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Generate occurrences for every active template
    Generate {
        /// Days ahead of today to fill (defaults to the configured horizon)
        #[arg(long)]
        horizon_days: Option<u32>,
    },
    /// Run the logging and invoice compliance scans once
    Scan,
    /// Keep the horizon filled and run scans until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tutorly=info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let manager = DbManager::connect(&config.db)
        .await
        .context("connecting to SurrealDB")?;
    let db = manager.client().clone();
    tutorly_db::run_migrations(&db).await?;

    if matches!(cli.command, Command::Migrate) {
        tracing::info!("Migrations complete");
        return Ok(());
    }

    let engine: Engine = SchedulingEngine::new(
        SurrealStore::new(db.clone()),
        SurrealNotificationSink::new(db),
        Arc::new(SystemClock),
        config.scheduling.clone(),
    )?;

    match cli.command {
        Command::Migrate => {}
        Command::Generate { horizon_days } => {
            let days = horizon_days.unwrap_or(config.scheduling.default_horizon_days);
            extend_horizon(&engine, days).await?;
        }
        Command::Scan => {
            let report = engine.run_scans().await?;
            log_report(&report);
        }
        Command::Serve => serve(&engine, &config).await?,
    }

    Ok(())
}

async fn extend_horizon(engine: &Engine, days: u32) -> anyhow::Result<()> {
    let horizon_end = engine.today() + chrono::Duration::days(i64::from(days));
    let created = engine.extend_all_active(horizon_end).await?;
    tracing::info!(%horizon_end, created = created.len(), "Horizon extended");
    Ok(())
}

fn log_report(report: &ScanReport) {
    tracing::info!(
        logging_alerts = report.logging.as_ref().map(Vec::len),
        invoice_alerts = report.invoice.as_ref().map(Vec::len),
        "Scan pass finished"
    );
}

async fn serve(engine: &Engine, config: &ServerConfig) -> anyhow::Result<()> {
    let interval_secs = config.scan_interval_secs.max(1);
    let scan_interval = chrono::Duration::seconds(i64::try_from(interval_secs)?);
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

    tracing::info!(interval_secs, "Starting scheduler loop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.extend_horizon_if_due().await {
                    Ok(Some(created)) => tracing::info!(created = created.len(), "Horizon extended"),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Horizon extension failed"),
                }
                match engine.run_due_scans(scan_interval).await {
                    Ok(report) => log_report(&report),
                    Err(e) => tracing::warn!(error = %e, "Scan pass failed"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for shutdown signal")?;
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    tracing::info!("Tutorly server stopped.");
    Ok(())
}
