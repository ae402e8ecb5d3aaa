use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use punch_sync::config::{Config, DAYS_RANGE, HOURS_RANGE, MINUTES_RANGE};
use punch_sync::db::init_db;
use punch_sync::integrations::biotime::BioTimeClient;
use punch_sync::integrations::odoo::OdooClient;
use punch_sync::sync::{
    CheckpointStore, EngineOptions, FileCheckpointStore, MySqlCheckpointStore, Scheduler,
    SyncEngine,
};

#[derive(Parser)]
#[command(name = "punch-sync", version, about = "Sync BioTime punches into Odoo attendances")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync pass
    Sync,
    /// Sync every N minutes until Ctrl-C
    Daemon {
        #[arg(value_parser = clap::value_parser!(i64).range(MINUTES_RANGE))]
        interval_minutes: Option<i64>,
    },
    /// Check both connections and list unmatched employees
    Test,
    /// Close open attendances older than N hours
    Cleanup {
        #[arg(value_parser = clap::value_parser!(i64).range(HOURS_RANGE))]
        threshold_hours: Option<i64>,
    },
    /// Repair attendances with check-in equal to check-out over the last N days
    Fix {
        #[arg(default_value_t = 7, value_parser = clap::value_parser!(i64).range(DAYS_RANGE))]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    // Rolling daily log, mirrored on stdout
    let file_appender = rolling::daily(&config.log_dir, "punch-sync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking.and(std::io::stdout))
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_target(false)
        .init();

    let scheduler = build_scheduler(&config).await?;

    match cli.command.unwrap_or(Command::Sync) {
        Command::Sync => {
            let report = scheduler.sync_once().await.context("sync failed")?;
            println!("{}", serde_json::to_string_pretty(&report.stats)?);
        }
        Command::Daemon { interval_minutes } => {
            let interval = interval_minutes
                .map(|m| Duration::from_secs(m.unsigned_abs() * 60))
                .unwrap_or_else(|| config.sync_interval());
            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, stopping after the current tick");
                    let _ = stop_tx.send(true);
                }
            });
            let summary = scheduler
                .run_as_daemon(interval, stop_rx)
                .await;
            info!(ticks = summary.ticks(), "Bye");
        }
        Command::Test => {
            let report = scheduler.test_connections().await;
            match &report.source {
                Ok(n) => println!("BioTime: ok, {n} employees"),
                Err(e) => println!("BioTime: FAILED, {e}"),
            }
            match &report.target {
                Ok(n) => println!("Odoo: ok, {n} employees"),
                Err(e) => println!("Odoo: FAILED, {e}"),
            }
            for employee in &report.unmatched {
                println!("  unmatched: {} {}", employee.emp_code, employee.name);
            }
            if !report.healthy() {
                anyhow::bail!("connection test failed");
            }
        }
        Command::Cleanup { threshold_hours } => {
            let threshold = threshold_hours
                .map(chrono::Duration::hours)
                .unwrap_or_else(|| config.stale_threshold());
            let report = scheduler
                .cleanup_stale_sessions(threshold)
                .await
                .context("cleanup failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Fix { days } => {
            let report = scheduler
                .repair_corrupted_sessions(chrono::Duration::days(days))
                .await
                .context("repair failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn build_scheduler(config: &Config) -> anyhow::Result<Scheduler> {
    let source = BioTimeClient::new(&config.biotime, config.http_timeout)
        .context("building BioTime client")?;
    let target =
        OdooClient::new(&config.odoo, config.http_timeout).context("building Odoo client")?;

    let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint_database_url {
        Some(url) => {
            let pool = init_db(url).await.context("connecting to checkpoint database")?;
            info!("Checkpoints stored in MySQL");
            Arc::new(MySqlCheckpointStore::new(pool))
        }
        None => {
            let path = config.data_dir.join("last_sync.json");
            info!(path = %path.display(), "Checkpoints stored on disk");
            Arc::new(FileCheckpointStore::new(path))
        }
    };

    let engine = SyncEngine::new(
        Arc::new(source),
        Arc::new(target),
        checkpoints,
        EngineOptions::from_config(config),
    );
    Ok(Scheduler::new(engine, config.stale_close_after()))
}
