use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::error::SyncError;
use crate::sync::engine::{ConnectionReport, SyncEngine};
use crate::sync::janitor::{JanitorReport, RepairReport, StaleSessionJanitor};
use crate::sync::report::SyncReport;

/// What happened to one daemon tick.
#[derive(Debug)]
pub enum TickOutcome {
    Completed(SyncReport),
    /// Health check failed, nothing was fetched.
    Skipped(ConnectionReport),
    Failed(SyncError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DaemonSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DaemonSummary {
    pub fn ticks(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

/// Entry point for every operation the binary exposes. Ticks never overlap:
/// the daemon awaits each one before sleeping.
pub struct Scheduler {
    engine: SyncEngine,
    janitor: StaleSessionJanitor,
}

impl Scheduler {
    pub fn new(engine: SyncEngine, close_after: Option<chrono::Duration>) -> Self {
        let janitor = StaleSessionJanitor::new(engine.writer().clone(), close_after);
        Self { engine, janitor }
    }

    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        self.engine.sync_once().await
    }

    pub async fn test_connections(&self) -> ConnectionReport {
        self.engine.test_connections().await
    }

    pub async fn cleanup_stale_sessions(
        &self,
        threshold: chrono::Duration,
    ) -> Result<JanitorReport, SyncError> {
        self.janitor.close_stale_sessions(threshold).await
    }

    pub async fn repair_corrupted_sessions(
        &self,
        window: chrono::Duration,
    ) -> Result<RepairReport, SyncError> {
        self.janitor.repair_corrupted_sessions(window).await
    }

    /// Health check, then a sync pass.
    pub async fn tick(&self) -> TickOutcome {
        let health = self.engine.test_connections().await;
        if !health.healthy() {
            warn!(source = ?health.source, target = ?health.target, "Connections down, tick skipped");
            return TickOutcome::Skipped(health);
        }

        match self.engine.sync_once().await {
            Ok(report) => TickOutcome::Completed(report),
            Err(e) => {
                error!(error = %e, "Sync tick failed, checkpoint unchanged");
                TickOutcome::Failed(e)
            }
        }
    }

    /// Run a tick now and then every `interval` until `stop` turns true (or
    /// its sender goes away). A running tick is never interrupted.
    #[instrument(name = "daemon", skip(self, stop), fields(interval_secs = interval.as_secs()))]
    pub async fn run_as_daemon(
        &self,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> DaemonSummary {
        let mut summary = DaemonSummary::default();
        info!("Daemon started");

        loop {
            if *stop.borrow() {
                break;
            }

            match self.tick().await {
                TickOutcome::Completed(_) => summary.completed += 1,
                TickOutcome::Skipped(_) => summary.skipped += 1,
                TickOutcome::Failed(_) => summary.failed += 1,
            }

            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
        }

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Daemon stopped"
        );
        summary
    }
}
