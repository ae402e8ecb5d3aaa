use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{MalformedRecord, PunchResult, SyncStats};

/// Everything one tick did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub tick_id: Uuid,
    pub terminal_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Lower bound used for the fetch
    pub since: DateTime<Utc>,
    pub checkpoint_before: Option<DateTime<Utc>>,
    pub checkpoint_after: Option<DateTime<Utc>>,
    pub stats: SyncStats,
    pub results: Vec<PunchResult>,
    pub malformed: Vec<MalformedRecord>,
}

impl SyncReport {
    pub fn checkpoint_advanced(&self) -> bool {
        self.checkpoint_after != self.checkpoint_before
    }
}

/// Bounded JSON array of past reports.
pub struct RunLog {
    path: PathBuf,
    keep: usize,
    lock: Mutex<()>,
}

impl RunLog {
    pub const DEFAULT_KEEP: usize = 100;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, Self::DEFAULT_KEEP)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            path: path.into(),
            keep: keep.max(1),
            lock: Mutex::new(()),
        }
    }

    /// Append `report`. The run log is informational: errors are logged and
    /// swallowed.
    pub async fn append(&self, report: &SyncReport) {
        if let Err(e) = self.try_append(report).await {
            warn!(path = %self.path.display(), error = %e, "Could not write run log");
        }
    }

    pub async fn entries(&self) -> std::io::Result<Vec<SyncReport>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn try_append(&self, report: &SyncReport) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await.unwrap_or_else(|e| {
            warn!(error = %e, "Run log unreadable, starting a new one");
            Vec::new()
        });
        entries.push(report.clone());
        if entries.len() > self.keep {
            let excess = entries.len() - self.keep;
            entries.drain(..excess);
        }

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(&entries)?;
        tokio::fs::write(&self.path, bytes).await?;
        debug!(entries = entries.len(), "Run log updated");
        Ok(())
    }

    async fn read(&self) -> std::io::Result<Vec<SyncReport>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
