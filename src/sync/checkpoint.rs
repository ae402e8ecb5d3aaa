use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CheckpointError;
use crate::model::PunchResult;

/// Progress marker per terminal. Implementations must never move a
/// checkpoint backwards.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, terminal_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError>;

    async fn advance(&self, terminal_id: &str, ts: DateTime<Utc>) -> Result<(), CheckpointError>;
}

/// Latest timestamp the checkpoint may move to after a batch: every punch at
/// or before it must have a terminal outcome, so it stops strictly before the
/// earliest failed punch. `None` when nothing can be committed.
pub fn safe_advance_point(results: &[PunchResult]) -> Option<DateTime<Utc>> {
    let first_failure = results
        .iter()
        .filter(|r| !r.outcome.is_terminal())
        .map(|r| r.punch.timestamp)
        .min();

    results
        .iter()
        .map(|r| r.punch.timestamp)
        .filter(|ts| first_failure.is_none_or(|failed| *ts < failed))
        .max()
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, terminal_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        Ok(self.inner.lock().await.get(terminal_id).copied())
    }

    async fn advance(&self, terminal_id: &str, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
        let mut map = self.inner.lock().await;
        let entry = map.entry(terminal_id.to_string()).or_insert(ts);
        *entry = (*entry).max(ts);
        Ok(())
    }
}

/// JSON map `{terminal_id: rfc3339}` in the data directory.
pub struct FileCheckpointStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, DateTime<Utc>>, CheckpointError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, terminal_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.get(terminal_id).copied())
    }

    async fn advance(&self, terminal_id: &str, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        if all.get(terminal_id).is_some_and(|current| *current >= ts) {
            return Ok(());
        }
        all.insert(terminal_id.to_string(), ts);

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        // write-then-rename so a crash never leaves half a file behind
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&all)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(terminal_id, checkpoint = %ts, "Checkpoint written");
        Ok(())
    }
}

/// `sync_checkpoints` table, see [`crate::db::init_db`].
pub struct MySqlCheckpointStore {
    pool: MySqlPool,
}

impl MySqlCheckpointStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for MySqlCheckpointStore {
    async fn load(&self, terminal_id: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let row = sqlx::query_as::<_, (DateTime<Utc>,)>(
            "SELECT last_processed FROM sync_checkpoints WHERE terminal_id = ?",
        )
        .bind(terminal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(ts,)| ts))
    }

    async fn advance(&self, terminal_id: &str, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (terminal_id, last_processed)
            VALUES (?, ?)
            ON DUPLICATE KEY UPDATE last_processed = GREATEST(last_processed, VALUES(last_processed))
            "#,
        )
        .bind(terminal_id)
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Punch, SyncOutcome};
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, 0, 0).unwrap()
    }

    fn result(emp: &str, h: u32, outcome: SyncOutcome) -> PunchResult {
        PunchResult::new(Punch::new(emp, at(h), Direction::In), Some(1), outcome)
    }

    #[test]
    fn advances_to_latest_when_nothing_failed() {
        let results = vec![
            result("a", 8, SyncOutcome::CreatedCheckIn),
            result("b", 12, SyncOutcome::SkippedUnmapped),
            result("a", 17, SyncOutcome::CreatedCheckOut),
        ];
        assert_eq!(safe_advance_point(&results), Some(at(17)));
    }

    #[test]
    fn stops_before_the_earliest_failure() {
        let results = vec![
            result("a", 8, SyncOutcome::CreatedCheckIn),
            result("a", 17, SyncOutcome::Failed),
            result("b", 10, SyncOutcome::CreatedCheckIn),
            result("b", 12, SyncOutcome::Failed),
            result("c", 11, SyncOutcome::SkippedDuplicate),
        ];
        assert_eq!(safe_advance_point(&results), Some(at(11)));
    }

    #[test]
    fn nothing_to_commit() {
        assert_eq!(safe_advance_point(&[]), None);
        let results = vec![result("a", 8, SyncOutcome::Failed)];
        assert_eq!(safe_advance_point(&results), None);
    }

    #[tokio::test]
    async fn memory_store_is_monotonic() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load("t1").await.unwrap(), None);

        store.advance("t1", at(12)).await.unwrap();
        store.advance("t1", at(9)).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap(), Some(at(12)));
        assert_eq!(store.load("t2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("last_sync.json");

        let store = FileCheckpointStore::new(&path);
        store.advance("t1", at(9)).await.unwrap();
        store.advance("t1", at(17)).await.unwrap();
        store.advance("t1", at(10)).await.unwrap();
        store.advance("t2", at(8)).await.unwrap();

        let reopened = FileCheckpointStore::new(&path);
        assert_eq!(reopened.load("t1").await.unwrap(), Some(at(17)));
        assert_eq!(reopened.load("t2").await.unwrap(), Some(at(8)));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_sync.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = FileCheckpointStore::new(&path);
        assert!(matches!(store.load("t1").await, Err(CheckpointError::Json(_))));
    }
}
