use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::SyncError;
use crate::integrations::AttendanceTarget;
use crate::model::{AttendanceSession, CloseReason, EmployeeId, SessionId};
use crate::sync::retry::RetryPolicy;

/// Session writes against the target, each one wrapped in the retry policy
/// and safe to re-issue: a retried create that already landed finds the
/// existing row instead of adding a second one.
#[derive(Clone)]
pub struct TargetWriter {
    target: Arc<dyn AttendanceTarget>,
    retry: RetryPolicy,
}

impl TargetWriter {
    pub fn new(target: Arc<dyn AttendanceTarget>, retry: RetryPolicy) -> Self {
        Self { target, retry }
    }

    pub fn target(&self) -> &dyn AttendanceTarget {
        self.target.as_ref()
    }

    pub async fn current_open(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<AttendanceSession>, SyncError> {
        let target = self.target.as_ref();
        self.retry
            .run("read open session", move || target.open_session(employee_id))
            .await
    }

    pub async fn sessions_near(
        &self,
        employee_id: EmployeeId,
        at: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Vec<AttendanceSession>, SyncError> {
        let target = self.target.as_ref();
        self.retry
            .run("read nearby sessions", move || {
                target.sessions_near(employee_id, at, tolerance)
            })
            .await
    }

    /// Create a session checked in at `ts`, or return the one that already is.
    pub async fn open_session(
        &self,
        employee_id: EmployeeId,
        ts: DateTime<Utc>,
    ) -> Result<SessionId, SyncError> {
        let target = self.target.as_ref();
        self.retry
            .run("open session", move || async move {
                let existing = target.sessions_near(employee_id, ts, Duration::zero()).await?;
                if let Some(session) = existing.iter().find(|s| s.check_in == ts) {
                    debug!(employee_id, session_id = session.id, "Check-in already recorded");
                    return Ok(session.id);
                }
                target.create_check_in(employee_id, ts).await
            })
            .await
    }

    /// Close the employee's open session at `ts`. Succeeds without writing
    /// when a session already ends at `ts`.
    pub async fn close_session(
        &self,
        employee_id: EmployeeId,
        ts: DateTime<Utc>,
    ) -> Result<SessionId, SyncError> {
        let target = self.target.as_ref();
        self.retry
            .run("close session", move || async move {
                if let Some(open) = target.open_session(employee_id).await? {
                    target.write_check_out(open.id, ts, CloseReason::Punch).await?;
                    return Ok(open.id);
                }

                let existing = target.sessions_near(employee_id, ts, Duration::zero()).await?;
                match existing.iter().find(|s| s.check_out == Some(ts)) {
                    Some(session) => {
                        debug!(employee_id, session_id = session.id, "Check-out already recorded");
                        Ok(session.id)
                    }
                    None => Err(SyncError::WriteRejected(format!(
                        "employee {employee_id} has no open session to close at {ts}"
                    ))),
                }
            })
            .await
    }

    /// Close a specific session with the auto-closed marker. Writing the same
    /// check-out twice is harmless.
    pub async fn force_close(
        &self,
        session: &AttendanceSession,
        ts: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let target = self.target.as_ref();
        let session_id = session.id;
        self.retry
            .run("auto-close session", move || {
                target.write_check_out(session_id, ts, CloseReason::AutoClosed)
            })
            .await
    }

    pub async fn reopen(&self, session_id: SessionId) -> Result<(), SyncError> {
        let target = self.target.as_ref();
        self.retry
            .run("reopen session", move || target.reopen(session_id))
            .await
    }

    pub async fn delete(&self, session_id: SessionId) -> Result<(), SyncError> {
        let target = self.target.as_ref();
        self.retry
            .run("delete session", move || target.delete(session_id))
            .await
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}
