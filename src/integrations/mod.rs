//! External systems the engine talks to.
//!
//! The sync code only sees the two traits below; `biotime` and `odoo` are the
//! production implementations, tests plug in in-memory ones.

pub mod biotime;
pub mod odoo;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::SyncError;
use crate::model::{
    AttendanceSession, CloseReason, EmployeeId, PunchBatch, SessionId, TargetEmployee,
    TerminalEmployee,
};

/// Read-only access to the time-and-attendance terminal.
#[async_trait]
pub trait PunchSource: Send + Sync {
    /// Punches at or after `since`, oldest first. Overlap with a previous
    /// fetch is allowed.
    async fn fetch_punches(&self, since: DateTime<Utc>) -> Result<PunchBatch, SyncError>;

    async fn employees(&self) -> Result<Vec<TerminalEmployee>, SyncError>;
}

/// The HR system holding attendance sessions.
#[async_trait]
pub trait AttendanceTarget: Send + Sync {
    async fn employees(&self) -> Result<Vec<TargetEmployee>, SyncError>;

    /// Most recent open session of the employee.
    async fn open_session(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<AttendanceSession>, SyncError>;

    /// Sessions of the employee with a check-in or check-out within
    /// `tolerance` of `at`.
    async fn sessions_near(
        &self,
        employee_id: EmployeeId,
        at: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Vec<AttendanceSession>, SyncError>;

    /// All open sessions, oldest check-in first.
    async fn open_sessions(&self, limit: usize) -> Result<Vec<AttendanceSession>, SyncError>;

    async fn sessions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttendanceSession>, SyncError>;

    async fn create_check_in(
        &self,
        employee_id: EmployeeId,
        check_in: DateTime<Utc>,
    ) -> Result<SessionId, SyncError>;

    async fn write_check_out(
        &self,
        session_id: SessionId,
        check_out: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<(), SyncError>;

    /// Clear the check-out of a session.
    async fn reopen(&self, session_id: SessionId) -> Result<(), SyncError>;

    async fn delete(&self, session_id: SessionId) -> Result<(), SyncError>;
}

/// Map a transport error to the retryable variant for its side.
pub(crate) fn transport_error(
    side: Side,
    context: &str,
    err: reqwest::Error,
) -> SyncError {
    let message = format!("{context}: {err}");
    match side {
        Side::Source => SyncError::SourceUnavailable(message),
        Side::Target => SyncError::WriteUnavailable(message),
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum Side {
    Source,
    Target,
}
