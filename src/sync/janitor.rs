use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::SyncError;
use crate::model::{AttendanceSession, EmployeeId, SessionId};
use crate::sync::writer::TargetWriter;

/// Upper bound on open sessions examined per cleanup run.
const OPEN_SESSION_SCAN_LIMIT: usize = 500;

#[derive(Debug, Default, Clone, Serialize)]
pub struct JanitorReport {
    pub scanned: usize,
    pub closed: usize,
    pub skipped_recent: usize,
    pub failures: Vec<SessionFailure>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RepairReport {
    pub scanned: usize,
    pub corrupted: usize,
    pub reopened: usize,
    pub deleted: usize,
    pub left_closed: usize,
    pub failures: Vec<SessionFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionFailure {
    pub session_id: SessionId,
    pub error: String,
}

/// Housekeeping on the target's attendance table, independent of punches.
pub struct StaleSessionJanitor {
    writer: TargetWriter,
    /// Fixed session length for auto-closed sessions; the threshold when unset
    close_after: Option<Duration>,
}

impl StaleSessionJanitor {
    pub fn new(writer: TargetWriter, close_after: Option<Duration>) -> Self {
        Self {
            writer,
            close_after,
        }
    }

    pub async fn close_stale_sessions(&self, threshold: Duration) -> Result<JanitorReport, SyncError> {
        self.close_stale_sessions_at(threshold, Utc::now()).await
    }

    /// Close every open session whose check-in is older than
    /// `now - threshold`. Only listing the open sessions can fail the call;
    /// each close is reported on its own. Check-outs never land after `now`.
    #[instrument(
        name = "close_stale_sessions",
        skip(self, threshold, now),
        fields(threshold_hours = threshold.num_hours())
    )]
    pub async fn close_stale_sessions_at(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<JanitorReport, SyncError> {
        let close_after = self.close_after.unwrap_or(threshold);
        let cutoff = now.checked_sub_signed(threshold).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let target = self.writer.target();
        let open = self
            .writer
            .retry()
            .run("list open sessions", move || {
                target.open_sessions(OPEN_SESSION_SCAN_LIMIT)
            })
            .await?;

        let mut report = JanitorReport {
            scanned: open.len(),
            ..Default::default()
        };
        info!(open = open.len(), cutoff = %cutoff, "Scanning open sessions");

        for session in open {
            if session.check_in >= cutoff {
                report.skipped_recent += 1;
                continue;
            }

            let check_out = session
                .check_in
                .checked_add_signed(close_after)
                .map_or(now, |at| at.min(now));
            match self.writer.force_close(&session, check_out).await {
                Ok(()) => {
                    info!(
                        session_id = session.id,
                        employee_id = session.employee_id,
                        check_in = %session.check_in,
                        check_out = %check_out,
                        "Auto-closed stale session"
                    );
                    report.closed += 1;
                }
                Err(e) => {
                    error!(session_id = session.id, error = %e, "Failed to close stale session");
                    report.failures.push(SessionFailure {
                        session_id: session.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            closed = report.closed,
            recent = report.skipped_recent,
            failed = report.failures.len(),
            "Stale session cleanup done"
        );
        Ok(report)
    }

    /// Fix sessions checked in within `window` whose check-in equals their
    /// check-out. Per employee the earliest one is reopened, unless another
    /// session of that employee is already open, and the rest are deleted.
    #[instrument(
        name = "repair_corrupted_sessions",
        skip(self, window),
        fields(days = window.num_days())
    )]
    pub async fn repair_corrupted_sessions(&self, window: Duration) -> Result<RepairReport, SyncError> {
        let since = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let target = self.writer.target();
        let sessions = self
            .writer
            .retry()
            .run("list recent sessions", move || target.sessions_since(since))
            .await?;

        let mut by_employee: BTreeMap<EmployeeId, Vec<AttendanceSession>> = BTreeMap::new();
        for session in sessions.iter().filter(|s| s.is_corrupted()) {
            by_employee
                .entry(session.employee_id)
                .or_default()
                .push(session.clone());
        }

        let mut report = RepairReport {
            scanned: sessions.len(),
            corrupted: by_employee.values().map(Vec::len).sum(),
            ..Default::default()
        };
        info!(scanned = report.scanned, corrupted = report.corrupted, "Scanning for corrupted sessions");

        for (employee_id, mut corrupted) in by_employee {
            corrupted.sort_by_key(|s| s.check_in);
            let mut rest = corrupted.into_iter();
            let Some(first) = rest.next() else { continue };

            match self.writer.current_open(employee_id).await {
                Ok(None) => match self.writer.reopen(first.id).await {
                    Ok(()) => {
                        info!(employee_id, session_id = first.id, "Reopened corrupted session");
                        report.reopened += 1;
                    }
                    Err(e) => report.failures.push(SessionFailure {
                        session_id: first.id,
                        error: e.to_string(),
                    }),
                },
                Ok(Some(open)) => {
                    warn!(
                        employee_id,
                        session_id = first.id,
                        open_session = open.id,
                        "Employee already has an open session, leaving corrupted one closed"
                    );
                    report.left_closed += 1;
                }
                Err(e) => report.failures.push(SessionFailure {
                    session_id: first.id,
                    error: e.to_string(),
                }),
            }

            for duplicate in rest {
                match self.writer.delete(duplicate.id).await {
                    Ok(()) => {
                        info!(employee_id, session_id = duplicate.id, "Deleted duplicate session");
                        report.deleted += 1;
                    }
                    Err(e) => report.failures.push(SessionFailure {
                        session_id: duplicate.id,
                        error: e.to_string(),
                    }),
                }
            }
        }

        Ok(report)
    }
}
