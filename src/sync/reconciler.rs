//! Turns an employee's punch stream into session transitions.
//!
//! The decision for a punch depends only on the live state read from the
//! target right before it (open session, sessions around the punch time) and
//! on [`ReconcilePolicy`]. Nothing is cached between punches, so replays,
//! overlapping fetches and earlier partial failures all land on the same
//! answer.

use chrono::{DateTime, Duration, Utc};
use strum_macros::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::model::{
    AttendanceSession, Direction, Edge, EmployeeId, Punch, PunchResult, SyncOutcome,
};
use crate::sync::writer::TargetWriter;

/// How to read a punch whose direction the terminal did not record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum UnknownDirectionRule {
    /// Out when a session is open, in otherwise.
    Toggle,
    /// In when no session is open; with an open session the punch is taken
    /// as a repeat of the check-in. Only explicit `out` punches close.
    InIfClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePolicy {
    /// Punches this close to an existing check-in/out are duplicates
    pub min_interval: Duration,
    pub unknown_rule: UnknownDirectionRule,
    /// When false every punch is treated as `unknown`
    pub trust_device_direction: bool,
    /// How long a forgotten session is assumed to have lasted
    pub dangling_close_after: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::minutes(2),
            unknown_rule: UnknownDirectionRule::Toggle,
            trust_device_direction: true,
            dangling_close_after: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    CheckIn,
    CheckOut { session: AttendanceSession },
    /// A check-in while an older session was never closed.
    CloseDanglingThenCheckIn {
        session: AttendanceSession,
        close_at: DateTime<Utc>,
    },
    SkipDuplicate(String),
    SkipOrphan(String),
}

impl ReconcilePolicy {
    pub fn effective_direction(&self, punch: &Punch) -> Direction {
        if self.trust_device_direction {
            punch.raw_direction
        } else {
            Direction::Unknown
        }
    }

    /// Pure decision for one punch given the live state.
    ///
    /// A punch is a replay when a session already carries the edge that punch
    /// would write. Check-outs the engine writes itself (dangling and stale
    /// closes) therefore never hide a check-in that still has to be made.
    pub fn decide(
        &self,
        punch: &Punch,
        open: Option<&AttendanceSession>,
        nearby: &[AttendanceSession],
    ) -> Decision {
        let ts = punch.timestamp;
        let device_direction = self.effective_direction(punch);

        let edge = match device_direction {
            Direction::In => Edge::CheckIn,
            Direction::Out => Edge::CheckOut,
            Direction::Unknown => Edge::Either,
        };
        if let Some(seen) = nearby.iter().find(|s| s.touches(ts, self.min_interval, edge)) {
            return Decision::SkipDuplicate(format!(
                "session {} already has an edge within {} min",
                seen.id,
                self.min_interval.num_minutes()
            ));
        }

        let direction = match (device_direction, open) {
            (Direction::Unknown, None) => Direction::In,
            (Direction::Unknown, Some(_)) => match self.unknown_rule {
                UnknownDirectionRule::Toggle => Direction::Out,
                UnknownDirectionRule::InIfClosed => {
                    return Decision::SkipDuplicate(
                        "unknown direction while a session is open".into(),
                    );
                }
            },
            (known, _) => known,
        };

        match (direction, open) {
            (Direction::Out, None) => Decision::SkipOrphan("no open session to close".into()),
            (Direction::Out, Some(session)) if ts <= session.check_in => Decision::SkipOrphan(
                format!("punch precedes open check-in of session {}", session.id),
            ),
            (Direction::Out, Some(session)) if ts - session.check_in < self.min_interval => {
                Decision::SkipDuplicate(format!(
                    "check-out bounces off the check-in of session {}",
                    session.id
                ))
            }
            (Direction::Out, Some(session)) => Decision::CheckOut {
                session: session.clone(),
            },
            (_, None) => Decision::CheckIn,
            (_, Some(session)) if ts < session.check_in => Decision::SkipOrphan(format!(
                "check-in precedes open session {}",
                session.id
            )),
            (_, Some(session)) if ts - session.check_in < self.min_interval => {
                Decision::SkipDuplicate(format!("already checked in by session {}", session.id))
            }
            (_, Some(session)) => {
                let close_at = (session.check_in + self.dangling_close_after)
                    .min(ts - Duration::seconds(1));
                Decision::CloseDanglingThenCheckIn {
                    session: session.clone(),
                    close_at,
                }
            }
        }
    }
}

pub struct SessionReconciler {
    policy: ReconcilePolicy,
}

impl SessionReconciler {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self { policy }
    }

    /// Apply one employee's punches in time order. A rejected write marks
    /// that punch `failed` and moves on; an unavailable target is returned as
    /// an error and ends the tick.
    pub async fn reconcile_employee(
        &self,
        writer: &TargetWriter,
        employee_id: EmployeeId,
        punches: &[Punch],
    ) -> Result<Vec<PunchResult>, SyncError> {
        let mut ordered: Vec<&Punch> = punches.iter().collect();
        ordered.sort_by_key(|p| p.timestamp);

        let mut results = Vec::with_capacity(ordered.len());
        for punch in ordered {
            let result = self.apply(writer, employee_id, punch).await?;
            results.push(result);
        }
        Ok(results)
    }

    async fn apply(
        &self,
        writer: &TargetWriter,
        employee_id: EmployeeId,
        punch: &Punch,
    ) -> Result<PunchResult, SyncError> {
        let open = writer.current_open(employee_id).await?;
        let nearby = writer
            .sessions_near(employee_id, punch.timestamp, self.policy.min_interval)
            .await?;
        let decision = self.policy.decide(punch, open.as_ref(), &nearby);
        debug!(employee_id, at = %punch.timestamp, ?decision, "Reconciled punch");

        let base = |outcome| PunchResult::new(punch.clone(), Some(employee_id), outcome);

        let written = match decision {
            Decision::SkipDuplicate(why) => {
                return Ok(base(SyncOutcome::SkippedDuplicate).detail(why));
            }
            Decision::SkipOrphan(why) => {
                info!(employee_id, at = %punch.timestamp, reason = %why, "Orphan punch skipped");
                return Ok(base(SyncOutcome::SkippedOrphan).detail(why));
            }
            Decision::CheckIn => writer
                .open_session(employee_id, punch.timestamp)
                .await
                .map(|id| base(SyncOutcome::CreatedCheckIn).session(id)),
            Decision::CheckOut { .. } => writer
                .close_session(employee_id, punch.timestamp)
                .await
                .map(|id| base(SyncOutcome::CreatedCheckOut).session(id)),
            Decision::CloseDanglingThenCheckIn { session, close_at } => {
                warn!(
                    employee_id,
                    session_id = session.id,
                    closed_at = %close_at,
                    "Closing forgotten session before new check-in"
                );
                match writer.force_close(&session, close_at).await {
                    Ok(()) => writer
                        .open_session(employee_id, punch.timestamp)
                        .await
                        .map(|id| base(SyncOutcome::CreatedCheckIn).session(id)),
                    Err(e) => Err(e),
                }
            }
        };

        match written {
            Ok(result) => {
                info!(employee_id, at = %punch.timestamp, outcome = %result.outcome, "Punch applied");
                Ok(result)
            }
            Err(e) if e.aborts_tick() => Err(e),
            Err(e) => {
                warn!(employee_id, at = %punch.timestamp, error = %e, "Punch failed");
                Ok(base(SyncOutcome::Failed).detail(e.to_string()))
            }
        }
    }
}
