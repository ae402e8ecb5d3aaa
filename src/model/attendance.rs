use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type EmployeeId = i64;
pub type SessionId = i64;

/// An `hr.attendance` row as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: SessionId,
    pub employee_id: EmployeeId,
    pub check_in: DateTime<Utc>,
    pub check_out: Option<DateTime<Utc>>,
}

impl AttendanceSession {
    pub fn is_open(&self) -> bool {
        self.check_out.is_none()
    }

    /// True when the given edge of the session lies within `tolerance` of `at`.
    pub fn touches(&self, at: DateTime<Utc>, tolerance: Duration, edge: Edge) -> bool {
        let near = |ts: DateTime<Utc>| (ts - at).abs() <= tolerance;
        match edge {
            Edge::CheckIn => near(self.check_in),
            Edge::CheckOut => self.check_out.is_some_and(near),
            Edge::Either => near(self.check_in) || self.check_out.is_some_and(near),
        }
    }

    /// Session closed with the same instant on both edges.
    pub fn is_corrupted(&self) -> bool {
        self.check_out == Some(self.check_in)
    }
}

/// Session edge a punch writes when it is applied.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Edge {
    CheckIn,
    CheckOut,
    /// Direction not known before the live state is read
    Either,
}

/// Why a session is being closed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CloseReason {
    Punch,
    AutoClosed,
}
