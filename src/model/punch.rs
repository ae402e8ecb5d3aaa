use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Direction as reported by the terminal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    Unknown,
}

impl Direction {
    /// ZK `punch_state`: 0 check-in, 4 overtime-in, 255 device auto mode,
    /// everything else (check-out, breaks, overtime-out) counts as out.
    pub fn from_punch_state(state: i64) -> Self {
        match state {
            0 | 4 => Direction::In,
            255 => Direction::Unknown,
            _ => Direction::Out,
        }
    }
}

/// A single clock event read from the terminal. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punch {
    pub terminal_employee_id: String,
    pub timestamp: DateTime<Utc>,
    pub raw_direction: Direction,

    /// Name as known by the terminal, used when the badge has no match
    pub employee_name: Option<String>,
    pub terminal_sn: Option<String>,
}

impl Punch {
    pub fn new(
        terminal_employee_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        raw_direction: Direction,
    ) -> Self {
        Self {
            terminal_employee_id: terminal_employee_id.into(),
            timestamp,
            raw_direction,
            employee_name: None,
            terminal_sn: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.employee_name = Some(name.into());
        self
    }
}

/// A source record that could not be turned into a [`Punch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub reason: String,
    pub raw: serde_json::Value,
}

/// Result of one fetch: the valid punches, oldest first, plus whatever was
/// rejected at the boundary.
#[derive(Debug, Clone, Default)]
pub struct PunchBatch {
    pub punches: Vec<Punch>,
    pub malformed: Vec<MalformedRecord>,
}

impl PunchBatch {
    pub fn sort(&mut self) {
        self.punches.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.terminal_employee_id.cmp(&b.terminal_employee_id))
        });
    }
}
