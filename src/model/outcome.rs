use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::model::attendance::{EmployeeId, SessionId};
use crate::model::punch::Punch;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncOutcome {
    CreatedCheckIn,
    CreatedCheckOut,
    SkippedDuplicate,
    SkippedUnmapped,
    /// Check-out with nothing to close, or earlier than the open check-in.
    SkippedOrphan,
    Failed,
}

impl SyncOutcome {
    /// Everything but `Failed` lets the checkpoint move past the punch.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncOutcome::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchResult {
    pub punch: Punch,
    pub employee_id: Option<EmployeeId>,
    pub outcome: SyncOutcome,
    pub session_id: Option<SessionId>,
    pub detail: Option<String>,
}

impl PunchResult {
    pub fn new(punch: Punch, employee_id: Option<EmployeeId>, outcome: SyncOutcome) -> Self {
        Self {
            punch,
            employee_id,
            outcome,
            session_id: None,
            detail: None,
        }
    }

    pub fn session(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_punches: usize,
    pub checkins_created: usize,
    pub checkouts_updated: usize,
    pub skipped_duplicates: usize,
    pub skipped_unmapped: usize,
    pub skipped_orphans: usize,
    pub malformed: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn from_results(results: &[PunchResult], malformed: usize) -> Self {
        let mut stats = SyncStats {
            total_punches: results.len(),
            malformed,
            ..Default::default()
        };
        for result in results {
            match result.outcome {
                SyncOutcome::CreatedCheckIn => stats.checkins_created += 1,
                SyncOutcome::CreatedCheckOut => stats.checkouts_updated += 1,
                SyncOutcome::SkippedDuplicate => stats.skipped_duplicates += 1,
                SyncOutcome::SkippedUnmapped => stats.skipped_unmapped += 1,
                SyncOutcome::SkippedOrphan => stats.skipped_orphans += 1,
                SyncOutcome::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
