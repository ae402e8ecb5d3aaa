use thiserror::Error;

/// Failures seen while moving punches from the terminal to the target.
///
/// The split between retryable and per-punch variants drives the whole
/// pipeline: retryable ones are re-attempted by the [`RetryPolicy`] and abort
/// the tick when the budget runs out, the rest are recorded on the punch and
/// the batch moves on.
///
/// [`RetryPolicy`]: crate::sync::retry::RetryPolicy
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("punch source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed source record: {0}")]
    SourceDataMalformed(String),

    /// Transport failure or 5xx from the target, reads included.
    #[error("target unavailable: {0}")]
    WriteUnavailable(String),

    /// The target answered but refused the call (validation, access rules).
    #[error("target rejected the call: {0}")]
    WriteRejected(String),

    #[error("no target employee for terminal id {0}")]
    Unmapped(String),

    #[error("checkpoint persist failure: {0}")]
    CheckpointPersistFailure(#[from] CheckpointError),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable(_) | SyncError::WriteUnavailable(_)
        )
    }

    /// Errors that end the current tick instead of a single punch.
    pub fn aborts_tick(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable(_)
                | SyncError::WriteUnavailable(_)
                | SyncError::CheckpointPersistFailure(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint file is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint table: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}
