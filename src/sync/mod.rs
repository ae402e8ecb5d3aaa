//! The synchronization engine and its parts.

pub mod checkpoint;
pub mod engine;
pub mod janitor;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod writer;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, MySqlCheckpointStore};
pub use engine::{ConnectionReport, EngineOptions, SyncEngine};
pub use janitor::{JanitorReport, RepairReport, StaleSessionJanitor};
pub use reconciler::{ReconcilePolicy, SessionReconciler, UnknownDirectionRule};
pub use report::{RunLog, SyncReport};
pub use retry::RetryPolicy;
pub use scheduler::{DaemonSummary, Scheduler, TickOutcome};
