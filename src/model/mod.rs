pub mod attendance;
pub mod employee;
pub mod outcome;
pub mod punch;

pub use attendance::{AttendanceSession, CloseReason, Edge, EmployeeId, SessionId};
pub use employee::{TargetEmployee, TerminalEmployee};
pub use outcome::{PunchResult, SyncOutcome, SyncStats};
pub use punch::{Direction, MalformedRecord, Punch, PunchBatch};
