#![allow(dead_code)]

pub mod http_stub;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use punch_sync::error::SyncError;
use punch_sync::integrations::{AttendanceTarget, PunchSource};
use punch_sync::model::{
    AttendanceSession, CloseReason, Direction, Edge, EmployeeId, MalformedRecord, Punch,
    PunchBatch, SessionId, TargetEmployee, TerminalEmployee,
};
use punch_sync::sync::{
    EngineOptions, MemoryCheckpointStore, RetryPolicy, Scheduler, SyncEngine,
};

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
}

pub fn punch(badge: &str, h: u32, m: u32, direction: Direction) -> Punch {
    Punch::new(badge, at(h, m), direction)
}

#[derive(Default)]
pub struct FakeSource {
    punches: Mutex<Vec<Punch>>,
    malformed: Mutex<Vec<MalformedRecord>>,
    employees: Mutex<Vec<TerminalEmployee>>,
    pub unavailable: AtomicBool,
    pub fetches: AtomicUsize,
}

impl FakeSource {
    pub fn with_punches(punches: Vec<Punch>) -> Arc<Self> {
        let source = Self::default();
        *source.punches.lock().unwrap() = punches;
        Arc::new(source)
    }

    pub fn push(&self, punch: Punch) {
        self.punches.lock().unwrap().push(punch);
    }

    pub fn push_malformed(&self, reason: &str) {
        self.malformed.lock().unwrap().push(MalformedRecord {
            reason: reason.to_string(),
            raw: json!({ "emp_code": "1007" }),
        });
    }

    pub fn set_employees(&self, employees: Vec<TerminalEmployee>) {
        *self.employees.lock().unwrap() = employees;
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::SourceUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PunchSource for FakeSource {
    async fn fetch_punches(&self, since: DateTime<Utc>) -> Result<PunchBatch, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let punches = self
            .punches
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.timestamp >= since)
            .cloned()
            .collect();
        Ok(PunchBatch {
            punches,
            malformed: self.malformed.lock().unwrap().clone(),
        })
    }

    async fn employees(&self) -> Result<Vec<TerminalEmployee>, SyncError> {
        self.check()?;
        Ok(self.employees.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteLog {
    pub session_id: SessionId,
    pub check_out: DateTime<Utc>,
    pub reason: CloseReason,
}

/// In-memory `hr.attendance` that refuses a second open session per
/// employee, the way Odoo does.
#[derive(Default)]
pub struct FakeTarget {
    employees: Mutex<Vec<TargetEmployee>>,
    sessions: Mutex<Vec<AttendanceSession>>,
    next_id: AtomicUsize,
    closes: Mutex<Vec<WriteLog>>,
    reject_check_ins: Mutex<HashSet<DateTime<Utc>>>,
    reject_sessions: Mutex<HashSet<SessionId>>,
    /// Fails creates and writes, reads still work
    pub writes_unavailable: AtomicBool,
    /// Fails every call
    pub unavailable: AtomicBool,
    pub creates: AtomicUsize,
}

impl FakeTarget {
    pub fn new() -> Arc<Self> {
        let target = Self::default();
        target.next_id.store(100, Ordering::SeqCst);
        *target.employees.lock().unwrap() = vec![
            TargetEmployee {
                id: 7,
                name: "Awa Diallo".into(),
                barcode: Some("1007".into()),
            },
            TargetEmployee {
                id: 8,
                name: "Jean Dupont".into(),
                barcode: Some("1008".into()),
            },
        ];
        Arc::new(target)
    }

    pub fn sessions(&self) -> Vec<AttendanceSession> {
        let mut sessions = self.sessions.lock().unwrap().clone();
        sessions.sort_by_key(|s| (s.employee_id, s.check_in));
        sessions
    }

    pub fn sessions_of(&self, employee_id: EmployeeId) -> Vec<AttendanceSession> {
        self.sessions()
            .into_iter()
            .filter(|s| s.employee_id == employee_id)
            .collect()
    }

    pub fn closes(&self) -> Vec<WriteLog> {
        self.closes.lock().unwrap().clone()
    }

    pub fn insert(
        &self,
        employee_id: EmployeeId,
        check_in: DateTime<Utc>,
        check_out: Option<DateTime<Utc>>,
    ) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as SessionId;
        self.sessions.lock().unwrap().push(AttendanceSession {
            id,
            employee_id,
            check_in,
            check_out,
        });
        id
    }

    pub fn reject_check_in_at(&self, ts: DateTime<Utc>) {
        self.reject_check_ins.lock().unwrap().insert(ts);
    }

    pub fn accept_all(&self) {
        self.reject_check_ins.lock().unwrap().clear();
        self.reject_sessions.lock().unwrap().clear();
    }

    pub fn reject_writes_to(&self, session_id: SessionId) {
        self.reject_sessions.lock().unwrap().insert(session_id);
    }

    pub fn open_count(&self, employee_id: EmployeeId) -> usize {
        self.sessions_of(employee_id)
            .iter()
            .filter(|s| s.is_open())
            .count()
    }

    fn read(&self) -> Result<(), SyncError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::WriteUnavailable("502 Bad Gateway".into()));
        }
        Ok(())
    }

    fn write(&self) -> Result<(), SyncError> {
        self.read()?;
        if self.writes_unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::WriteUnavailable("503 Service Unavailable".into()));
        }
        Ok(())
    }

    fn update(
        &self,
        session_id: SessionId,
        apply: impl FnOnce(&mut AttendanceSession) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        if self.reject_sessions.lock().unwrap().contains(&session_id) {
            return Err(SyncError::WriteRejected(format!("access denied on {session_id}")));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| SyncError::WriteRejected(format!("record {session_id} missing")))?;
        apply(session)
    }
}

#[async_trait]
impl AttendanceTarget for FakeTarget {
    async fn employees(&self) -> Result<Vec<TargetEmployee>, SyncError> {
        self.read()?;
        Ok(self.employees.lock().unwrap().clone())
    }

    async fn open_session(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<AttendanceSession>, SyncError> {
        self.read()?;
        Ok(self
            .sessions_of(employee_id)
            .into_iter()
            .filter(|s| s.is_open())
            .max_by_key(|s| s.check_in))
    }

    async fn sessions_near(
        &self,
        employee_id: EmployeeId,
        at: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Vec<AttendanceSession>, SyncError> {
        self.read()?;
        Ok(self
            .sessions_of(employee_id)
            .into_iter()
            .filter(|s| s.touches(at, tolerance, Edge::Either))
            .collect())
    }

    async fn open_sessions(&self, limit: usize) -> Result<Vec<AttendanceSession>, SyncError> {
        self.read()?;
        let mut open: Vec<_> = self.sessions().into_iter().filter(|s| s.is_open()).collect();
        open.sort_by_key(|s| s.check_in);
        open.truncate(limit);
        Ok(open)
    }

    async fn sessions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttendanceSession>, SyncError> {
        self.read()?;
        Ok(self
            .sessions()
            .into_iter()
            .filter(|s| s.check_in >= since)
            .collect())
    }

    async fn create_check_in(
        &self,
        employee_id: EmployeeId,
        check_in: DateTime<Utc>,
    ) -> Result<SessionId, SyncError> {
        self.write()?;
        if self.reject_check_ins.lock().unwrap().contains(&check_in) {
            return Err(SyncError::WriteRejected("validation error".into()));
        }
        if self.open_count(employee_id) > 0 {
            return Err(SyncError::WriteRejected(format!(
                "employee {employee_id} hasn't checked out"
            )));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(employee_id, check_in, None))
    }

    async fn write_check_out(
        &self,
        session_id: SessionId,
        check_out: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<(), SyncError> {
        self.write()?;
        self.update(session_id, |session| {
            if check_out < session.check_in {
                return Err(SyncError::WriteRejected("check out before check in".into()));
            }
            session.check_out = Some(check_out);
            Ok(())
        })?;
        self.closes.lock().unwrap().push(WriteLog {
            session_id,
            check_out,
            reason,
        });
        Ok(())
    }

    async fn reopen(&self, session_id: SessionId) -> Result<(), SyncError> {
        self.write()?;
        self.update(session_id, |session| {
            session.check_out = None;
            Ok(())
        })
    }

    async fn delete(&self, session_id: SessionId) -> Result<(), SyncError> {
        self.write()?;
        if self.reject_sessions.lock().unwrap().contains(&session_id) {
            return Err(SyncError::WriteRejected(format!("access denied on {session_id}")));
        }
        self.sessions.lock().unwrap().retain(|s| s.id != session_id);
        Ok(())
    }
}

/// Short retries and a lookback wide enough for the fixed test dates.
pub fn options() -> EngineOptions {
    EngineOptions {
        terminal_id: "t1".into(),
        retry: RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        },
        initial_lookback: Duration::days(365 * 20),
        ..EngineOptions::default()
    }
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub target: Arc<FakeTarget>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
}

impl Harness {
    pub fn new(punches: Vec<Punch>) -> Self {
        Self {
            source: FakeSource::with_punches(punches),
            target: FakeTarget::new(),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
        }
    }

    pub fn engine(&self) -> SyncEngine {
        self.engine_with(options())
    }

    pub fn engine_with(&self, options: EngineOptions) -> SyncEngine {
        SyncEngine::new(
            self.source.clone(),
            self.target.clone(),
            self.checkpoints.clone(),
            options,
        )
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.engine(), None)
    }
}
