use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{Span, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SyncError;
use crate::integrations::{AttendanceTarget, PunchSource};
use crate::model::{EmployeeId, Punch, PunchResult, SyncOutcome, SyncStats, TerminalEmployee};
use crate::sync::checkpoint::{CheckpointStore, safe_advance_point};
use crate::sync::reconciler::{ReconcilePolicy, SessionReconciler};
use crate::sync::report::{RunLog, SyncReport};
use crate::sync::resolver::{EmployeeIndex, IdentityResolver};
use crate::sync::retry::RetryPolicy;
use crate::sync::writer::TargetWriter;

/// Knobs of the engine that do not come from the integrations.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub terminal_id: String,
    pub retry: RetryPolicy,
    pub policy: ReconcilePolicy,
    pub name_match_threshold: f64,
    pub mapping_ttl: std::time::Duration,
    /// Fetch window when the terminal has no checkpoint yet
    pub initial_lookback: Duration,
    pub run_log: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            terminal_id: "default".to_string(),
            retry: RetryPolicy::default(),
            policy: ReconcilePolicy::default(),
            name_match_threshold: 0.85,
            mapping_ttl: std::time::Duration::from_secs(24 * 3600),
            initial_lookback: Duration::days(7),
            run_log: None,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            terminal_id: config.terminal_id.clone(),
            retry: config.retry.clone(),
            policy: config.reconcile_policy(),
            name_match_threshold: config.name_match_threshold,
            mapping_ttl: config.mapping_ttl(),
            initial_lookback: Duration::days(config.initial_lookback_days),
            run_log: Some(config.data_dir.join("sync_log.json")),
        }
    }
}

/// Result of probing both sides.
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    /// Employee count on the terminal, or why it could not be read
    pub source: Result<usize, String>,
    pub target: Result<usize, String>,
    /// Terminal employees with no target match, when both sides answered
    pub unmatched: Vec<TerminalEmployee>,
}

impl ConnectionReport {
    pub fn healthy(&self) -> bool {
        self.source.is_ok() && self.target.is_ok()
    }
}

pub struct SyncEngine {
    source: Arc<dyn PunchSource>,
    resolver: IdentityResolver,
    reconciler: SessionReconciler,
    writer: TargetWriter,
    checkpoints: Arc<dyn CheckpointStore>,
    retry: RetryPolicy,
    terminal_id: String,
    initial_lookback: Duration,
    run_log: Option<RunLog>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn PunchSource>,
        target: Arc<dyn AttendanceTarget>,
        checkpoints: Arc<dyn CheckpointStore>,
        options: EngineOptions,
    ) -> Self {
        let writer = TargetWriter::new(target.clone(), options.retry.clone());
        let resolver = IdentityResolver::new(
            target,
            options.retry.clone(),
            options.name_match_threshold,
            options.mapping_ttl,
        );
        Self {
            source,
            resolver,
            reconciler: SessionReconciler::new(options.policy),
            writer,
            checkpoints,
            retry: options.retry,
            terminal_id: options.terminal_id,
            initial_lookback: options.initial_lookback,
            run_log: options.run_log.map(RunLog::new),
        }
    }

    pub fn writer(&self) -> &TargetWriter {
        &self.writer
    }

    /// One full pass: fetch since the checkpoint, resolve, reconcile per
    /// employee, then move the checkpoint as far as the outcomes allow.
    ///
    /// Returns an error only for connection or checkpoint failures; in that
    /// case the checkpoint is left where it was and the next tick replays.
    #[instrument(
        name = "sync_once",
        skip(self),
        fields(terminal_id = %self.terminal_id, tick_id = tracing::field::Empty)
    )]
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let tick_id = Uuid::new_v4();
        Span::current().record("tick_id", tracing::field::display(tick_id));
        let started_at = Utc::now();

        let checkpoint_before = self.checkpoints.load(&self.terminal_id).await?;
        let since = checkpoint_before.unwrap_or(started_at - self.initial_lookback);
        info!(since = %since, "Fetching punches");

        let source = self.source.as_ref();
        let mut batch = self
            .retry
            .run("fetch punches", move || source.fetch_punches(since))
            .await?;
        batch.sort();

        for record in &batch.malformed {
            warn!(reason = %record.reason, raw = %record.raw, "Malformed source record skipped");
        }
        info!(
            punches = batch.punches.len(),
            malformed = batch.malformed.len(),
            "Fetched punches"
        );

        let (by_employee, mut results) = self.resolve_all(&batch.punches).await?;

        for (employee_id, punches) in &by_employee {
            let applied = self
                .reconciler
                .reconcile_employee(&self.writer, *employee_id, punches)
                .await
                .inspect_err(|e| error!(employee_id, error = %e, "Tick aborted"))?;
            results.extend(applied);
        }
        results.sort_by_key(|r| r.punch.timestamp);

        let mut checkpoint_after = checkpoint_before;
        if let Some(point) = safe_advance_point(&results) {
            if checkpoint_before.is_none_or(|before| point > before) {
                self.checkpoints.advance(&self.terminal_id, point).await?;
                checkpoint_after = Some(point);
            }
        }

        let stats = SyncStats::from_results(&results, batch.malformed.len());
        info!(
            created_in = stats.checkins_created,
            created_out = stats.checkouts_updated,
            duplicates = stats.skipped_duplicates,
            unmapped = stats.skipped_unmapped,
            orphans = stats.skipped_orphans,
            failed = stats.failed,
            checkpoint = ?checkpoint_after,
            "Sync tick finished"
        );

        let report = SyncReport {
            tick_id,
            terminal_id: self.terminal_id.clone(),
            started_at,
            finished_at: Utc::now(),
            since,
            checkpoint_before,
            checkpoint_after,
            stats,
            results,
            malformed: batch.malformed,
        };
        if let Some(log) = &self.run_log {
            log.append(&report).await;
        }
        Ok(report)
    }

    /// Group punches by target employee. Unmapped punches come back as
    /// finished results; punches of two terminal ids sharing one employee end
    /// up in the same stream.
    async fn resolve_all(
        &self,
        punches: &[Punch],
    ) -> Result<(BTreeMap<EmployeeId, Vec<Punch>>, Vec<PunchResult>), SyncError> {
        let mut by_terminal: BTreeMap<&str, Vec<&Punch>> = BTreeMap::new();
        for punch in punches {
            by_terminal
                .entry(punch.terminal_employee_id.as_str())
                .or_default()
                .push(punch);
        }

        let mut by_employee: BTreeMap<EmployeeId, Vec<Punch>> = BTreeMap::new();
        let mut finished = Vec::new();
        for (terminal_employee_id, group) in by_terminal {
            // the newest punch carries the freshest name
            let Some(sample) = group.last() else { continue };
            match self.resolver.resolve(sample).await {
                Ok(employee_id) => by_employee
                    .entry(employee_id)
                    .or_default()
                    .extend(group.into_iter().cloned()),
                Err(SyncError::Unmapped(_)) => {
                    warn!(
                        terminal_employee_id,
                        name = sample.employee_name.as_deref().unwrap_or(""),
                        punches = group.len(),
                        "No target employee, punches skipped"
                    );
                    finished.extend(group.into_iter().map(|p| {
                        PunchResult::new(p.clone(), None, SyncOutcome::SkippedUnmapped)
                    }));
                }
                Err(e) if e.aborts_tick() => return Err(e),
                Err(e) => {
                    let detail = e.to_string();
                    finished.extend(group.into_iter().map(|p| {
                        PunchResult::new(p.clone(), None, SyncOutcome::Failed).detail(detail.clone())
                    }));
                }
            }
        }
        Ok((by_employee, finished))
    }

    /// Read both sides and list the terminal employees nobody maps to.
    #[instrument(name = "test_connections", skip(self))]
    pub async fn test_connections(&self) -> ConnectionReport {
        let source = self.source.as_ref();
        let source_result = self
            .retry
            .run("list terminal employees", move || source.employees())
            .await;

        let target = self.writer.target();
        let target_result = self
            .retry
            .run("list target employees", move || target.employees())
            .await;

        let unmatched = match (&source_result, &target_result) {
            (Ok(terminal), Ok(employees)) => {
                let index = EmployeeIndex::build(employees);
                terminal
                    .iter()
                    .filter(|e| {
                        index
                            .lookup(&e.emp_code, Some(&e.name), self.resolver.threshold())
                            .is_none()
                    })
                    .cloned()
                    .collect()
            }
            _ => Vec::new(),
        };

        let report = ConnectionReport {
            source: source_result.map(|e| e.len()).map_err(|e| e.to_string()),
            target: target_result.map(|e| e.len()).map_err(|e| e.to_string()),
            unmatched,
        };
        match (&report.source, &report.target) {
            (Ok(s), Ok(t)) => info!(
                terminal_employees = s,
                target_employees = t,
                unmatched = report.unmatched.len(),
                "Connections ok"
            ),
            (s, t) => error!(source = ?s, target = ?t, "Connection check failed"),
        }
        report
    }
}

