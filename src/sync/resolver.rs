use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::integrations::AttendanceTarget;
use crate::model::{EmployeeId, Punch, TargetEmployee};
use crate::sync::retry::RetryPolicy;
use crate::utils::name_match::{normalize, similarity};

const MAPPING_KEY: &str = "employees";

/// Lookup tables built from the target's employee list.
#[derive(Debug, Default)]
pub struct EmployeeIndex {
    by_badge: HashMap<String, EmployeeId>,
    by_name: HashMap<String, EmployeeId>,
    names: Vec<(String, EmployeeId)>,
}

impl EmployeeIndex {
    pub fn build(employees: &[TargetEmployee]) -> Self {
        let mut index = EmployeeIndex::default();
        for employee in employees {
            if let Some(badge) = employee.barcode.as_deref().map(str::trim) {
                if !badge.is_empty() {
                    index.by_badge.insert(badge.to_string(), employee.id);
                }
            }
            let name = normalize(&employee.name);
            if !name.is_empty() {
                index.by_name.insert(name.clone(), employee.id);
                index.names.push((name, employee.id));
            }
        }
        index
    }

    /// Badge first, then exact normalized name, then the best fuzzy name at or
    /// above `threshold`.
    pub fn lookup(&self, badge: &str, name: Option<&str>, threshold: f64) -> Option<EmployeeId> {
        if let Some(id) = self.by_badge.get(badge.trim()) {
            return Some(*id);
        }

        let name = normalize(name?);
        if name.is_empty() {
            return None;
        }
        if let Some(id) = self.by_name.get(&name) {
            return Some(*id);
        }

        self.names
            .iter()
            .map(|(candidate, id)| (similarity(&name, candidate), *id))
            .filter(|(score, _)| *score >= threshold)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }
}

/// Terminal id to target employee, with the target's employee list cached
/// for `ttl`.
pub struct IdentityResolver {
    target: Arc<dyn AttendanceTarget>,
    retry: RetryPolicy,
    threshold: f64,
    cache: Cache<&'static str, Arc<EmployeeIndex>>,
}

impl IdentityResolver {
    pub fn new(
        target: Arc<dyn AttendanceTarget>,
        retry: RetryPolicy,
        threshold: f64,
        ttl: Duration,
    ) -> Self {
        Self {
            target,
            retry,
            threshold,
            cache: Cache::builder()
                .max_capacity(1)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn index(&self) -> Result<Arc<EmployeeIndex>, SyncError> {
        if let Some(index) = self.cache.get(MAPPING_KEY).await {
            return Ok(index);
        }

        let target = self.target.as_ref();
        let employees = self
            .retry
            .run("load target employees", move || target.employees())
            .await?;
        let index = Arc::new(EmployeeIndex::build(&employees));
        info!(employees = employees.len(), "Employee mapping rebuilt");

        self.cache.insert(MAPPING_KEY, index.clone()).await;
        Ok(index)
    }

    /// `Err(SyncError::Unmapped)` when no employee matches; other errors
    /// come from loading the employee list.
    pub async fn resolve(&self, punch: &Punch) -> Result<EmployeeId, SyncError> {
        let index = self.index().await?;
        match index.lookup(
            &punch.terminal_employee_id,
            punch.employee_name.as_deref(),
            self.threshold,
        ) {
            Some(id) => {
                debug!(terminal_id = %punch.terminal_employee_id, employee_id = id, "Resolved");
                Ok(id)
            }
            None => Err(SyncError::Unmapped(punch.terminal_employee_id.clone())),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}
