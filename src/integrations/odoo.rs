//! Odoo `hr.attendance` over the external JSON-RPC API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::OdooConfig;
use crate::error::SyncError;
use crate::integrations::{AttendanceTarget, Side, transport_error};
use crate::model::{AttendanceSession, CloseReason, EmployeeId, SessionId, TargetEmployee};
use crate::utils::datetime::{parse_odoo, to_odoo};

const ATTENDANCE: &str = "hr.attendance";
const EMPLOYEE: &str = "hr.employee";
const SESSION_FIELDS: [&str; 4] = ["id", "employee_id", "check_in", "check_out"];
const EMPLOYEE_LIMIT: usize = 5000;

pub struct OdooClient {
    http: Client,
    endpoint: String,
    db: String,
    user: String,
    api_key: String,
    auto_close_field: Option<String>,
    uid: Mutex<Option<i64>>,
    request_id: AtomicU64,
}

impl OdooClient {
    pub fn new(config: &OdooConfig, timeout: Duration) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| transport_error(Side::Target, "building http client", e))?;

        Ok(Self {
            http,
            endpoint: format!("{}/jsonrpc", config.url.trim_end_matches('/')),
            db: config.db.clone(),
            user: config.user.clone(),
            api_key: config.api_key.clone(),
            auto_close_field: config.auto_close_field.clone(),
            uid: Mutex::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value, SyncError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Side::Target, method, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SyncError::WriteUnavailable(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SyncError::WriteRejected(format!("{method}: HTTP {status}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| transport_error(Side::Target, method, e))?;
        rpc_result(payload)
    }

    async fn uid(&self) -> Result<i64, SyncError> {
        let mut cached = self.uid.lock().await;
        if let Some(uid) = *cached {
            return Ok(uid);
        }

        let result = self
            .call("common", "login", json!([self.db, self.user, self.api_key]))
            .await?;
        // a failed login answers `false`
        let uid = result
            .as_i64()
            .ok_or_else(|| SyncError::WriteRejected(format!("login refused for {}", self.user)))?;

        info!(uid, db = %self.db, "Authenticated against Odoo");
        *cached = Some(uid);
        Ok(uid)
    }

    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> Result<Value, SyncError> {
        let uid = self.uid().await?;
        debug!(model, method, "execute_kw");
        self.call(
            "object",
            "execute_kw",
            json!([self.db, uid, self.api_key, model, method, args, kwargs]),
        )
        .await
    }

    async fn search_sessions(
        &self,
        domain: Value,
        limit: Option<usize>,
        order: &str,
    ) -> Result<Vec<AttendanceSession>, SyncError> {
        let mut kwargs = json!({ "fields": SESSION_FIELDS, "order": order });
        if let Some(limit) = limit {
            kwargs["limit"] = json!(limit);
        }

        let rows = self
            .execute_kw(ATTENDANCE, "search_read", json!([domain]), kwargs)
            .await?;
        rows.as_array()
            .map(|rows| rows.iter().map(parse_session).collect::<Result<Vec<_>, _>>())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn write(&self, session_id: SessionId, values: Value) -> Result<(), SyncError> {
        self.execute_kw(ATTENDANCE, "write", json!([[session_id], values]), json!({}))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl AttendanceTarget for OdooClient {
    async fn employees(&self) -> Result<Vec<TargetEmployee>, SyncError> {
        let rows = self
            .execute_kw(
                EMPLOYEE,
                "search_read",
                json!([[]]),
                json!({ "fields": ["id", "name", "barcode"], "limit": EMPLOYEE_LIMIT }),
            )
            .await?;

        Ok(rows
            .as_array()
            .map(|rows| rows.iter().filter_map(parse_employee).collect())
            .unwrap_or_default())
    }

    async fn open_session(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<AttendanceSession>, SyncError> {
        let domain = json!([["employee_id", "=", employee_id], ["check_out", "=", false]]);
        let mut sessions = self.search_sessions(domain, Some(1), "check_in desc").await?;
        Ok(sessions.pop())
    }

    async fn sessions_near(
        &self,
        employee_id: EmployeeId,
        at: DateTime<Utc>,
        tolerance: chrono::Duration,
    ) -> Result<Vec<AttendanceSession>, SyncError> {
        let lo = to_odoo(at - tolerance);
        let hi = to_odoo(at + tolerance);
        // employee AND ((check_in in window) OR (check_out in window))
        let domain = json!([
            "&",
            ["employee_id", "=", employee_id],
            "|",
            "&", ["check_in", ">=", lo], ["check_in", "<=", hi],
            "&", ["check_out", ">=", lo], ["check_out", "<=", hi],
        ]);
        self.search_sessions(domain, None, "check_in asc").await
    }

    async fn open_sessions(&self, limit: usize) -> Result<Vec<AttendanceSession>, SyncError> {
        let domain = json!([["check_out", "=", false]]);
        self.search_sessions(domain, Some(limit), "check_in asc").await
    }

    async fn sessions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttendanceSession>, SyncError> {
        let domain = json!([["check_in", ">=", to_odoo(since)]]);
        self.search_sessions(domain, None, "check_in asc").await
    }

    #[instrument(name = "odoo_check_in", skip(self))]
    async fn create_check_in(
        &self,
        employee_id: EmployeeId,
        check_in: DateTime<Utc>,
    ) -> Result<SessionId, SyncError> {
        let values = json!({ "employee_id": employee_id, "check_in": to_odoo(check_in) });
        let result = self
            .execute_kw(ATTENDANCE, "create", json!([values]), json!({}))
            .await?;

        // create returns the id, or a list of ids on batch-capable versions
        result
            .as_i64()
            .or_else(|| result.get(0).and_then(Value::as_i64))
            .ok_or_else(|| SyncError::WriteRejected(format!("unexpected create result {result}")))
    }

    #[instrument(name = "odoo_check_out", skip(self))]
    async fn write_check_out(
        &self,
        session_id: SessionId,
        check_out: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<(), SyncError> {
        let mut values = Map::new();
        values.insert("check_out".into(), json!(to_odoo(check_out)));
        if let (CloseReason::AutoClosed, Some(field)) = (reason, &self.auto_close_field) {
            values.insert(field.clone(), json!(true));
        }
        self.write(session_id, Value::Object(values)).await
    }

    async fn reopen(&self, session_id: SessionId) -> Result<(), SyncError> {
        self.write(session_id, json!({ "check_out": false })).await
    }

    async fn delete(&self, session_id: SessionId) -> Result<(), SyncError> {
        self.execute_kw(ATTENDANCE, "unlink", json!([[session_id]]), json!({}))
            .await
            .map(|_| ())
    }
}

/// Unwrap a JSON-RPC envelope. Server-side faults (validation errors,
/// access rules, "employee hasn't checked out") are rejections.
pub fn rpc_result(payload: Value) -> Result<Value, SyncError> {
    if let Some(error) = payload.get("error") {
        let message = error
            .pointer("/data/message")
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown Odoo error");
        return Err(SyncError::WriteRejected(message.to_string()));
    }
    payload
        .get("result")
        .cloned()
        .ok_or_else(|| SyncError::WriteRejected("response without result".into()))
}

/// `search_read` row to session. Many2one fields come back as `[id, name]`,
/// empty datetimes as `false`.
pub fn parse_session(row: &Value) -> Result<AttendanceSession, SyncError> {
    let bad = |what: &str| SyncError::WriteRejected(format!("attendance row {row}: {what}"));

    let id = row.get("id").and_then(Value::as_i64).ok_or_else(|| bad("no id"))?;
    let employee_id = match row.get("employee_id") {
        Some(Value::Array(pair)) => pair.first().and_then(Value::as_i64),
        Some(v) => v.as_i64(),
        None => None,
    }
    .ok_or_else(|| bad("no employee"))?;
    let check_in = row
        .get("check_in")
        .and_then(Value::as_str)
        .and_then(parse_odoo)
        .ok_or_else(|| bad("no check_in"))?;
    let check_out = row.get("check_out").and_then(Value::as_str).and_then(parse_odoo);

    Ok(AttendanceSession {
        id,
        employee_id,
        check_in,
        check_out,
    })
}

fn parse_employee(row: &Value) -> Option<TargetEmployee> {
    Some(TargetEmployee {
        id: row.get("id")?.as_i64()?,
        name: row.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        barcode: match row.get("barcode") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        },
    })
}
