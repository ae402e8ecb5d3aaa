//! ZK BioTime REST client (8.x API, 7.x JWT login as fallback).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::BioTimeConfig;
use crate::error::SyncError;
use crate::integrations::{PunchSource, Side, transport_error};
use crate::model::{Direction, MalformedRecord, Punch, PunchBatch, TerminalEmployee};
use crate::utils::datetime::{parse_terminal, to_terminal};

/// Login endpoints with the Authorization scheme each one issues tokens for.
const AUTH_ENDPOINTS: [(&str, &str); 2] =
    [("/api-token-auth/", "Token"), ("/jwt-api-token-auth/", "JWT")];
const TRANSACTIONS_PATH: &str = "/iclock/api/transactions/";
const EMPLOYEES_PATH: &str = "/personnel/api/employees/";
const PAGE_SIZE: usize = 100;

pub struct BioTimeClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    utc_offset: FixedOffset,
    /// Full Authorization header value, cached until the server rejects it
    auth: Mutex<Option<String>>,
}

impl BioTimeClient {
    pub fn new(config: &BioTimeConfig, timeout: Duration) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| transport_error(Side::Source, "building http client", e))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            utc_offset: config.utc_offset,
            auth: Mutex::new(None),
        })
    }

    async fn auth_header(&self) -> Result<String, SyncError> {
        let mut cached = self.auth.lock().await;
        if let Some(header) = cached.as_ref() {
            return Ok(header.clone());
        }
        let header = self.authenticate().await?;
        *cached = Some(header.clone());
        Ok(header)
    }

    async fn authenticate(&self) -> Result<String, SyncError> {
        let body = json!({ "username": self.username, "password": self.password });
        let mut last_error = String::from("no login endpoint answered");

        for (path, scheme) in AUTH_ENDPOINTS {
            let url = format!("{}{}", self.base_url, path);
            let response = match self.http.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("POST {path}: {e}");
                    continue;
                }
            };

            if !response.status().is_success() {
                last_error = format!("POST {path}: HTTP {}", response.status());
                continue;
            }

            let payload: Value = match response.json().await {
                Ok(v) => v,
                Err(e) => {
                    last_error = format!("POST {path}: {e}");
                    continue;
                }
            };

            if let Some(token) = ["token", "access_token", "Token"]
                .iter()
                .find_map(|k| payload.get(*k).and_then(Value::as_str))
            {
                info!(endpoint = path, "Authenticated against BioTime");
                return Ok(format!("{scheme} {token}"));
            }
            last_error = format!("POST {path}: no token in response");
        }

        Err(SyncError::SourceUnavailable(last_error))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, SyncError> {
        let auth = self.auth_header().await?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, auth)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(Side::Source, path, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            // token expired; next attempt logs in again
            self.auth.lock().await.take();
            return Err(SyncError::SourceUnavailable(format!(
                "GET {path}: token rejected ({status})"
            )));
        }
        if !status.is_success() {
            return Err(SyncError::SourceUnavailable(format!("GET {path}: HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| transport_error(Side::Source, path, e))
    }

    /// Walk every page of a list endpoint.
    async fn get_all(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>, SyncError> {
        let mut records = Vec::new();
        let mut page = 1usize;

        loop {
            let mut paged = query.to_vec();
            paged.push(("page", page.to_string()));
            paged.push(("page_size", PAGE_SIZE.to_string()));

            let body = self.get_json(path, &paged).await?;
            let (rows, count) = page_records(&body);
            let fetched = rows.len();
            records.extend(rows);

            debug!(path, page, fetched, total = records.len(), "Fetched page");

            let exhausted = count.is_some_and(|c| records.len() as u64 >= c);
            if fetched < PAGE_SIZE || exhausted {
                break;
            }
            page += 1;
        }

        Ok(records)
    }
}

#[async_trait]
impl PunchSource for BioTimeClient {
    #[instrument(name = "biotime_fetch", skip(self))]
    async fn fetch_punches(&self, since: DateTime<Utc>) -> Result<PunchBatch, SyncError> {
        let query = [
            ("start_time", to_terminal(since, self.utc_offset)),
            ("end_time", to_terminal(Utc::now(), self.utc_offset)),
        ];
        let records = self.get_all(TRANSACTIONS_PATH, &query).await?;

        let mut batch = PunchBatch::default();
        for record in records {
            match parse_transaction(&record, self.utc_offset) {
                Ok(punch) => batch.punches.push(punch),
                Err(e) => batch.malformed.push(MalformedRecord {
                    reason: e.to_string(),
                    raw: record,
                }),
            }
        }
        batch.sort();

        debug!(
            punches = batch.punches.len(),
            malformed = batch.malformed.len(),
            "Parsed BioTime transactions"
        );
        Ok(batch)
    }

    async fn employees(&self) -> Result<Vec<TerminalEmployee>, SyncError> {
        let records = self.get_all(EMPLOYEES_PATH, &[]).await?;
        Ok(records.iter().filter_map(parse_employee).collect())
    }
}

/// Rows and total count of a list response. BioTime wraps rows in `data`
/// (8.x) or `results` (DRF style); older builds return a bare array.
pub fn page_records(body: &Value) -> (Vec<Value>, Option<u64>) {
    match body {
        Value::Array(rows) => (rows.clone(), None),
        Value::Object(map) => {
            let rows = map
                .get("data")
                .or_else(|| map.get("results"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            (rows, map.get("count").and_then(Value::as_u64))
        }
        _ => (Vec::new(), None),
    }
}

/// Validate one transaction row into a [`Punch`].
pub fn parse_transaction(record: &Value, local: FixedOffset) -> Result<Punch, SyncError> {
    let malformed = |reason: &str| SyncError::SourceDataMalformed(reason.to_string());

    if !record.is_object() {
        return Err(malformed("transaction is not an object"));
    }

    let employee_id = first_string(record, &["emp_code", "employee_id", "pin"])
        .ok_or_else(|| malformed("missing employee code"))?;

    let raw_time = first_string(record, &["punch_time", "att_time", "timestamp"])
        .ok_or_else(|| malformed("missing punch time"))?;
    let timestamp = parse_terminal(&raw_time, local)
        .ok_or_else(|| malformed(&format!("unparseable punch time {raw_time:?}")))?;

    let raw_direction = first_string(record, &["punch_state", "status", "state"])
        .and_then(|s| s.parse::<i64>().ok())
        .map(Direction::from_punch_state)
        .unwrap_or(Direction::Unknown);

    let full_name = format!(
        "{} {}",
        first_string(record, &["first_name"]).unwrap_or_default(),
        first_string(record, &["last_name"]).unwrap_or_default()
    );
    let employee_name = Some(full_name.trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| first_string(record, &["emp_name", "employee_name"]));

    Ok(Punch {
        terminal_employee_id: employee_id,
        timestamp,
        raw_direction,
        employee_name,
        terminal_sn: first_string(record, &["terminal_sn", "terminal_id", "device_id"]),
    })
}

pub fn parse_employee(record: &Value) -> Option<TerminalEmployee> {
    let emp_code = first_string(record, &["emp_code", "badge_number", "id"])?;
    let name = match first_string(record, &["first_name"]) {
        Some(first) => format!(
            "{} {}",
            first,
            first_string(record, &["last_name"]).unwrap_or_default()
        )
        .trim()
        .to_string(),
        None => first_string(record, &["name"]).unwrap_or_default(),
    };
    let department = match record.get("department") {
        Some(Value::Object(dept)) => dept
            .get("dept_name")
            .or_else(|| dept.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    Some(TerminalEmployee {
        emp_code,
        name,
        department,
    })
}

/// First key holding a non-empty string or a number, as a string.
fn first_string(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn parses_a_biotime_8_transaction() {
        let record = json!({
            "id": 9812,
            "emp_code": "1007",
            "first_name": "Awa",
            "last_name": "Diallo",
            "punch_time": "2024-03-04 09:00:12",
            "punch_state": "0",
            "terminal_sn": "CJDE201160001",
        });

        let punch = parse_transaction(&record, utc()).unwrap();
        assert_eq!(punch.terminal_employee_id, "1007");
        assert_eq!(punch.raw_direction, Direction::In);
        assert_eq!(punch.employee_name.as_deref(), Some("Awa Diallo"));
        assert_eq!(punch.terminal_sn.as_deref(), Some("CJDE201160001"));
        assert_eq!(
            punch.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 12).unwrap()
        );
    }

    #[test]
    fn numeric_fields_and_auto_state() {
        let record = json!({
            "emp_code": 42,
            "emp_name": "Moussa",
            "punch_time": "2024-03-04T17:30:00",
            "punch_state": 255,
        });

        let punch = parse_transaction(&record, utc()).unwrap();
        assert_eq!(punch.terminal_employee_id, "42");
        assert_eq!(punch.raw_direction, Direction::Unknown);
        assert_eq!(punch.employee_name.as_deref(), Some("Moussa"));
    }

    #[test]
    fn bad_rows_are_malformed_not_fatal() {
        let no_time = json!({ "emp_code": "1", "punch_state": "1" });
        let bad_time = json!({ "emp_code": "1", "punch_time": "04/03/2024" });
        let no_code = json!({ "punch_time": "2024-03-04 09:00:00" });

        let reason = |record: &Value| match parse_transaction(record, utc()) {
            Err(SyncError::SourceDataMalformed(reason)) => reason,
            other => panic!("unexpected {other:?}"),
        };
        assert!(reason(&no_time).contains("time"));
        assert!(reason(&bad_time).contains("unparseable"));
        assert!(reason(&no_code).contains("employee"));
        assert!(reason(&json!("row")).contains("not an object"));
        assert!(!SyncError::SourceDataMalformed("x".into()).aborts_tick());
    }

    #[test]
    fn page_shapes() {
        let wrapped = json!({ "count": 250, "data": [{ "id": 1 }, { "id": 2 }] });
        let (rows, count) = page_records(&wrapped);
        assert_eq!(rows.len(), 2);
        assert_eq!(count, Some(250));

        let drf = json!({ "results": [{ "id": 1 }] });
        assert_eq!(page_records(&drf).0.len(), 1);

        let bare = json!([{ "id": 1 }, { "id": 2 }, { "id": 3 }]);
        assert_eq!(page_records(&bare), (bare.as_array().unwrap().clone(), None));
    }

    #[test]
    fn employees_with_department_objects() {
        let record = json!({
            "emp_code": "1007",
            "first_name": "Awa",
            "last_name": "Diallo",
            "department": { "dept_name": "Logistique" },
        });
        let employee = parse_employee(&record).unwrap();
        assert_eq!(employee.name, "Awa Diallo");
        assert_eq!(employee.department.as_deref(), Some("Logistique"));
    }
}
