use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use dotenvy::dotenv;

use crate::error::ConfigError;
use crate::sync::reconciler::{ReconcilePolicy, UnknownDirectionRule};
use crate::sync::retry::RetryPolicy;

/// Bounds for hour-valued settings and CLI arguments (one year).
pub const HOURS_RANGE: RangeInclusive<i64> = 1..=24 * 366;
/// Bounds for day-valued settings and CLI arguments (ten years).
pub const DAYS_RANGE: RangeInclusive<i64> = 1..=3660;
/// Bounds for minute-valued settings and CLI arguments (one day).
pub const MINUTES_RANGE: RangeInclusive<i64> = 1..=24 * 60;

#[derive(Clone, Debug)]
pub struct BioTimeConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub utc_offset: FixedOffset,
}

#[derive(Clone, Debug)]
pub struct OdooConfig {
    pub url: String,
    pub db: String,
    pub user: String,
    pub api_key: String,

    /// Boolean field flagged on sessions closed by the janitor, if the
    /// target model has one
    pub auto_close_field: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub biotime: BioTimeConfig,
    pub odoo: OdooConfig,
    pub terminal_id: String,
    pub http_timeout: Duration,

    // Reconciliation
    pub min_punch_interval_minutes: i64,
    pub unknown_direction_rule: UnknownDirectionRule,
    pub trust_device_direction: bool,
    pub name_match_threshold: f64,
    pub mapping_ttl_hours: i64,

    // Scheduling
    pub sync_interval_minutes: i64,
    pub stale_threshold_hours: i64,
    pub stale_close_after_hours: Option<i64>,
    pub initial_lookback_days: i64,
    pub retry: RetryPolicy,

    // Storage and logs
    pub data_dir: PathBuf,
    pub checkpoint_database_url: Option<String>,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` is this over the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let offset_minutes: i32 = vars.parse_or("TERMINAL_UTC_OFFSET_MINUTES", 0)?;
        let utc_offset =
            FixedOffset::east_opt(offset_minutes * 60).ok_or(ConfigError::Invalid {
                key: "TERMINAL_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
            })?;

        let retry = RetryPolicy {
            max_attempts: vars.parse_or("RETRY_MAX_ATTEMPTS", 4)?,
            base_delay: Duration::from_millis(vars.parse_or("RETRY_BASE_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(vars.parse_or("RETRY_MAX_DELAY_MS", 30_000)?),
            backoff_factor: vars.parse_or("RETRY_BACKOFF_FACTOR", 2.0)?,
            jitter: vars.parse_or("RETRY_JITTER", 0.1)?,
        };

        Ok(Self {
            biotime: BioTimeConfig {
                url: vars.required("BIOTIME_URL")?,
                username: vars.required("BIOTIME_USERNAME")?,
                password: vars.required("BIOTIME_PASSWORD")?,
                utc_offset,
            },
            odoo: OdooConfig {
                url: vars.required("ODOO_URL")?,
                db: vars.required("ODOO_DB")?,
                user: vars.required("ODOO_USER")?,
                api_key: vars.required("ODOO_API_KEY")?,
                auto_close_field: vars.optional("ODOO_AUTO_CLOSE_FIELD"),
            },
            terminal_id: vars.optional("TERMINAL_ID").unwrap_or_else(|| "default".to_string()),
            http_timeout: Duration::from_secs(vars.parse_or("HTTP_TIMEOUT_SECS", 30)?),

            min_punch_interval_minutes: vars.parse_in(
                "MIN_PUNCH_INTERVAL_MINUTES",
                2,
                MINUTES_RANGE,
            )?,
            unknown_direction_rule: vars
                .parse_or("UNKNOWN_DIRECTION_RULE", UnknownDirectionRule::Toggle)?,
            trust_device_direction: vars.parse_or("TRUST_DEVICE_DIRECTION", true)?,
            name_match_threshold: vars.parse_or("NAME_MATCH_THRESHOLD", 0.85)?,
            mapping_ttl_hours: vars.parse_in("MAPPING_TTL_HOURS", 24, HOURS_RANGE)?,

            sync_interval_minutes: vars.parse_in("SYNC_INTERVAL_MINUTES", 10, MINUTES_RANGE)?,
            stale_threshold_hours: vars.parse_in("STALE_THRESHOLD_HOURS", 24, HOURS_RANGE)?,
            stale_close_after_hours: vars.parse_opt_in("STALE_CLOSE_AFTER_HOURS", HOURS_RANGE)?,
            initial_lookback_days: vars.parse_in("INITIAL_LOOKBACK_DAYS", 7, DAYS_RANGE)?,
            retry,

            data_dir: vars
                .optional("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/pointage")),
            checkpoint_database_url: vars.optional("CHECKPOINT_DATABASE_URL"),
            log_dir: vars
                .optional("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
        })
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            min_interval: chrono::Duration::minutes(self.min_punch_interval_minutes),
            unknown_rule: self.unknown_direction_rule,
            trust_device_direction: self.trust_device_direction,
            dangling_close_after: self.stale_close_after().unwrap_or(self.stale_threshold()),
        }
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_threshold_hours)
    }

    /// Fixed length given to auto-closed sessions, when configured.
    pub fn stale_close_after(&self) -> Option<chrono::Duration> {
        self.stale_close_after_hours.map(chrono::Duration::hours)
    }

    pub fn mapping_ttl(&self) -> Duration {
        Duration::from_secs(self.mapping_ttl_hours.unsigned_abs() * 3600)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.unsigned_abs() * 60)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank are the same thing in a `.env` file.
    fn optional(&self, key: &'static str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_opt<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.optional(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn parse_opt_in<T>(
        &self,
        key: &'static str,
        range: RangeInclusive<T>,
    ) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + PartialOrd + Display,
    {
        match self.parse_opt(key)? {
            Some(value) if !range.contains(&value) => Err(ConfigError::Invalid {
                key,
                value: value.to_string(),
            }),
            parsed => Ok(parsed),
        }
    }

    fn parse_in<T>(
        &self,
        key: &'static str,
        default: T,
        range: RangeInclusive<T>,
    ) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Display,
    {
        Ok(self.parse_opt_in(key, range)?.unwrap_or(default))
    }
}
