use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// Storage format used by Odoo datetime fields and the BioTime query params.
pub const PLAIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Odoo stores and expects naive UTC.
pub fn to_odoo(ts: DateTime<Utc>) -> String {
    ts.format(PLAIN_FORMAT).to_string()
}

pub fn parse_odoo(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), PLAIN_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a terminal timestamp. ISO strings carrying an offset are taken as
/// is; naive ones are interpreted in the terminal's local offset.
pub fn parse_terminal(value: &str, local: FixedOffset) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, PLAIN_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()?;

    local
        .from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Format a UTC instant in the terminal's local time, for query windows.
pub fn to_terminal(ts: DateTime<Utc>, local: FixedOffset) -> String {
    ts.with_timezone(&local).format(PLAIN_FORMAT).to_string()
}
