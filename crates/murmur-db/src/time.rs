//! Timestamps are stored as fixed-width RFC 3339 UTC strings
//! (`2026-01-02T03:04:05.123456Z`) so lexical order matches time order.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn encode(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Current time truncated to the stored precision, so values read back
/// compare equal to the ones written.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    decode(&encode(&now)).unwrap_or(now)
}
