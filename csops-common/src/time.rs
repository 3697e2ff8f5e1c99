//! Timestamp utilities
//!
//! All timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! millisecond precision, so lexicographic order in SQL equals time order.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current UTC timestamp formatted for storage
pub fn now_db() -> String {
    to_db(now())
}

/// Today's date (UTC) as `YYYY-MM-DD`
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Parse a stored RFC 3339 timestamp, returning None for malformed input
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a stored `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}
