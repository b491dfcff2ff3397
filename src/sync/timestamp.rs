//! ISO-8601 timestamps.
//!
//! Timestamps are stored as RFC 3339 strings in UTC with millisecond
//! precision. Comparison always goes through [`parse`] so that values written
//! by other clients (date-only, no offset, different precision) still order
//! correctly.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Current time in the canonical storage format.
#[must_use]
pub fn now() -> String {
    format(Utc::now())
}

/// Format a UTC instant in the canonical storage format.
#[must_use]
pub fn format(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts full RFC 3339, naive date-times (assumed UTC) and bare dates
/// (midnight UTC). Returns `None` for anything else.
#[must_use]
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Returns true if `candidate` is strictly later than `since`.
///
/// A missing watermark admits everything. Unparseable values fall back to
/// string comparison, which is correct for same-format ISO-8601.
#[must_use]
pub fn is_after(candidate: &str, since: Option<&str>) -> bool {
    let Some(since) = since else {
        return true;
    };
    match (parse(candidate), parse(since)) {
        (Some(c), Some(s)) => c > s,
        _ => candidate > since,
    }
}
