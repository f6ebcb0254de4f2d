pub mod error;
pub mod fees;
pub mod grades;
pub mod model;
pub mod rules;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};

pub use error::{LedgerError, LedgerResult};

/// Who issued a request. Supplied by the caller, used only for audit
/// attribution and payment bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_stamp() -> String {
    stamp(Utc::now())
}

pub fn days_from_now(days: i64) -> String {
    stamp(Utc::now() + Duration::days(days))
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date_input(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
