//! Shared helpers and constants.

use chrono::Utc;

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Current wall clock in nanoseconds, the unit content log timestamps use.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
