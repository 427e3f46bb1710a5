//! The one place that touches wall-clock time, so everything else in this
//! crate stays a pure function of its arguments.

use chrono::Utc;

/// Current time as RFC 3339, the format every event log record's `ts`
/// field uses (spec §6).
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Current time as Unix epoch seconds, used for cooldown comparisons
/// (spec §4.7.3 `mainNotGreenRetryAfter`).
#[must_use]
pub fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}
