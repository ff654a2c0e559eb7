//! Timestamp and duration formats used in the ledger.

use chrono::{DateTime, Local};

/// Format of every timestamp written to the ledger.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Date stamp embedded in generated container names.
pub const DATE_STAMP_FORMAT: &str = "%Y%m%d";

/// The current local time.
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Render a timestamp for the ledger.
pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Elapsed seconds between two instants, with millisecond precision.
///
/// Negative spans (clock adjustments) are clamped to zero.
pub fn format_duration(start: &DateTime<Local>, end: &DateTime<Local>) -> String {
    let millis = end.signed_duration_since(*start).num_milliseconds().max(0);
    format!("{}.{:03}", millis / 1000, millis % 1000)
}

/// Date stamp for container names, e.g. `20250702`.
pub fn date_stamp(ts: &DateTime<Local>) -> String {
    ts.format(DATE_STAMP_FORMAT).to_string()
}
