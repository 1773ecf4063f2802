//! Shared value types and interval arithmetic for the dtk engine.
//!
//! Every instant inside the engine is a naive UTC [`chrono::NaiveDateTime`];
//! display timezones exist only at the alert-rendering boundary.

pub mod interval;
pub mod types;

pub use interval::Interval;
pub use types::{Direction, PipelineStep, SeasonalityData, SeriesPoint, TaskStatus};

use chrono::NaiveDateTime;

/// Canonical timestamp rendering used in queries, logs and alert messages.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current instant as a naive UTC timestamp.
pub fn now_utc() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Format a naive UTC instant with [`TIMESTAMP_FORMAT`].
pub fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}
