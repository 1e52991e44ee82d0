use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};

/// Wall-clock capture time in seconds since the Unix epoch.
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Timestamp encoded as integer microseconds, the on-disk naming unit.
pub fn timestamp_micros(ts: f64) -> u64 {
    if ts.is_finite() && ts > 0.0 {
        (ts * 1e6) as u64
    } else {
        0
    }
}

/// `HH:MM:SS` for a non-negative offset in seconds.
pub fn format_hms(secs: f64) -> String {
    let total = if secs.is_finite() { secs.max(0.0) as u64 } else { 0 };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Local-time stamp used for export directory and file names.
pub fn moment_stamp(ts: f64) -> String {
    let secs = ts.floor() as i64;
    match Local.timestamp_opt(secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d_%H-%M-%S").to_string(),
        None => format!("{}", secs),
    }
}
