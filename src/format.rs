//! Human-readable formatting for byte counts, durations and log timestamps.

use chrono::{DateTime, Local};
use std::time::Duration;

const IEC_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Format used for every timestamp written to the log, e.g. `Mar  7 14:02:11.045`.
pub const TIMESTAMP_FORMAT: &str = "%b %e %H:%M:%S%.3f";

/// Formats a byte count with binary (IEC) units.
///
/// Values below 10 of a unit keep one decimal (`1.5 GiB`), larger values are
/// rounded to whole units (`512 MiB`). Plain bytes are never fractional.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut exponent = 0;
    while value >= 1024.0 && exponent < IEC_UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }
    let rounded = (value * 10.0 + 0.5).floor() / 10.0;

    if rounded < 10.0 {
        format!("{:.1} {}", rounded, IEC_UNITS[exponent])
    } else {
        format!("{:.0} {}", rounded, IEC_UNITS[exponent])
    }
}

/// Formats an elapsed duration as `1m 02.345s` or `2.345s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    let mins = total_secs / 60;
    let secs = total_secs % 60;

    if mins > 0 {
        format!("{}m {:02}.{:03}s", mins, secs, millis)
    } else {
        format!("{}.{:03}s", secs, millis)
    }
}

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
