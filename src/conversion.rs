//! Internal timestamp helpers.
//!
//! Conversions between FFmpeg presentation timestamps, expressed in a
//! stream time base, and wall-clock positions.

use std::time::Duration;

use ffmpeg_next::Rational;

/// Rescale a PTS value from stream time base to seconds.
pub fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Rescale seconds to the nearest PTS in `time_base`.
pub fn seconds_to_pts(seconds: f64, time_base: Rational) -> i64 {
    let numerator = time_base.numerator() as f64;
    let denominator = time_base.denominator() as f64;
    (seconds * denominator / numerator).round() as i64
}

/// Position of `pts` relative to the stream start, clamped at zero.
///
/// `start` is the stream's first PTS, if the container declares one.
pub fn pts_to_position(pts: i64, start: Option<i64>, time_base: Rational) -> Duration {
    let offset = pts.saturating_sub(start.unwrap_or(0));
    let seconds = pts_to_seconds(offset, time_base);
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// Convert an AV_TIME_BASE (microsecond) container duration.
pub fn container_duration(microseconds: i64) -> Duration {
    if microseconds > 0 {
        Duration::from_micros(microseconds as u64)
    } else {
        Duration::ZERO
    }
}
