// SPDX-License-Identifier: MPL-2.0
//! Time unit conversion utilities for the playback engine.
//!
//! The engine keeps every timestamp as signed microseconds (`i64`): source
//! timestamps, clock positions, delays and read-ahead. These helpers convert
//! at the edges, where `Duration`, seconds or sample counts are needed.
//!
//! # Constants
//!
//! - `MICROS_PER_SECOND`: 1,000,000 (f64 for calculations)

use std::time::Duration;

/// Microseconds per second as f64 for calculations.
pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Converts PTS seconds to microseconds.
///
/// # Examples
///
/// ```
/// use avsync::player::time_units::pts_to_micros;
///
/// assert_eq!(pts_to_micros(1.0), 1_000_000);
/// assert_eq!(pts_to_micros(0.5), 500_000);
/// ```
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn pts_to_micros(pts_secs: f64) -> i64 {
    (pts_secs * MICROS_PER_SECOND) as i64
}

/// Converts microseconds to seconds (f64), for logging.
///
/// # Examples
///
/// ```
/// use avsync::player::time_units::micros_to_secs;
///
/// assert_eq!(micros_to_secs(1_500_000), 1.5);
/// ```
#[inline]
#[allow(clippy::cast_precision_loss)]
pub fn micros_to_secs(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SECOND
}

/// Converts a signed microsecond delay to a `Duration`. Negative values
/// become zero.
#[inline]
#[allow(clippy::cast_sign_loss)]
pub fn micros_to_duration(micros: i64) -> Duration {
    Duration::from_micros(micros.max(0) as u64)
}

/// Converts a `Duration` to signed microseconds, saturating at `i64::MAX`.
#[inline]
pub fn duration_to_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Converts a number of sample frames at `sample_rate_hz` to microseconds.
///
/// Returns 0 for a zero sample rate.
#[inline]
pub fn frames_to_micros(frames: u64, sample_rate_hz: u32) -> i64 {
    if sample_rate_hz == 0 {
        return 0;
    }
    let micros = u128::from(frames) * 1_000_000 / u128::from(sample_rate_hz);
    i64::try_from(micros).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_to_micros_converts_correctly() {
        assert_eq!(pts_to_micros(1.0), 1_000_000);
        assert_eq!(pts_to_micros(0.0), 0);
        assert_eq!(pts_to_micros(1.234567), 1_234_567);
    }

    #[test]
    fn micros_to_secs_converts_correctly() {
        assert_eq!(micros_to_secs(1_000_000), 1.0);
        assert_eq!(micros_to_secs(-500_000), -0.5);
    }

    #[test]
    fn negative_delay_becomes_zero_duration() {
        assert_eq!(micros_to_duration(-40_000), Duration::ZERO);
        assert_eq!(micros_to_duration(40_000), Duration::from_millis(40));
    }

    #[test]
    fn duration_round_trip_within_microsecond() {
        let duration = Duration::from_micros(1_234_567);
        assert_eq!(micros_to_duration(duration_to_micros(duration)), duration);
    }

    #[test]
    fn sample_frames_to_micros() {
        assert_eq!(frames_to_micros(44_100, 44_100), 1_000_000);
        assert_eq!(frames_to_micros(480, 48_000), 10_000);
        assert_eq!(frames_to_micros(480, 0), 0);
    }

    #[test]
    fn handles_large_durations() {
        // 24 hours of audio at 48 kHz
        let day_frames = 24 * 60 * 60 * 48_000_u64;
        assert_eq!(frames_to_micros(day_frames, 48_000), 86_400_000_000);
    }
}
