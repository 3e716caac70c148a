// SPDX-License-Identifier: MPL-2.0
//! Time unit conversions between stream time bases and milliseconds.
//!
//! All engine-facing timestamps are milliseconds (`i64`), matching the
//! control surface (`seek(ms)`) and the output events (`PositionChanged`,
//! `DurationChanged`). Stream-local timestamps are converted at the decode
//! loop boundary using the stream's time base.

use ffmpeg_next::Rational;

/// Microseconds per millisecond; FFmpeg's global `AV_TIME_BASE` is 1 µs.
const MICROS_PER_MILLI: i64 = 1_000;

/// Converts a stream timestamp into milliseconds using the stream time base.
///
/// Uses 128-bit intermediate math so long streams with fine-grained time
/// bases (e.g. 1/90000) cannot overflow.
#[must_use]
pub fn ts_to_ms(ts: i64, time_base: Rational) -> i64 {
    let num = i128::from(time_base.numerator());
    let den = i128::from(time_base.denominator());
    if den == 0 {
        return 0;
    }
    (i128::from(ts) * num * 1_000 / den) as i64
}

/// Converts milliseconds into FFmpeg's global time base (microseconds),
/// as used by container-level seeking.
#[must_use]
pub fn ms_to_av_time_base(ms: i64) -> i64 {
    ms.saturating_mul(MICROS_PER_MILLI)
}

/// Converts a container duration (in `AV_TIME_BASE` microseconds) into
/// milliseconds. Unknown or negative durations map to 0.
#[must_use]
pub fn duration_us_to_ms(duration_us: i64) -> i64 {
    if duration_us < 0 {
        0
    } else {
        duration_us / MICROS_PER_MILLI
    }
}

/// Derives the frame interval in milliseconds from a stream frame rate.
///
/// Returns `None` when the rate is unknown (zero numerator or denominator).
#[must_use]
pub fn frame_interval_ms(frame_rate: Rational) -> Option<i64> {
    if frame_rate.numerator() <= 0 || frame_rate.denominator() <= 0 {
        return None;
    }
    Some(i64::from(frame_rate.denominator()) * 1_000 / i64::from(frame_rate.numerator()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_to_ms_converts_common_time_bases() {
        // 1/1000 time base: timestamps already are milliseconds
        assert_eq!(ts_to_ms(1_500, Rational::new(1, 1_000)), 1_500);
        // 1/90000 (MPEG-TS): 90_000 ticks = 1 second
        assert_eq!(ts_to_ms(90_000, Rational::new(1, 90_000)), 1_000);
        assert_eq!(ts_to_ms(45_000, Rational::new(1, 90_000)), 500);
    }

    #[test]
    fn ts_to_ms_handles_zero_denominator() {
        assert_eq!(ts_to_ms(1_000, Rational::new(1, 0)), 0);
    }

    #[test]
    fn ts_to_ms_does_not_overflow_long_streams() {
        // 24 hours at 1/90000
        let ts = 24_i64 * 60 * 60 * 90_000;
        assert_eq!(ts_to_ms(ts, Rational::new(1, 90_000)), 86_400_000);
    }

    #[test]
    fn ms_to_av_time_base_is_microseconds() {
        assert_eq!(ms_to_av_time_base(1), 1_000);
        assert_eq!(ms_to_av_time_base(30_000), 30_000_000);
    }

    #[test]
    fn duration_us_to_ms_maps_unknown_to_zero() {
        assert_eq!(duration_us_to_ms(-1), 0);
        assert_eq!(duration_us_to_ms(60_000_000), 60_000);
    }

    #[test]
    fn frame_interval_from_common_rates() {
        assert_eq!(frame_interval_ms(Rational::new(25, 1)), Some(40));
        assert_eq!(frame_interval_ms(Rational::new(30, 1)), Some(33));
        assert_eq!(frame_interval_ms(Rational::new(30_000, 1_001)), Some(33));
    }

    #[test]
    fn frame_interval_unknown_rate_is_none() {
        assert_eq!(frame_interval_ms(Rational::new(0, 1)), None);
        assert_eq!(frame_interval_ms(Rational::new(25, 0)), None);
    }
}
