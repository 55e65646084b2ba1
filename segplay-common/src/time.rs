//! Frame/time conversions
//!
//! Playback position is tracked as a frame count; these helpers convert
//! between frames and wall-clock durations at a given sample rate.

use std::time::Duration;

/// Convert a frame count to a duration at `sample_rate`.
///
/// Returns `Duration::ZERO` for a zero sample rate.
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = sample_rate as u64;
    let secs = frames / rate;
    let rem = frames % rate;
    Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / rate)
}

/// Convert a duration to a frame count at `sample_rate`, rounded to the nearest frame.
///
/// Rounding keeps `duration_to_frames(frames_to_duration(n))` equal to `n`,
/// since `frames_to_duration` truncates to whole nanoseconds.
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    let nanos = duration.as_nanos();
    ((nanos * sample_rate as u128 + 500_000_000) / 1_000_000_000) as u64
}
