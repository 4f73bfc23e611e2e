//! Clock and timing utilities for the output timeline.
//!
//! The render loop drives a fixed-cadence timeline of ticks. Tick `i`
//! sits at `i / fps` seconds; all math here stays in integers where the
//! result feeds a timestamp or a keyframe decision so that cadence never
//! drifts with floating point error.

use std::time::Instant;

/// Microseconds per second, the unit of encoder timestamps.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Fixed-rate output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    fps: u32,
}

impl FrameClock {
    /// Create a clock at the given frame rate (clamped to at least 1).
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Number of whole frame intervals in `duration_secs`.
    ///
    /// The loop executes `total_frames + 1` ticks (`0..=total_frames`), so
    /// no tick lands past the end of the output.
    pub fn total_frames(&self, duration_secs: f64) -> u64 {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return 0;
        }
        (duration_secs * self.fps as f64).floor() as u64
    }

    /// Timeline position of tick `index` in seconds.
    pub fn tick_secs(&self, index: u64) -> f64 {
        index as f64 / self.fps as f64
    }

    /// Encoder timestamp of tick `index` in microseconds.
    pub fn tick_timestamp_us(&self, index: u64) -> u64 {
        index * MICROS_PER_SEC / self.fps as u64
    }

    /// Duration of one frame in microseconds.
    pub fn frame_duration_us(&self) -> u64 {
        MICROS_PER_SEC / self.fps as u64
    }

    /// Whether tick `index` lands exactly on a keyframe boundary.
    ///
    /// Equivalent to `(index / fps) mod interval_secs == 0` evaluated
    /// exactly. An interval of zero marks only tick 0.
    pub fn is_keyframe(&self, index: u64, interval_secs: u32) -> bool {
        let period = self.fps as u64 * interval_secs as u64;
        if period == 0 {
            return index == 0;
        }
        index % period == 0
    }
}

/// Convert a container timestamp in `timescale` units to seconds.
pub fn ticks_to_secs(timestamp: i64, timescale: u32) -> f64 {
    if timescale == 0 {
        return 0.0;
    }
    timestamp as f64 / timescale as f64
}

/// Convert seconds to container timestamp units, rounding down.
pub fn secs_to_ticks(secs: f64, timescale: u32) -> i64 {
    (secs * timescale as f64).floor() as i64
}

/// Wall-clock stopwatch for a render run.
#[derive(Debug, Clone)]
pub struct RenderClock {
    started: Instant,
    started_wall: String,
}

impl RenderClock {
    /// Start a stopwatch anchored to now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Wall-clock time at start (RFC 3339).
    pub fn started_wall(&self) -> &str {
        &self.started_wall
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Estimated seconds remaining given `done` of `total` units.
    pub fn eta_secs(&self, done: u64, total: u64) -> f64 {
        if done == 0 || total <= done {
            return 0.0;
        }
        let per_unit = self.elapsed_secs() / done as f64;
        per_unit * (total - done) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_total_frames_rounds_down() {
        let clock = FrameClock::new(10);
        assert_eq!(clock.total_frames(1.0), 10);
        assert_eq!(clock.total_frames(1.05), 10);
        assert_eq!(clock.total_frames(1.15), 11);
        assert!(clock.tick_secs(clock.total_frames(1.05)) <= 1.05);
        assert_eq!(clock.total_frames(0.0), 0);
        assert_eq!(clock.total_frames(f64::NAN), 0);
    }

    #[test]
    fn test_tick_timestamps() {
        let clock = FrameClock::new(24);
        assert_eq!(clock.tick_timestamp_us(0), 0);
        assert_eq!(clock.tick_timestamp_us(24), 1_000_000);
        assert_eq!(clock.tick_timestamp_us(1), 41_666);
        assert!((clock.tick_secs(48) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_keyframe_every_eight_seconds() {
        let clock = FrameClock::new(10);
        assert!(clock.is_keyframe(0, 8));
        assert!(!clock.is_keyframe(10, 8));
        assert!(clock.is_keyframe(80, 8));
        assert!(clock.is_keyframe(0, 0));
        assert!(!clock.is_keyframe(5, 0));
    }

    #[test]
    fn test_ticks_to_secs() {
        assert!((ticks_to_secs(90_000, 90_000) - 1.0).abs() < 1e-12);
        assert_eq!(ticks_to_secs(5, 0), 0.0);
        assert_eq!(secs_to_ticks(2.5, 1000), 2500);
    }

    #[test]
    fn test_eta_without_progress_is_zero() {
        let clock = RenderClock::start();
        assert_eq!(clock.eta_secs(0, 100), 0.0);
        assert_eq!(clock.eta_secs(100, 100), 0.0);
    }

    proptest! {
        #[test]
        fn keyframe_matches_float_definition(fps in 1u32..120, index in 0u64..20_000) {
            let clock = FrameClock::new(fps);
            let current = index as f64 / fps as f64;
            let float_rule = current % 8.0 == 0.0;
            prop_assert_eq!(clock.is_keyframe(index, 8), float_rule);
        }

        #[test]
        fn timestamps_are_monotonic(fps in 1u32..240, index in 0u64..100_000) {
            let clock = FrameClock::new(fps);
            prop_assert!(clock.tick_timestamp_us(index + 1) > clock.tick_timestamp_us(index));
        }
    }
}
