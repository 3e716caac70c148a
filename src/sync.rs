// SPDX-License-Identifier: MPL-2.0
//! Audio/video synchronization policy.
//!
//! Audio is the master clock (standard practice for A/V sync): the audio
//! loop publishes its position, and the video loop paces frame emission
//! against it. When no audio track is active, video paces against wall
//! clock instead, and the audio loop paces itself with a drift estimator.
//!
//! # Pacing policy
//!
//! The tolerance is adaptive: one frame interval derived from the stream's
//! average frame rate, clamped to [10 ms, 80 ms] (40 ms when unknown). A
//! frame more than one interval ahead of the clock waits - first a
//! proportional sleep, then short increments re-reading the clock - up to
//! twice the interval, and is dropped if still ahead. A frame more than six
//! intervals behind is dropped immediately to fast-forward through backlog.

use crate::config::SPEED_RESYNC_THRESHOLD;
use crate::time_units;
use ffmpeg_next::Rational;
use std::time::{Duration, Instant};

/// Lower clamp for the adaptive pacing tolerance.
pub const MIN_FRAME_INTERVAL_MS: i64 = 10;

/// Upper clamp for the adaptive pacing tolerance.
pub const MAX_FRAME_INTERVAL_MS: i64 = 80;

/// Tolerance used when the stream does not report a frame rate.
pub const DEFAULT_FRAME_INTERVAL_MS: i64 = 40;

/// Max total wait for an early frame, in frame intervals.
const MAX_WAIT_FACTOR: i64 = 2;

/// Frames lagging by more than this many intervals are skipped outright.
const LAG_CUTOFF_FACTOR: i64 = 6;

/// Fraction of the measured lead slept before re-checking the clock.
const AHEAD_SLEEP_RATIO: f64 = 0.8;

/// Increment for the short re-check sleeps while waiting on the clock.
pub const PACE_INCREMENT: Duration = Duration::from_millis(5);

/// Residual lead below which an early frame is emitted anyway.
pub const PACE_SLACK_MS: i64 = 5;

/// Per-stream pacing thresholds.
#[derive(Debug, Clone, Copy)]
pub struct PacePolicy {
    frame_interval_ms: i64,
}

/// What to do with a decoded video frame relative to the audio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceDecision {
    /// Frame is due: emit immediately.
    Emit,

    /// Frame is early by `lead_ms`: wait, re-checking the clock.
    Ahead { lead_ms: i64 },

    /// Frame is hopelessly late: drop without waiting.
    Behind { lag_ms: i64 },
}

impl PacePolicy {
    /// Derives the policy from a stream's average frame rate.
    #[must_use]
    pub fn from_frame_rate(frame_rate: Rational) -> Self {
        let interval = time_units::frame_interval_ms(frame_rate)
            .unwrap_or(DEFAULT_FRAME_INTERVAL_MS)
            .clamp(MIN_FRAME_INTERVAL_MS, MAX_FRAME_INTERVAL_MS);
        Self {
            frame_interval_ms: interval,
        }
    }

    /// The adaptive tolerance in milliseconds.
    #[must_use]
    pub fn frame_interval_ms(&self) -> i64 {
        self.frame_interval_ms
    }

    /// Upper bound on the total time spent waiting for one early frame.
    #[must_use]
    pub fn max_wait_ms(&self) -> i64 {
        self.frame_interval_ms * MAX_WAIT_FACTOR
    }

    /// Classifies a frame against the audio clock.
    #[must_use]
    pub fn decide(&self, video_pts_ms: i64, audio_clock_ms: i64) -> PaceDecision {
        let diff = video_pts_ms - audio_clock_ms;
        if diff > self.frame_interval_ms {
            PaceDecision::Ahead { lead_ms: diff }
        } else if diff < -self.frame_interval_ms * LAG_CUTOFF_FACTOR {
            PaceDecision::Behind { lag_ms: -diff }
        } else {
            PaceDecision::Emit
        }
    }

    /// The proportional first sleep for an early frame, capped at the
    /// max-wait bound.
    #[must_use]
    pub fn initial_wait(&self, lead_ms: i64, speed: f32) -> Duration {
        let speed = f64::from(speed.max(0.01));
        let sleep_ms = (lead_ms as f64 * AHEAD_SLEEP_RATIO / speed) as i64;
        Duration::from_millis(sleep_ms.clamp(0, self.max_wait_ms()) as u64)
    }
}

/// Wall-clock frame pacer for video without an active audio track.
///
/// Sleeps out the PTS delta between consecutive frames, scaled by
/// 1/playback-speed. The reference is reset on the first frame after a
/// discontinuity, on PTS regression, and on speed changes.
#[derive(Debug)]
pub struct WallClockPacer {
    last_pts_ms: Option<i64>,
    reference: Option<Instant>,
    last_speed: f32,
}

impl Default for WallClockPacer {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClockPacer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_pts_ms: None,
            reference: None,
            last_speed: 1.0,
        }
    }

    /// Forgets the reference point (used after pause/seek).
    pub fn reset(&mut self) {
        self.last_pts_ms = None;
        self.reference = None;
    }

    /// Returns how long to wait before emitting the frame at `pts_ms`,
    /// or `None` when it is already due. Re-arms the reference on
    /// discontinuities instead of waiting.
    pub fn delay(&mut self, pts_ms: i64, speed: f32, now: Instant) -> Option<Duration> {
        if (speed - self.last_speed).abs() > SPEED_RESYNC_THRESHOLD {
            self.reset();
            self.last_speed = speed;
        }

        match (self.last_pts_ms, self.reference) {
            (Some(last_pts), Some(reference)) if pts_ms >= last_pts => {
                let due_ms = ((pts_ms - last_pts) as f64 / f64::from(speed.max(0.01))) as i64;
                let elapsed_ms = now.duration_since(reference).as_millis() as i64;
                if elapsed_ms < due_ms {
                    Some(Duration::from_millis((due_ms - elapsed_ms) as u64))
                } else {
                    None
                }
            }
            _ => {
                // First frame after a discontinuity, or PTS went backwards
                self.last_pts_ms = Some(pts_ms);
                self.reference = Some(now);
                None
            }
        }
    }

    /// Moves the reference to the just-emitted frame.
    pub fn advance(&mut self, pts_ms: i64, now: Instant) {
        self.last_pts_ms = Some(pts_ms);
        self.reference = Some(now);
    }
}

/// Smoothing factor of the drift moving average.
const DRIFT_EMA_ALPHA: f64 = 0.1;

/// Floor of the instantaneous-drift threshold in milliseconds.
const DRIFT_MIN_THRESHOLD_MS: f64 = 10.0;

/// Elapsed-time-scaled component of the drift threshold (1%).
const DRIFT_ELAPSED_RATIO: f64 = 0.01;

/// When the moving average exceeds this bound the start reference is
/// nudged instead of slept away, so latency does not compound.
const DRIFT_NUDGE_BOUND_MS: f64 = 50.0;

/// Fraction of the instantaneous drift slept when audio runs ahead.
const DRIFT_SLEEP_RATIO: f64 = 0.8;

/// What the audio loop should do after decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAction {
    /// Within tolerance, or catching up: continue immediately.
    InSync,

    /// Audio is ahead of wall clock: wait before emitting.
    Wait(Duration),
}

/// Tracks the difference between decoded audio timestamps and wall-clock
/// time since the first frame after a discontinuity.
///
/// The instantaneous difference triggers proportional waits (audio ahead) or
/// lets decoding continue (audio behind); the exponential moving average
/// nudges the start reference when it drifts past a fixed bound.
#[derive(Debug)]
pub struct DriftEstimator {
    reference: Option<Instant>,
    first_pts_ms: i64,
    avg_ms: f64,
    last_speed: f32,
}

impl Default for DriftEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl DriftEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reference: None,
            first_pts_ms: 0,
            avg_ms: 0.0,
            last_speed: 1.0,
        }
    }

    /// Discards the reference point. Called on seek, pause-resume, and
    /// track switches; the next observation re-arms it.
    pub fn reset(&mut self) {
        self.reference = None;
        self.avg_ms = 0.0;
    }

    /// Observes one decoded frame and decides whether to wait.
    pub fn observe(&mut self, pts_ms: i64, speed: f32, now: Instant) -> DriftAction {
        // A real speed change invalidates the old reference entirely;
        // force a discontinuity rather than adjust incrementally.
        if (speed - self.last_speed).abs() > SPEED_RESYNC_THRESHOLD {
            self.reset();
            self.last_speed = speed;
        }

        let Some(reference) = self.reference else {
            self.reference = Some(now);
            self.first_pts_ms = pts_ms;
            self.avg_ms = 0.0;
            return DriftAction::InSync;
        };

        let elapsed_ms = now.duration_since(reference).as_millis() as f64;
        let expected_ms = (pts_ms - self.first_pts_ms) as f64 / f64::from(speed.max(0.01));
        let instantaneous = expected_ms - elapsed_ms;

        self.avg_ms = self.avg_ms * (1.0 - DRIFT_EMA_ALPHA) + instantaneous * DRIFT_EMA_ALPHA;

        if self.avg_ms.abs() > DRIFT_NUDGE_BOUND_MS {
            // Persistent drift: move the reference instead of sleeping,
            // so one-off hiccups do not accumulate into latency.
            let nudge = Duration::from_millis(self.avg_ms.abs() as u64);
            self.reference = Some(if self.avg_ms > 0.0 {
                reference - nudge
            } else {
                reference + nudge
            });
            self.avg_ms = 0.0;
            return DriftAction::InSync;
        }

        let threshold = DRIFT_MIN_THRESHOLD_MS.max(elapsed_ms * DRIFT_ELAPSED_RATIO);
        if instantaneous > threshold {
            let sleep_ms = (instantaneous * DRIFT_SLEEP_RATIO) as u64;
            DriftAction::Wait(Duration::from_millis(sleep_ms))
        } else {
            // In sync, or behind: catch up by decoding without waiting
            DriftAction::InSync
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_30fps() -> PacePolicy {
        PacePolicy::from_frame_rate(Rational::new(30, 1))
    }

    #[test]
    fn interval_derived_from_frame_rate_and_clamped() {
        assert_eq!(policy_30fps().frame_interval_ms(), 33);
        // 240 fps clamps to the lower bound
        assert_eq!(
            PacePolicy::from_frame_rate(Rational::new(240, 1)).frame_interval_ms(),
            MIN_FRAME_INTERVAL_MS
        );
        // 5 fps clamps to the upper bound
        assert_eq!(
            PacePolicy::from_frame_rate(Rational::new(5, 1)).frame_interval_ms(),
            MAX_FRAME_INTERVAL_MS
        );
    }

    #[test]
    fn unknown_frame_rate_uses_default_interval() {
        let policy = PacePolicy::from_frame_rate(Rational::new(0, 1));
        assert_eq!(policy.frame_interval_ms(), DEFAULT_FRAME_INTERVAL_MS);
    }

    #[test]
    fn max_wait_is_double_the_interval() {
        assert_eq!(policy_30fps().max_wait_ms(), 66);
    }

    #[test]
    fn frame_within_tolerance_is_emitted() {
        let policy = policy_30fps();
        assert_eq!(policy.decide(10_000, 10_000), PaceDecision::Emit);
        assert_eq!(policy.decide(10_020, 10_000), PaceDecision::Emit);
        assert_eq!(policy.decide(9_900, 10_000), PaceDecision::Emit);
    }

    #[test]
    fn early_frame_waits() {
        let policy = policy_30fps();
        assert_eq!(
            policy.decide(10_100, 10_000),
            PaceDecision::Ahead { lead_ms: 100 }
        );
    }

    #[test]
    fn deeply_late_frame_is_dropped_without_waiting() {
        let policy = policy_30fps();
        // 6 intervals = 198 ms at 30 fps
        assert_eq!(
            policy.decide(9_000, 10_000),
            PaceDecision::Behind { lag_ms: 1_000 }
        );
        // Just inside the cutoff still emits (fast-forward territory ends)
        assert_eq!(policy.decide(9_850, 10_000), PaceDecision::Emit);
    }

    #[test]
    fn initial_wait_is_proportional_and_bounded() {
        let policy = policy_30fps();
        // 0.8 * 50 = 40 ms, below the 66 ms bound
        assert_eq!(policy.initial_wait(50, 1.0), Duration::from_millis(40));
        // Large leads are capped at max_wait
        assert_eq!(policy.initial_wait(1_000, 1.0), Duration::from_millis(66));
        // Higher speed shortens the wait
        assert_eq!(policy.initial_wait(50, 2.0), Duration::from_millis(20));
    }

    #[test]
    fn wall_pacer_first_frame_is_immediate() {
        let mut pacer = WallClockPacer::new();
        assert_eq!(pacer.delay(0, 1.0, Instant::now()), None);
    }

    #[test]
    fn wall_pacer_spaces_consecutive_frames() {
        let mut pacer = WallClockPacer::new();
        let t0 = Instant::now();
        assert_eq!(pacer.delay(0, 1.0, t0), None);
        pacer.advance(0, t0);

        // Next frame 40 ms later in stream time, no wall time elapsed
        let wait = pacer.delay(40, 1.0, t0).expect("should wait");
        assert_eq!(wait, Duration::from_millis(40));

        // Half the wall time has passed
        let wait = pacer.delay(40, 1.0, t0 + Duration::from_millis(25)).unwrap();
        assert_eq!(wait, Duration::from_millis(15));

        // Already overdue
        assert_eq!(pacer.delay(40, 1.0, t0 + Duration::from_millis(60)), None);
    }

    #[test]
    fn wall_pacer_scales_by_speed() {
        let mut pacer = WallClockPacer::new();
        let t0 = Instant::now();
        pacer.delay(0, 2.0, t0);
        pacer.advance(0, t0);

        // 40 ms of stream time at 2x is 20 ms of wall time
        let wait = pacer.delay(40, 2.0, t0).unwrap();
        assert_eq!(wait, Duration::from_millis(20));
    }

    #[test]
    fn wall_pacer_resets_on_pts_regression() {
        let mut pacer = WallClockPacer::new();
        let t0 = Instant::now();
        pacer.delay(5_000, 1.0, t0);
        pacer.advance(5_000, t0);

        // Backwards jump re-arms the reference instead of waiting
        assert_eq!(pacer.delay(1_000, 1.0, t0), None);
        // And the new reference is used for the following frame
        let wait = pacer.delay(1_040, 1.0, t0).unwrap();
        assert_eq!(wait, Duration::from_millis(40));
    }

    #[test]
    fn wall_pacer_resets_on_speed_change() {
        let mut pacer = WallClockPacer::new();
        let t0 = Instant::now();
        pacer.delay(0, 1.0, t0);
        pacer.advance(0, t0);

        // Speed change forces a reference reset: no wait for this frame
        assert_eq!(pacer.delay(40, 2.0, t0), None);
    }

    #[test]
    fn drift_first_observation_arms_reference() {
        let mut drift = DriftEstimator::new();
        assert_eq!(drift.observe(0, 1.0, Instant::now()), DriftAction::InSync);
    }

    #[test]
    fn drift_waits_when_audio_runs_ahead() {
        let mut drift = DriftEstimator::new();
        let t0 = Instant::now();
        drift.observe(0, 1.0, t0);

        // Decoded 1 s of audio in 600 ms of wall time: 400 ms ahead
        let action = drift.observe(1_000, 1.0, t0 + Duration::from_millis(600));
        match action {
            DriftAction::Wait(wait) => {
                assert_eq!(wait, Duration::from_millis(320)); // 0.8 * 400
            }
            DriftAction::InSync => panic!("expected a wait"),
        }
    }

    #[test]
    fn drift_does_not_wait_when_audio_is_behind() {
        let mut drift = DriftEstimator::new();
        let t0 = Instant::now();
        drift.observe(0, 1.0, t0);

        // Only 200 ms decoded in 500 ms of wall time: behind, keep going
        let action = drift.observe(200, 1.0, t0 + Duration::from_millis(500));
        assert_eq!(action, DriftAction::InSync);
    }

    #[test]
    fn drift_tolerates_small_differences() {
        let mut drift = DriftEstimator::new();
        let t0 = Instant::now();
        drift.observe(0, 1.0, t0);

        // 5 ms ahead is inside the 10 ms floor
        let action = drift.observe(505, 1.0, t0 + Duration::from_millis(500));
        assert_eq!(action, DriftAction::InSync);
    }

    #[test]
    fn drift_accounts_for_playback_speed() {
        let mut drift = DriftEstimator::new();
        let t0 = Instant::now();
        drift.observe(0, 2.0, t0);

        // 1 s of stream time at 2x should take 500 ms; exactly on time
        let action = drift.observe(1_000, 2.0, t0 + Duration::from_millis(500));
        assert_eq!(action, DriftAction::InSync);
    }

    #[test]
    fn speed_change_resets_the_reference() {
        let mut drift = DriftEstimator::new();
        let t0 = Instant::now();
        drift.observe(0, 1.0, t0);

        // Without the reset this would report 1 s of drift
        let action = drift.observe(2_000, 2.0, t0 + Duration::from_millis(500));
        assert_eq!(action, DriftAction::InSync);
    }

    #[test]
    fn persistent_lag_is_nudged_not_slept() {
        let mut drift = DriftEstimator::new();
        let t0 = Instant::now();
        drift.observe(0, 1.0, t0);

        // Audio persistently ~80 ms behind: every observation is InSync
        // (no artificial stall), and the EMA eventually nudges the
        // reference back to zero it out.
        let mut now = t0;
        for i in 1..60 {
            now = t0 + Duration::from_millis(i * 100 + 80);
            let action = drift.observe(i as i64 * 100, 1.0, now);
            assert_eq!(action, DriftAction::InSync);
        }
        // After the nudge the estimator reports in-sync for an on-time frame
        let action = drift.observe(6_000, 1.0, now + Duration::from_millis(80));
        assert_eq!(action, DriftAction::InSync);
    }
}
