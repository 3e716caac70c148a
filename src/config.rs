// SPDX-License-Identifier: MPL-2.0
//! Engine configuration: tuning constants and per-session options.
//!
//! The engine does not persist any state; configuration is a plain value
//! resolved once at `start` and shared read-only with both decode loops.

use std::fmt;
use std::sync::Arc;

/// Minimum playback speed multiplier.
pub const MIN_PLAYBACK_SPEED: f32 = 0.25;

/// Maximum playback speed multiplier.
pub const MAX_PLAYBACK_SPEED: f32 = 4.0;

/// Speed changes below this are ignored to avoid needless resync churn.
pub const PLAYBACK_SPEED_EPSILON: f32 = 0.01;

/// Speed changes above this force a full resync-reference reset in both
/// loops, since the old wall-clock reference is no longer valid.
pub const SPEED_RESYNC_THRESHOLD: f32 = 0.05;

/// Preset speeds cycled by `PlaybackSpeed::increase`/`decrease`.
pub const PLAYBACK_SPEED_PRESETS: [f32; 9] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 3.0, 4.0];

/// Minimum volume (silence).
pub const MIN_VOLUME: f32 = 0.0;

/// Maximum volume (150%, amplification).
pub const MAX_VOLUME: f32 = 1.5;

/// Default volume (100%).
pub const DEFAULT_VOLUME: f32 = 1.0;

/// Volume step for increase/decrease operations.
pub const VOLUME_STEP: f32 = 0.1;

/// Bounded container probe size in bytes (keeps startup latency low).
pub const DEFAULT_PROBE_SIZE: usize = 1_048_576;

/// Bounded stream-analysis duration in microseconds.
pub const DEFAULT_ANALYZE_DURATION_US: i64 = 1_000_000;

/// Fixed PCM output format the audio loop resamples to.
///
/// Every emitted `AudioChunk` uses interleaved f32 samples at this rate and
/// channel count. Hosts driving a real device should construct the spec from
/// the device's native configuration so no second resample is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels (1 = mono, 2 = stereo).
    pub channels: u16,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

/// A candidate decoder presented to the selection policy.
///
/// Deliberately FFmpeg-agnostic so policies can be written and tested
/// without pulling decoder types into the public API.
#[derive(Debug, Clone)]
pub struct DecoderCandidate<'a> {
    /// Decoder implementation name (e.g. "h264", "libdav1d").
    pub name: &'a str,

    /// Whether the decoder advertises the hardware capability flag.
    pub is_hardware: bool,

    /// Whether the decoder is marked experimental.
    pub is_experimental: bool,
}

/// Decoder selection policy injected at configuration time.
///
/// Returns `true` to accept a candidate. The default policy rejects
/// hardware-only and experimental decoders, preferring the plain software
/// decoder FFmpeg offers for the stream's codec id.
pub type DecoderPolicy = Arc<dyn Fn(&DecoderCandidate<'_>) -> bool + Send + Sync>;

/// The default decoder policy: software decoders only.
#[must_use]
pub fn software_decoder_policy() -> DecoderPolicy {
    Arc::new(|candidate| !candidate.is_hardware && !candidate.is_experimental)
}

/// Per-session engine options, resolved at `start`.
#[derive(Clone)]
pub struct EngineOptions {
    /// Container probe size in bytes.
    pub probe_size: usize,

    /// Stream-analysis duration bound in microseconds.
    pub analyze_duration_us: i64,

    /// Output PCM format for the audio loop.
    pub audio_spec: AudioSpec,

    /// Decoder selection policy applied by both loops.
    pub decoder_policy: DecoderPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            probe_size: DEFAULT_PROBE_SIZE,
            analyze_duration_us: DEFAULT_ANALYZE_DURATION_US,
            audio_spec: AudioSpec::default(),
            decoder_policy: software_decoder_policy(),
        }
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("probe_size", &self.probe_size)
            .field("analyze_duration_us", &self.analyze_duration_us)
            .field("audio_spec", &self.audio_spec)
            .field("decoder_policy", &"<policy>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_audio_spec_is_cd_quality_stereo() {
        let spec = AudioSpec::default();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 2);
    }

    #[test]
    fn default_options_use_bounded_probe() {
        let options = EngineOptions::default();
        assert_eq!(options.probe_size, DEFAULT_PROBE_SIZE);
        assert_eq!(options.analyze_duration_us, DEFAULT_ANALYZE_DURATION_US);
    }

    #[test]
    fn software_policy_rejects_hardware_decoders() {
        let policy = software_decoder_policy();
        assert!(policy(&DecoderCandidate {
            name: "h264",
            is_hardware: false,
            is_experimental: false,
        }));
        assert!(!policy(&DecoderCandidate {
            name: "h264_rkmpp",
            is_hardware: true,
            is_experimental: false,
        }));
        assert!(!policy(&DecoderCandidate {
            name: "experimental_codec",
            is_hardware: false,
            is_experimental: true,
        }));
    }

    #[test]
    fn speed_bounds_are_sane() {
        assert!(MIN_PLAYBACK_SPEED > 0.0);
        assert!(MAX_PLAYBACK_SPEED > MIN_PLAYBACK_SPEED);
        assert!(PLAYBACK_SPEED_EPSILON < SPEED_RESYNC_THRESHOLD);
    }

    #[test]
    fn presets_are_sorted_and_within_bounds() {
        for pair in PLAYBACK_SPEED_PRESETS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(PLAYBACK_SPEED_PRESETS[0], MIN_PLAYBACK_SPEED);
        assert_eq!(
            PLAYBACK_SPEED_PRESETS[PLAYBACK_SPEED_PRESETS.len() - 1],
            MAX_PLAYBACK_SPEED
        );
    }
}
