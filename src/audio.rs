// SPDX-License-Identifier: MPL-2.0
//! Audio decode loop: the authoritative clock source.
//!
//! Mirrors the video loop's state machine on its own worker thread and
//! container handle. For every decoded frame with a valid timestamp the
//! loop publishes the audio clock before resampling and emission, so the
//! video loop observes the position promptly. Decoded audio is resampled
//! to the engine's fixed output format (interleaved f32).
//!
//! With no audio track selected (muted), the loop emits fixed-size silence
//! chunks on a matching cadence so downstream output timing stays
//! continuous, without decoding or advancing the clock.

use crate::config::{AudioSpec, EngineOptions};
use crate::error::{Error, MediaError, Result};
use crate::events::{AudioChunk, EventSink, PlayerEvent};
use crate::probe;
use crate::shared::{LoopKind, SharedState};
use crate::sync::{DriftAction, DriftEstimator};
use crate::time_units;
use ffmpeg_next::software::resampling;
use ffmpeg_next::{format, frame, media, ChannelLayout, Rational};
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frames per silence chunk while muted (~23 ms at 44.1 kHz).
const SILENCE_FRAMES: usize = 1024;

/// Bounded wait at end-of-stream before re-checking state.
const EOF_WAIT: Duration = Duration::from_millis(40);

/// The audio worker. Constructed by the player facade and consumed by
/// `run` on the spawned thread.
pub(crate) struct AudioLoop {
    pub shared: Arc<SharedState>,
    pub sink: Arc<dyn EventSink>,
    pub path: PathBuf,
    pub options: Arc<EngineOptions>,
}

/// Per-track decode context, rebuilt whenever the active track changes.
struct AudioSession {
    stream_index: usize,
    decoder: ffmpeg_next::decoder::Audio,
    resampler: resampling::Context,
    time_base: Rational,
}

impl AudioLoop {
    /// Thread entry point. Fatal-per-session errors are reported through
    /// the sink; the video loop is unaffected.
    pub fn run(self) {
        if let Err(err) = self.decode_session() {
            warn!("audio loop terminated: {err}");
            self.sink.emit(PlayerEvent::Error(err.to_string()));
        }
        debug!("audio loop finished");
    }

    fn decode_session(&self) -> Result<()> {
        let mut ictx = probe::open_input(&self.path, &self.options)?;

        let tracks = probe::enumerate_tracks(&ictx, media::Type::Audio);
        self.shared.publish_tracks(LoopKind::Audio, tracks);

        let spec = self.options.audio_spec;
        let silence = silence_samples(spec);
        let silence_interval =
            Duration::from_secs_f64(SILENCE_FRAMES as f64 / f64::from(spec.sample_rate));

        let mut session: Option<AudioSession> = None;
        let mut drift = DriftEstimator::new();

        loop {
            let view = self.shared.view(LoopKind::Audio);
            if view.stopped {
                break;
            }

            let Some(stream_index) = view.stream_index else {
                // Muted: keep downstream output fed with silence, and keep
                // taking part in the seek handshake so seeks can complete.
                session = None;
                if let Some((epoch, target_ms)) = view.seek {
                    // No decoder state to discard; preset the clock so
                    // position reporting lands on the target.
                    self.shared.set_clock_ms(target_ms);
                    if self.shared.acknowledge_seek(LoopKind::Audio, epoch) {
                        self.sink.emit(PlayerEvent::SeekCompleted);
                    }
                    continue;
                }
                if view.paused {
                    self.shared.wait_while_paused(LoopKind::Audio);
                    continue;
                }
                self.sink.emit(PlayerEvent::AudioReady(AudioChunk {
                    samples: Arc::clone(&silence),
                    sample_rate: spec.sample_rate,
                    channels: spec.channels,
                    pts_ms: self.shared.clock_ms(),
                }));
                self.shared
                    .interruptible_sleep(LoopKind::Audio, silence_interval);
                continue;
            };

            let needs_rebuild = session
                .as_ref()
                .map_or(true, |s| s.stream_index != stream_index);
            if needs_rebuild {
                session = Some(self.open_session(&ictx, stream_index)?);
                drift.reset();
                // The clock restarts with the first frame of the new track.
                self.shared.set_clock_ms(0);
            }
            let Some(current) = session.as_mut() else {
                continue;
            };

            // Seek is handled before pause: a seek arriving mid-pause is
            // acknowledged first, then the loop parks again.
            if let Some((epoch, target_ms)) = view.seek {
                let ts = time_units::ms_to_av_time_base(target_ms);
                if let Err(e) = ictx.seek(ts, ..ts) {
                    warn!("audio seek to {target_ms} ms failed: {e}");
                }
                self.reset_session(current);
                drift.reset();
                // Clock restarts at the first post-seek frame.
                self.shared.set_clock_ms(0);
                if self.shared.acknowledge_seek(LoopKind::Audio, epoch) {
                    self.sink.emit(PlayerEvent::SeekCompleted);
                }
                // Do not process data read before the seek this iteration.
                continue;
            }

            if view.paused {
                self.shared.wait_while_paused(LoopKind::Audio);
                // Decoder and resampler history must not bleed across the gap.
                self.reset_session(current);
                drift.reset();
                continue;
            }

            let packet = match ictx.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != current.stream_index {
                        continue;
                    }
                    packet
                }
                None => {
                    self.shared.set_eof();
                    self.shared.wait_eof(LoopKind::Audio, EOF_WAIT);
                    continue;
                }
            };

            if let Err(e) = current.decoder.send_packet(&packet) {
                // Transient: skip this packet, keep decoding.
                debug!("audio packet rejected: {e}");
                continue;
            }

            self.drain_frames(current, &mut drift, spec);
        }

        Ok(())
    }

    fn open_session(
        &self,
        ictx: &format::context::Input,
        stream_index: usize,
    ) -> Result<AudioSession> {
        let stream = ictx.stream(stream_index).ok_or_else(|| {
            Error::Media(MediaError::Other(format!(
                "audio stream {stream_index} vanished from container"
            )))
        })?;

        let decoder = probe::open_audio_decoder(&stream, &self.options.decoder_policy)?;
        let resampler = self.build_resampler(&decoder)?;
        debug!(
            "audio session: stream {} {} Hz {} ch",
            stream_index,
            decoder.rate(),
            decoder.channels()
        );

        Ok(AudioSession {
            stream_index,
            decoder,
            resampler,
            time_base: stream.time_base(),
        })
    }

    /// Builds a resampler from the decoder's native format to the fixed
    /// output format (interleaved f32 at the configured rate and layout).
    fn build_resampler(
        &self,
        decoder: &ffmpeg_next::decoder::Audio,
    ) -> Result<resampling::Context> {
        let spec = self.options.audio_spec;
        let output_layout = match spec.channels {
            1 => ChannelLayout::MONO,
            _ => ChannelLayout::STEREO, // Downmix anything else to stereo
        };

        resampling::Context::get(
            decoder.format(),
            decoder.channel_layout(),
            decoder.rate(),
            format::Sample::F32(format::sample::Type::Packed),
            output_layout,
            spec.sample_rate,
        )
        .map_err(|e| {
            Error::Media(MediaError::DecodingFailed(format!(
                "failed to create resampler: {e}"
            )))
        })
    }

    /// Flushes decoder state and rebuilds the resampler across a
    /// discontinuity (seek or pause-resume). A resampler rebuild failure
    /// is transient: the old context keeps serving until the next rebuild.
    fn reset_session(&self, session: &mut AudioSession) {
        session.decoder.flush();
        match self.build_resampler(&session.decoder) {
            Ok(resampler) => session.resampler = resampler,
            Err(e) => warn!("keeping stale resampler: {e}"),
        }
    }

    /// Receives all frames buffered in the decoder, clocking, pacing and
    /// emitting each one. Returns early when stop, pause, or a seek
    /// arrives.
    fn drain_frames(&self, session: &mut AudioSession, drift: &mut DriftEstimator, spec: AudioSpec) {
        let mut decoded = frame::Audio::empty();

        while session.decoder.receive_frame(&mut decoded).is_ok() {
            let view = self.shared.view(LoopKind::Audio);
            if view.stopped || view.paused || view.seek.is_some() {
                break;
            }

            if decoded.samples() == 0 {
                continue;
            }

            let Some(ts) = decoded.timestamp() else {
                debug!("dropping audio frame without timestamp");
                continue;
            };
            let pts_ms = time_units::ts_to_ms(ts, session.time_base);
            if pts_ms < 0 {
                // Negative timestamps cause startup jitter; always drop.
                continue;
            }

            // Publish before resampling so the video loop observes the
            // position promptly.
            self.shared.set_clock_ms(pts_ms);

            let speed = self.shared.speed();
            if let DriftAction::Wait(wait) = drift.observe(pts_ms, speed, Instant::now()) {
                if !self.shared.interruptible_sleep(LoopKind::Audio, wait) {
                    break;
                }
            }

            let mut resampled = frame::Audio::empty();
            if let Err(e) = session.resampler.run(&decoded, &mut resampled) {
                // Transient: the next frame may resample fine.
                warn!("resampling failed: {e}");
                continue;
            }

            let samples = extract_samples(&resampled, spec.channels);
            if samples.is_empty() {
                continue;
            }

            self.sink.emit(PlayerEvent::AudioReady(AudioChunk {
                samples: Arc::new(samples),
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                pts_ms,
            }));
            self.sink.emit(PlayerEvent::PositionChanged(pts_ms));
        }
    }
}

/// One shared silence chunk for the muted path.
fn silence_samples(spec: AudioSpec) -> Arc<Vec<f32>> {
    Arc::new(vec![0.0; SILENCE_FRAMES * spec.channels as usize])
}

/// Extracts interleaved f32 samples from a resampled packed frame.
fn extract_samples(frame: &frame::Audio, channels: u16) -> Vec<f32> {
    let data = frame.data(0);
    let sample_count = frame.samples() * channels as usize;

    let mut samples = Vec::with_capacity(sample_count);
    for i in 0..sample_count {
        let offset = i * 4; // f32 = 4 bytes
        if offset + 4 <= data.len() {
            let bytes = [
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ];
            samples.push(f32::from_le_bytes(bytes));
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_chunk_matches_spec_channels() {
        let stereo = silence_samples(AudioSpec::default());
        assert_eq!(stereo.len(), SILENCE_FRAMES * 2);
        assert!(stereo.iter().all(|&s| s == 0.0));

        let mono = silence_samples(AudioSpec {
            sample_rate: 48_000,
            channels: 1,
        });
        assert_eq!(mono.len(), SILENCE_FRAMES);
    }

    #[test]
    fn silence_cadence_is_roughly_23ms_at_default_rate() {
        let spec = AudioSpec::default();
        let interval = SILENCE_FRAMES as f64 / f64::from(spec.sample_rate);
        assert!((0.02..0.03).contains(&interval));
    }

    #[test]
    fn extract_samples_reads_packed_f32() {
        crate::probe::init_ffmpeg().unwrap();

        let expected = [0.0f32, 0.5, -0.5, 1.0, -1.0, 0.25];
        let mut frame = frame::Audio::new(
            format::Sample::F32(format::sample::Type::Packed),
            expected.len() / 2,
            ChannelLayout::STEREO,
        );
        {
            let data = frame.data_mut(0);
            for (i, value) in expected.iter().enumerate() {
                data[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        let samples = extract_samples(&frame, 2);
        assert_eq!(samples, expected);
    }

    #[test]
    fn extract_samples_handles_mono() {
        crate::probe::init_ffmpeg().unwrap();

        let expected = [0.1f32, -0.2, 0.3];
        let mut frame = frame::Audio::new(
            format::Sample::F32(format::sample::Type::Packed),
            expected.len(),
            ChannelLayout::MONO,
        );
        {
            let data = frame.data_mut(0);
            for (i, value) in expected.iter().enumerate() {
                data[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        let samples = extract_samples(&frame, 1);
        assert_eq!(samples, expected);
    }
}
