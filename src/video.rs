// SPDX-License-Identifier: MPL-2.0
//! Video decode loop.
//!
//! Runs on its own worker thread with its own container handle. Each outer
//! iteration re-reads the shared control state, so stop, pause, seeks and
//! track switches arriving mid-rebuild are picked up at the top of the next
//! cycle instead of deep inside nested logic.
//!
//! Pacing follows the audio clock whenever an audio track is active and its
//! clock has started; otherwise frames are spaced against wall clock. See
//! the `sync` module for the policy.

use crate::config::EngineOptions;
use crate::error::{Error, MediaError, Result};
use crate::events::{EventSink, PlayerEvent, VideoFrame};
use crate::probe;
use crate::shared::{LoopKind, SharedState};
use crate::sync::{PaceDecision, PacePolicy, WallClockPacer, PACE_INCREMENT, PACE_SLACK_MS};
use crate::time_units;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{format, frame, media, Rational};
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll cadence while no video track is selected.
const IDLE_POLL: Duration = Duration::from_millis(40);

/// Bounded wait at end-of-stream before re-checking state.
const EOF_WAIT: Duration = Duration::from_millis(40);

/// The video worker. Constructed by the player facade and consumed by
/// `run` on the spawned thread.
pub(crate) struct VideoLoop {
    pub shared: Arc<SharedState>,
    pub sink: Arc<dyn EventSink>,
    pub path: PathBuf,
    pub options: Arc<EngineOptions>,
}

/// Per-track decode context, rebuilt whenever the active track changes.
struct VideoSession {
    stream_index: usize,
    decoder: ffmpeg_next::decoder::Video,
    time_base: Rational,
    policy: PacePolicy,
    scaler: ScalerCache,
}

impl VideoLoop {
    /// Thread entry point. Fatal-per-session errors are reported through
    /// the sink; the audio loop is unaffected.
    pub fn run(self) {
        if let Err(err) = self.decode_session() {
            warn!("video loop terminated: {err}");
            self.sink.emit(PlayerEvent::Error(err.to_string()));
        }
        debug!("video loop finished");
    }

    fn decode_session(&self) -> Result<()> {
        let mut ictx = probe::open_input(&self.path, &self.options)?;

        let tracks = probe::enumerate_tracks(&ictx, media::Type::Video);
        self.shared.publish_tracks(LoopKind::Video, tracks);
        self.sink
            .emit(PlayerEvent::DurationChanged(probe::duration_ms(&ictx)));

        let mut session: Option<VideoSession> = None;
        let mut pacer = WallClockPacer::new();
        let mut blank_emitted = false;

        loop {
            let view = self.shared.view(LoopKind::Video);
            if view.stopped {
                break;
            }

            let Some(stream_index) = view.stream_index else {
                // No video track: stay responsive without container I/O.
                session = None;
                if !blank_emitted {
                    self.sink.emit(PlayerEvent::FrameReady(None));
                    blank_emitted = true;
                }
                if let Some((epoch, _)) = view.seek {
                    // Nothing to flush; just take part in the handshake.
                    if self.shared.acknowledge_seek(LoopKind::Video, epoch) {
                        self.sink.emit(PlayerEvent::SeekCompleted);
                    }
                    continue;
                }
                if view.paused {
                    self.shared.wait_while_paused(LoopKind::Video);
                    continue;
                }
                self.sink
                    .emit(PlayerEvent::PositionChanged(self.shared.clock_ms()));
                self.shared.interruptible_sleep(LoopKind::Video, IDLE_POLL);
                continue;
            };
            blank_emitted = false;

            // Activation and mid-playback track switches take the same
            // path; the outer container stays open either way.
            let needs_rebuild = session
                .as_ref()
                .map_or(true, |s| s.stream_index != stream_index);
            if needs_rebuild {
                session = Some(self.open_session(&ictx, stream_index)?);
                pacer.reset();
            }
            let Some(current) = session.as_mut() else {
                continue;
            };

            // Seek is handled before pause: a seek arriving mid-pause is
            // acknowledged first, then the loop parks again.
            if let Some((epoch, target_ms)) = view.seek {
                let ts = time_units::ms_to_av_time_base(target_ms);
                if let Err(e) = ictx.seek(ts, ..ts) {
                    warn!("video seek to {target_ms} ms failed: {e}");
                }
                current.decoder.flush();
                pacer.reset();
                if self.shared.acknowledge_seek(LoopKind::Video, epoch) {
                    self.sink.emit(PlayerEvent::SeekCompleted);
                }
                // Do not process data read before the seek this iteration.
                continue;
            }

            if view.paused {
                self.shared.wait_while_paused(LoopKind::Video);
                pacer.reset();
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
                    self.shared.wait_eof(LoopKind::Video, EOF_WAIT);
                    continue;
                }
            };

            if let Err(e) = current.decoder.send_packet(&packet) {
                // Transient: skip this packet, keep decoding.
                debug!("video packet rejected: {e}");
                continue;
            }

            self.drain_frames(current, &mut pacer);
        }

        Ok(())
    }

    fn open_session(
        &self,
        ictx: &format::context::Input,
        stream_index: usize,
    ) -> Result<VideoSession> {
        let stream = ictx.stream(stream_index).ok_or_else(|| {
            Error::Media(MediaError::Other(format!(
                "video stream {stream_index} vanished from container"
            )))
        })?;

        let decoder = probe::open_video_decoder(&stream, &self.options.decoder_policy)?;
        let policy = PacePolicy::from_frame_rate(stream.avg_frame_rate());
        debug!(
            "video session: stream {} {}x{} interval {} ms",
            stream_index,
            decoder.width(),
            decoder.height(),
            policy.frame_interval_ms()
        );

        Ok(VideoSession {
            stream_index,
            decoder,
            time_base: stream.time_base(),
            policy,
            scaler: ScalerCache::new(),
        })
    }

    /// Receives all frames buffered in the decoder, pacing and emitting
    /// each one. Returns early when stop, pause, or a seek arrives.
    fn drain_frames(&self, session: &mut VideoSession, pacer: &mut WallClockPacer) {
        let mut decoded = frame::Video::empty();

        while session.decoder.receive_frame(&mut decoded).is_ok() {
            let view = self.shared.view(LoopKind::Video);
            if view.stopped || view.paused || view.seek.is_some() {
                break;
            }

            let pts_ms = decoded
                .timestamp()
                .map(|ts| time_units::ts_to_ms(ts, session.time_base))
                .unwrap_or(0);

            let audio_clock = self.shared.clock_ms();
            if view.audio_active && audio_clock > 0 {
                match session.policy.decide(pts_ms, audio_clock) {
                    PaceDecision::Emit => {}
                    PaceDecision::Behind { lag_ms } => {
                        // Fast-forward through backlog without waiting.
                        debug!("dropping video frame {lag_ms} ms behind audio");
                        continue;
                    }
                    PaceDecision::Ahead { lead_ms } => {
                        if !self.wait_for_clock(session.policy, pts_ms, lead_ms) {
                            continue;
                        }
                    }
                }
            } else {
                let speed = self.shared.speed();
                if let Some(delay) = pacer.delay(pts_ms, speed, Instant::now()) {
                    if !self.shared.interruptible_sleep(LoopKind::Video, delay) {
                        break;
                    }
                }
                pacer.advance(pts_ms, Instant::now());
            }

            match session.scaler.convert(&decoded) {
                Ok(rgba) => {
                    let (data, width, height) = extract_rgba(rgba);
                    self.sink.emit(PlayerEvent::FrameReady(Some(VideoFrame {
                        data: Arc::new(data),
                        width,
                        height,
                        pts_ms,
                    })));
                    self.sink.emit(PlayerEvent::PositionChanged(pts_ms));
                }
                Err(e) => {
                    // Transient: the next frame may convert fine.
                    warn!("frame conversion failed: {e}");
                }
            }
        }
    }

    /// Waits for the audio clock to catch up with an early frame.
    ///
    /// Sleeps a proportional first chunk, then short increments re-reading
    /// the clock, never exceeding the policy's max-wait bound. Returns true
    /// when the frame became due, false when it should be dropped or the
    /// wait was interrupted by a control change.
    fn wait_for_clock(&self, policy: PacePolicy, pts_ms: i64, lead_ms: i64) -> bool {
        let speed = self.shared.speed();
        let max_wait = policy.max_wait_ms();
        let mut waited: i64 = 0;

        let initial = policy.initial_wait(lead_ms, speed);
        if !initial.is_zero() {
            if !self.shared.interruptible_sleep(LoopKind::Video, initial) {
                return false;
            }
            waited += initial.as_millis() as i64;
        }

        let mut lead = pts_ms - self.shared.clock_ms();
        while lead > PACE_SLACK_MS && waited < max_wait {
            if !self.shared.interruptible_sleep(LoopKind::Video, PACE_INCREMENT) {
                return false;
            }
            waited += PACE_INCREMENT.as_millis() as i64;
            lead = pts_ms - self.shared.clock_ms();
        }

        // Still more than one interval ahead: drop instead of blocking.
        lead <= policy.frame_interval_ms()
    }
}

/// Memoized pixel-format conversion, keyed on the decoded frame's format
/// and dimensions. The scaler and its RGBA output frame are rebuilt only
/// on a key change, which is detected per decoded frame.
struct ScalerCache {
    key: Option<(format::Pixel, u32, u32)>,
    context: Option<scaling::Context>,
    output: frame::Video,
}

impl ScalerCache {
    fn new() -> Self {
        Self {
            key: None,
            context: None,
            output: frame::Video::empty(),
        }
    }

    fn convert(&mut self, input: &frame::Video) -> Result<&frame::Video> {
        let key = (input.format(), input.width(), input.height());
        if self.key != Some(key) {
            debug!(
                "rebuilding scaler: {:?} {}x{} -> RGBA",
                key.0, key.1, key.2
            );
            let context = scaling::Context::get(
                key.0,
                key.1,
                key.2,
                format::Pixel::RGBA,
                key.1,
                key.2,
                scaling::Flags::BILINEAR,
            )?;
            self.context = Some(context);
            self.output = frame::Video::empty();
            self.key = Some(key);
        }

        match self.context.as_mut() {
            Some(context) => {
                context.run(input, &mut self.output)?;
                Ok(&self.output)
            }
            None => Err(Error::Media(MediaError::DecodingFailed(
                "scaler unavailable".to_string(),
            ))),
        }
    }
}

/// Extracts tightly packed RGBA bytes from a frame, removing the stride.
fn extract_rgba(frame: &frame::Video) -> (Vec<u8>, u32, u32) {
    let width = frame.width();
    let height = frame.height();
    let data = frame.data(0);
    let stride = frame.stride(0);

    let mut rgba_bytes = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        let row_start = y as usize * stride;
        let row_end = row_start + (width * 4) as usize;
        rgba_bytes.extend_from_slice(&data[row_start..row_end]);
    }

    (rgba_bytes, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_rgba_removes_stride_padding() {
        crate::probe::init_ffmpeg().unwrap();

        let mut frame = frame::Video::new(format::Pixel::RGBA, 2, 2);
        let stride = frame.stride(0);
        {
            let data = frame.data_mut(0);
            data.fill(0xEE); // padding marker
            for y in 0..2 {
                for x in 0..2 {
                    let base = y * stride + x * 4;
                    data[base..base + 4].copy_from_slice(&[y as u8, x as u8, 7, 255]);
                }
            }
        }

        let (bytes, width, height) = extract_rgba(&frame);
        assert_eq!((width, height), (2, 2));
        assert_eq!(bytes.len(), 2 * 2 * 4);
        assert_eq!(&bytes[0..4], &[0, 0, 7, 255]);
        assert_eq!(&bytes[4..8], &[0, 1, 7, 255]);
        assert_eq!(&bytes[8..12], &[1, 0, 7, 255]);
        assert_eq!(&bytes[12..16], &[1, 1, 7, 255]);
        // No padding marker survives
        assert!(!bytes.contains(&0xEE));
    }

    #[test]
    fn scaler_cache_converts_and_reuses_context() {
        crate::probe::init_ffmpeg().unwrap();

        let mut cache = ScalerCache::new();
        let mut input = frame::Video::new(format::Pixel::YUV420P, 16, 16);
        for plane in 0..3 {
            input.data_mut(plane).fill(128);
        }

        let output = cache.convert(&input).expect("conversion should succeed");
        assert_eq!(output.format(), format::Pixel::RGBA);
        assert_eq!(output.width(), 16);
        assert_eq!(output.height(), 16);

        // Same key converts again without error (cache hit path)
        assert!(cache.convert(&input).is_ok());
    }

    #[test]
    fn scaler_cache_rebuilds_on_dimension_change() {
        crate::probe::init_ffmpeg().unwrap();

        let mut cache = ScalerCache::new();
        let mut small = frame::Video::new(format::Pixel::YUV420P, 16, 16);
        for plane in 0..3 {
            small.data_mut(plane).fill(128);
        }
        let mut large = frame::Video::new(format::Pixel::YUV420P, 32, 32);
        for plane in 0..3 {
            large.data_mut(plane).fill(128);
        }

        assert_eq!(cache.convert(&small).unwrap().width(), 16);
        assert_eq!(cache.convert(&large).unwrap().width(), 32);
        assert_eq!(cache.convert(&small).unwrap().width(), 16);
    }
}
