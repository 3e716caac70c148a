// SPDX-License-Identifier: MPL-2.0
//! Output events produced by the decode loops.
//!
//! Both worker threads deliver their output through an [`EventSink`] trait
//! object. Delivery is synchronous from the emitting thread; sinks must be
//! cheap and non-blocking (hand the payload to a channel or queue, do not
//! process it in place). Events from the two loops interleave and are only
//! loosely ordered relative to each other.

use std::sync::Arc;
use tokio::sync::mpsc;

/// A decoded video frame ready for display.
///
/// Pixel data is tightly packed RGBA (width x height x 4 bytes); any decoder
/// stride has already been removed.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGBA pixel data.
    pub data: Arc<Vec<u8>>,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Presentation timestamp in milliseconds.
    pub pts_ms: i64,
}

impl VideoFrame {
    /// Returns the total size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// A decoded PCM chunk ready for playback.
///
/// Samples are interleaved f32 normalized to [-1.0, 1.0], in the engine's
/// fixed output format (see `AudioSpec`).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved f32 samples.
    pub samples: Arc<Vec<f32>>,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of interleaved channels.
    pub channels: u16,

    /// Presentation timestamp in milliseconds.
    pub pts_ms: i64,
}

impl AudioChunk {
    /// Returns the total number of samples (across all channels).
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Returns the number of frames (samples per channel).
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Returns the chunk duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// Returns true if every sample is zero.
    #[must_use]
    pub fn is_silence(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

/// Events delivered to the host.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// A new frame is ready for display. `None` is the empty-frame signal
    /// emitted when the video track switches to "none".
    FrameReady(Option<VideoFrame>),

    /// A decoded PCM chunk is ready for playback.
    AudioReady(AudioChunk),

    /// Total duration is known (emitted once per opened container;
    /// 0 when the container does not report a duration).
    DurationChanged(i64),

    /// Playback position advanced. Video and audio positions are
    /// independent streams and may arrive in either order.
    PositionChanged(i64),

    /// A fatal-per-session error occurred in one of the loops.
    Error(String),

    /// A requested seek has been acknowledged by both loops.
    SeekCompleted,
}

/// Receives events from the decode loops.
///
/// Implemented for plain closures, so
/// `Arc::new(|event| { .. })` works as a sink.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Called from the worker threads.
    fn emit(&self, event: PlayerEvent);
}

impl<F> EventSink for F
where
    F: Fn(PlayerEvent) + Send + Sync,
{
    fn emit(&self, event: PlayerEvent) {
        self(event);
    }
}

/// An [`EventSink`] that forwards events onto an unbounded channel.
///
/// Sends never block the decode loops; once the receiver is dropped,
/// further events are silently discarded.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl EventSink for ChannelSink {
    fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }
}

/// Creates a channel-backed sink plus the receiving half for the host.
///
/// The receiver works from both sync (`blocking_recv`/`try_recv`) and async
/// (`recv().await`) contexts.
#[must_use]
pub fn channel_sink() -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<PlayerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink { tx }), rx)
}
