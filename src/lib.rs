// SPDX-License-Identifier: MPL-2.0
//! `playhead` is a synchronized audio/video decode and playback engine
//! built on FFmpeg.
//!
//! Two independent decode loops (video, audio) read from their own handles
//! on a shared container and stay mutually time-aligned: the audio loop
//! publishes the master clock, and the video loop paces frame emission
//! against it. Pause, seek, track switching and variable playback speed
//! arrive asynchronously from the host and are honored at well-defined
//! suspension points in both loops.
//!
//! # Example
//!
//! ```no_run
//! use playhead::{channel_sink, EngineOptions, Player, PlayerEvent};
//!
//! let (sink, mut events) = channel_sink();
//! let mut player = Player::new(EngineOptions::default(), sink);
//! player.start("movie.mkv")?;
//!
//! while let Some(event) = events.blocking_recv() {
//!     match event {
//!         PlayerEvent::FrameReady(Some(frame)) => { /* display frame */ }
//!         PlayerEvent::AudioReady(chunk) => { /* queue PCM */ }
//!         PlayerEvent::PositionChanged(ms) => println!("at {ms} ms"),
//!         PlayerEvent::Error(message) => eprintln!("{message}"),
//!         _ => {}
//!     }
//! }
//! # Ok::<(), playhead::Error>(())
//! ```

mod audio;
pub mod audio_output;
pub mod config;
pub mod error;
pub mod events;
pub mod player;
pub mod probe;
mod shared;
pub mod speed;
pub mod sync;
pub mod time_units;
pub mod tracks;
mod video;
pub mod volume;

#[cfg(test)]
mod test_utils;

pub use audio_output::AudioOutput;
pub use config::{
    software_decoder_policy, AudioSpec, DecoderCandidate, DecoderPolicy, EngineOptions,
};
pub use error::{Error, MediaError, Result};
pub use events::{channel_sink, AudioChunk, ChannelSink, EventSink, PlayerEvent, VideoFrame};
pub use player::Player;
pub use speed::PlaybackSpeed;
pub use tracks::TrackDescriptor;
pub use volume::Volume;
