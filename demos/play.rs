// SPDX-License-Identifier: MPL-2.0
//! Minimal playback host: decodes a file, plays the audio on the default
//! output device, and prints position updates.
//!
//! Usage: cargo run --example play -- <media-file>

use playhead::{channel_sink, AudioOutput, EngineOptions, Player, PlayerEvent, Volume};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: play <media-file>")?;

    // Open the device first so the engine resamples straight to its
    // native format. Keep going without audio hardware (video-only).
    let output = match AudioOutput::new(Volume::default()) {
        Ok(output) => Some(output),
        Err(e) => {
            eprintln!("no audio output: {e}");
            None
        }
    };

    let mut options = EngineOptions::default();
    if let Some(ref output) = output {
        options.audio_spec = output.spec();
    }

    let (sink, mut events) = channel_sink();
    let mut player = Player::new(options, sink);
    player.start(&path)?;

    let mut last_printed = -1i64;
    while let Some(event) = events.blocking_recv() {
        match event {
            PlayerEvent::DurationChanged(ms) => println!("duration: {} s", ms / 1_000),
            PlayerEvent::AudioReady(chunk) => {
                if let Some(ref output) = output {
                    output.queue(&chunk);
                }
            }
            PlayerEvent::FrameReady(Some(frame)) => {
                // A real host would upload frame.data to its display here.
                let _ = frame;
            }
            PlayerEvent::FrameReady(None) => println!("video off"),
            PlayerEvent::PositionChanged(ms) => {
                let secs = ms / 1_000;
                if secs != last_printed {
                    println!("position: {secs} s");
                    last_printed = secs;
                }
            }
            PlayerEvent::SeekCompleted => println!("seek completed"),
            PlayerEvent::Error(message) => {
                eprintln!("error: {message}");
                break;
            }
        }
    }

    player.stop();
    Ok(())
}
