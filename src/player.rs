// SPDX-License-Identifier: MPL-2.0
//! Playback engine facade: the control surface hosts call.
//!
//! A [`Player`] owns the shared synchronization state and the two worker
//! threads (video, audio). Control methods mutate the shared state and wake
//! the loops; all output flows through the [`EventSink`] given at
//! construction. There is no other thread pool: exactly two long-lived
//! workers per session, plus the caller's thread.

use crate::audio::AudioLoop;
use crate::config::EngineOptions;
use crate::error::{Error, MediaError, Result};
use crate::events::{EventSink, PlayerEvent};
use crate::shared::{LoopKind, SharedState, TrackChange};
use crate::speed::PlaybackSpeed;
use crate::video::VideoLoop;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The synchronized dual-loop playback engine.
pub struct Player {
    options: Arc<EngineOptions>,
    sink: Arc<dyn EventSink>,
    shared: Arc<SharedState>,
    video_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Creates an idle player. Nothing runs until [`Player::start`].
    #[must_use]
    pub fn new(options: EngineOptions, sink: Arc<dyn EventSink>) -> Self {
        Self {
            options: Arc::new(options),
            sink,
            shared: Arc::new(SharedState::new()),
            video_thread: None,
            audio_thread: None,
        }
    }

    /// Starts playback of `path`.
    ///
    /// Idempotent: any running session is stopped and joined first, then
    /// the shared flags are reset and both decode loops are launched.
    /// Track selections and playback speed survive across starts.
    ///
    /// # Errors
    ///
    /// Returns an error when the file does not exist or a worker thread
    /// cannot be spawned. Errors inside the container (unparseable data,
    /// missing decoders) surface asynchronously as `Error` events.
    pub fn start<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::Media(MediaError::OpenFailed(format!(
                "file not found: {}",
                path.display()
            ))));
        }

        self.stop();
        self.shared.reset_for_start();
        info!("starting playback: {}", path.display());

        let video = VideoLoop {
            shared: Arc::clone(&self.shared),
            sink: Arc::clone(&self.sink),
            path: path.clone(),
            options: Arc::clone(&self.options),
        };
        self.video_thread = Some(
            thread::Builder::new()
                .name("playhead-video".to_string())
                .spawn(move || video.run())?,
        );

        let audio = AudioLoop {
            shared: Arc::clone(&self.shared),
            sink: Arc::clone(&self.sink),
            path,
            options: Arc::clone(&self.options),
        };
        self.audio_thread = Some(
            thread::Builder::new()
                .name("playhead-audio".to_string())
                .spawn(move || audio.run())?,
        );

        Ok(())
    }

    /// Stops playback and joins both worker threads.
    ///
    /// After this returns, no further events are delivered to the sink by
    /// the workers. Effective even while a loop is mid-sleep or mid-wait.
    pub fn stop(&mut self) {
        self.shared.request_stop();
        if let Some(handle) = self.video_thread.take() {
            if handle.join().is_err() {
                warn!("video thread panicked during shutdown");
            }
        }
        if let Some(handle) = self.audio_thread.take() {
            if handle.join().is_err() {
                warn!("audio thread panicked during shutdown");
            }
        }
        debug!("playback stopped");
    }

    /// Requests an asynchronous seek to `target_ms`.
    ///
    /// Completion is observable via the `SeekCompleted` event, emitted once
    /// both loops have acknowledged the request.
    pub fn seek(&self, target_ms: i64) {
        self.shared.request_seek(target_ms.max(0));
    }

    /// Flips the pause flag. Loops block on the shared condvar while
    /// paused and are woken on resume.
    pub fn toggle_pause(&self) {
        let paused = self.shared.toggle_pause();
        debug!("pause toggled: {paused}");
    }

    /// Returns whether playback is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Selects the active audio track; -1 mutes.
    ///
    /// A change rebuilds the audio codec session via the seek handshake
    /// without moving the playback position. Out-of-bounds indices are
    /// ignored.
    pub fn set_audio_track(&self, index: isize) {
        if self.shared.select_track(LoopKind::Audio, index) == TrackChange::Invalid {
            warn!("ignoring out-of-bounds audio track {index}");
        }
    }

    /// Number of audio tracks in the open container.
    #[must_use]
    pub fn audio_track_count(&self) -> usize {
        self.shared.track_count(LoopKind::Audio)
    }

    /// Currently selected audio track (-1 = muted).
    #[must_use]
    pub fn current_audio_track(&self) -> isize {
        self.shared.selected_track(LoopKind::Audio)
    }

    /// Display name of an audio track.
    #[must_use]
    pub fn audio_track_name(&self, index: usize) -> Option<String> {
        self.shared.track_name(LoopKind::Audio, index)
    }

    /// Selects the active video track; -1 disables video.
    ///
    /// Switching to -1 additionally emits an immediate empty-frame signal
    /// so the host can clear its display.
    pub fn set_video_track(&self, index: isize) {
        match self.shared.select_track(LoopKind::Video, index) {
            TrackChange::Invalid => warn!("ignoring out-of-bounds video track {index}"),
            TrackChange::Changed if index == -1 => {
                self.sink.emit(PlayerEvent::FrameReady(None));
            }
            _ => {}
        }
    }

    /// Number of video tracks in the open container.
    #[must_use]
    pub fn video_track_count(&self) -> usize {
        self.shared.track_count(LoopKind::Video)
    }

    /// Currently selected video track (-1 = none).
    #[must_use]
    pub fn current_video_track(&self) -> isize {
        self.shared.selected_track(LoopKind::Video)
    }

    /// Display name of a video track.
    #[must_use]
    pub fn video_track_name(&self, index: usize) -> Option<String> {
        self.shared.track_name(LoopKind::Video, index)
    }

    /// Sets the playback speed, clamped to the valid range.
    ///
    /// Changes below the epsilon are ignored so UI jitter does not force
    /// both loops through a resync.
    pub fn set_playback_speed(&self, speed: f32) {
        let clamped = PlaybackSpeed::new(speed);
        let current = PlaybackSpeed::new(self.shared.speed());
        if clamped.differs_from(current) {
            debug!("playback speed {} -> {}", current.value(), clamped.value());
            self.shared.set_speed(clamped);
        }
    }

    /// Returns the effective playback speed.
    #[must_use]
    pub fn playback_speed(&self) -> f32 {
        self.shared.speed()
    }

    /// Returns the current audio clock position in milliseconds.
    #[must_use]
    pub fn position_ms(&self) -> i64 {
        self.shared.clock_ms()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::channel_sink;
    use std::time::{Duration, Instant};

    fn idle_player() -> (Player, tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>) {
        let (sink, rx) = channel_sink();
        (Player::new(EngineOptions::default(), sink), rx)
    }

    #[test]
    fn start_fails_for_nonexistent_file() {
        let (mut player, _rx) = idle_player();
        let result = player.start("/nonexistent/video.mp4");
        assert!(matches!(
            result,
            Err(Error::Media(MediaError::OpenFailed(_)))
        ));
    }

    #[test]
    fn unparseable_file_surfaces_error_events_and_stop_joins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("garbage.mp4");
        std::fs::write(&path, b"definitely not a media container").unwrap();

        let (mut player, mut rx) = idle_player();
        player.start(&path).unwrap();

        // Both loops fail to open the container and report it.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut errors = 0;
        while errors < 2 && Instant::now() < deadline {
            match rx.try_recv() {
                Ok(PlayerEvent::Error(_)) => errors += 1,
                Ok(_) => {}
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        assert_eq!(errors, 2, "expected an error event from each loop");

        // Threads are already dead; stop must still return promptly.
        let started = Instant::now();
        player.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn pause_toggles_without_a_session() {
        let (player, _rx) = idle_player();
        assert!(!player.is_paused());
        player.toggle_pause();
        assert!(player.is_paused());
        player.toggle_pause();
        assert!(!player.is_paused());
    }

    #[test]
    fn out_of_range_speed_clamps_to_maximum() {
        let (player, _rx) = idle_player();
        player.set_playback_speed(10.0);
        assert!((player.playback_speed() - 4.0).abs() < 1e-6);

        player.set_playback_speed(0.0);
        assert!((player.playback_speed() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn tiny_speed_changes_are_ignored() {
        let (player, _rx) = idle_player();
        player.set_playback_speed(1.0);
        player.set_playback_speed(1.004);
        assert!((player.playback_speed() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn switching_video_off_emits_empty_frame() {
        let (player, mut rx) = idle_player();
        player.set_video_track(-1);
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::FrameReady(None))));
    }

    #[test]
    fn invalid_track_indices_are_ignored() {
        let (player, mut rx) = idle_player();
        player.set_audio_track(42);
        player.set_video_track(7);
        assert_eq!(player.current_audio_track(), 0);
        assert_eq!(player.current_video_track(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn track_getters_default_to_empty() {
        let (player, _rx) = idle_player();
        assert_eq!(player.audio_track_count(), 0);
        assert_eq!(player.video_track_count(), 0);
        assert!(player.audio_track_name(0).is_none());
        assert!(player.video_track_name(0).is_none());
    }

    #[test]
    fn seek_clamps_negative_targets() {
        let (player, _rx) = idle_player();
        player.seek(-500);
        // The pending target is observable through the loop-side view.
        let view = player.shared.view(LoopKind::Video);
        assert_eq!(view.seek.map(|(_, target)| target), Some(0));
    }
}
