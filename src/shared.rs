// SPDX-License-Identifier: MPL-2.0
//! Shared synchronization state between the two decode loops and the
//! control surface.
//!
//! All control flags (stop, pause, seek, end-of-stream, track selection)
//! live behind one mutex paired with one condvar, so a single `notify_all`
//! wakes any loop blocked in any of its wait points. The audio clock and the
//! playback speed are the only hot-path values and use atomics.
//!
//! Seeks use an epoch counter with per-loop acknowledgement counters instead
//! of resettable booleans: rapid repeated seeks bump the epoch, and an
//! acknowledgement of a stale epoch can never complete a newer seek.

use crate::speed::PlaybackSpeed;
use crate::tracks::{self, TrackDescriptor};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Identifies which loop is interacting with the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Video,
    Audio,
}

/// Media-type-scoped track selection operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackChange {
    /// Index was out of bounds; selection unchanged.
    Invalid,
    /// Index equals the current selection; nothing to do.
    Unchanged,
    /// Selection updated; resources will rebuild via the seek handshake.
    Changed,
}

/// Two-loop seek rendezvous.
///
/// A loop sees a pending seek while its `done` counter is behind `epoch`;
/// the seek as a whole is complete once both counters have caught up.
#[derive(Debug, Default)]
pub struct SeekState {
    epoch: u64,
    target_ms: i64,
    video_done: u64,
    audio_done: u64,
}

impl SeekState {
    /// Begins a new seek epoch towards `target_ms`.
    fn request(&mut self, target_ms: i64) {
        self.epoch += 1;
        self.target_ms = target_ms;
    }

    /// Returns the epoch and target still to be handled by `kind`, if any.
    fn pending_for(&self, kind: LoopKind) -> Option<(u64, i64)> {
        let done = match kind {
            LoopKind::Video => self.video_done,
            LoopKind::Audio => self.audio_done,
        };
        if done < self.epoch {
            Some((self.epoch, self.target_ms))
        } else {
            None
        }
    }

    /// Records that `kind` has handled `epoch`. Returns true when this call
    /// completed the current epoch (both loops caught up), which happens at
    /// most once per epoch.
    fn acknowledge(&mut self, kind: LoopKind, epoch: u64) -> bool {
        let was_complete = self.is_complete();
        match kind {
            LoopKind::Video => self.video_done = self.video_done.max(epoch),
            LoopKind::Audio => self.audio_done = self.audio_done.max(epoch),
        }
        !was_complete && epoch == self.epoch && self.is_complete()
    }

    /// True when no seek is outstanding.
    fn is_complete(&self) -> bool {
        self.video_done >= self.epoch && self.audio_done >= self.epoch
    }
}

/// Control flags guarded by the shared mutex.
#[derive(Debug)]
pub struct ControlState {
    pub stopped: bool,
    pub paused: bool,
    pub eof: bool,
    pub seek: SeekState,
    pub audio_track: isize,
    pub video_track: isize,
    pub audio_tracks: Vec<TrackDescriptor>,
    pub video_tracks: Vec<TrackDescriptor>,
}

impl ControlState {
    fn new() -> Self {
        Self {
            stopped: false,
            paused: false,
            eof: false,
            seek: SeekState::default(),
            audio_track: 0,
            video_track: 0,
            audio_tracks: Vec::new(),
            video_tracks: Vec::new(),
        }
    }

    fn track_of(&self, kind: LoopKind) -> isize {
        match kind {
            LoopKind::Video => self.video_track,
            LoopKind::Audio => self.audio_track,
        }
    }

    fn tracks_of(&self, kind: LoopKind) -> &[TrackDescriptor] {
        match kind {
            LoopKind::Video => &self.video_tracks,
            LoopKind::Audio => &self.audio_tracks,
        }
    }
}

/// Per-iteration view of the control flags, taken under one lock.
#[derive(Debug, Clone)]
pub struct LoopView {
    pub stopped: bool,
    pub paused: bool,
    /// Seek epoch and target still to be handled by this loop.
    pub seek: Option<(u64, i64)>,
    /// Container stream index of the selected track (None = none/muted).
    pub stream_index: Option<usize>,
    /// Whether an audio track is selected (pacing reference for video).
    pub audio_active: bool,
}

/// The shared synchronization block, one instance per playback session
/// (reset in place by `start`).
#[derive(Debug)]
pub struct SharedState {
    control: Mutex<ControlState>,
    cond: Condvar,
    audio_clock_ms: AtomicI64,
    speed_bits: AtomicU32,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            control: Mutex::new(ControlState::new()),
            cond: Condvar::new(),
            audio_clock_ms: AtomicI64::new(0),
            speed_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets flags and published track lists for a fresh session.
    /// Track selections and playback speed survive across sessions.
    pub fn reset_for_start(&self) {
        let mut control = self.lock();
        control.stopped = false;
        control.paused = false;
        control.eof = false;
        control.seek = SeekState::default();
        control.audio_tracks.clear();
        control.video_tracks.clear();
        drop(control);
        self.audio_clock_ms.store(0, Ordering::SeqCst);
    }

    // ---- control surface ----------------------------------------------

    /// Sets the stop flag and wakes every waiter.
    pub fn request_stop(&self) {
        let mut control = self.lock();
        control.stopped = true;
        control.eof = false;
        drop(control);
        self.cond.notify_all();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Flips the pause flag. Waiters are woken only on the transition to
    /// unpaused; pausing needs no wakeup since the loops block themselves.
    pub fn toggle_pause(&self) -> bool {
        let mut control = self.lock();
        control.paused = !control.paused;
        let paused = control.paused;
        drop(control);
        if !paused {
            self.cond.notify_all();
        }
        paused
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Starts a new seek epoch towards `target_ms` and wakes both loops.
    pub fn request_seek(&self, target_ms: i64) {
        let mut control = self.lock();
        control.seek.request(target_ms);
        control.eof = false;
        drop(control);
        self.cond.notify_all();
    }

    /// Changes the selected track of one media type.
    ///
    /// Bounds are validated against the published list (-1 is always valid).
    /// On change, a seek epoch targeted at the current playback position is
    /// started so both loops rebuild their codec sessions without moving
    /// the position.
    pub fn select_track(&self, kind: LoopKind, index: isize) -> TrackChange {
        let mut control = self.lock();
        let count = control.tracks_of(kind).len() as isize;
        if index < -1 || index >= count {
            return TrackChange::Invalid;
        }
        if control.track_of(kind) == index {
            return TrackChange::Unchanged;
        }
        match kind {
            LoopKind::Video => control.video_track = index,
            LoopKind::Audio => control.audio_track = index,
        }
        let position = self.audio_clock_ms.load(Ordering::SeqCst);
        control.seek.request(position.max(0));
        control.eof = false;
        drop(control);
        self.cond.notify_all();
        TrackChange::Changed
    }

    #[must_use]
    pub fn selected_track(&self, kind: LoopKind) -> isize {
        self.lock().track_of(kind)
    }

    #[must_use]
    pub fn track_count(&self, kind: LoopKind) -> usize {
        self.lock().tracks_of(kind).len()
    }

    #[must_use]
    pub fn track_name(&self, kind: LoopKind, index: usize) -> Option<String> {
        self.lock()
            .tracks_of(kind)
            .get(index)
            .map(|t| t.display_name.clone())
    }

    // ---- loop side ----------------------------------------------------

    /// Publishes the enumerated descriptor list for one media type and
    /// clamps the surviving selection against it. Returns the selection.
    pub fn publish_tracks(&self, kind: LoopKind, list: Vec<TrackDescriptor>) -> isize {
        let mut control = self.lock();
        let clamped = match kind {
            LoopKind::Video => {
                control.video_track = tracks::clamp_selection(control.video_track, list.len());
                control.video_tracks = list;
                control.video_track
            }
            LoopKind::Audio => {
                control.audio_track = tracks::clamp_selection(control.audio_track, list.len());
                control.audio_tracks = list;
                control.audio_track
            }
        };
        clamped
    }

    /// Takes the per-iteration view every loop reads at the top of its
    /// cycle. One short lock; stale operations are abandoned by re-checking
    /// here rather than deep inside nested logic.
    #[must_use]
    pub fn view(&self, kind: LoopKind) -> LoopView {
        let control = self.lock();
        let track_index = control.track_of(kind);
        LoopView {
            stopped: control.stopped,
            paused: control.paused,
            seek: control.seek.pending_for(kind),
            stream_index: tracks::resolve_stream_index(track_index, control.tracks_of(kind)),
            audio_active: control.audio_track >= 0,
        }
    }

    /// Acknowledges a handled seek epoch. Returns true when this call
    /// completed the epoch for both loops (the caller then emits
    /// `SeekCompleted`).
    pub fn acknowledge_seek(&self, kind: LoopKind, epoch: u64) -> bool {
        self.lock().seek.acknowledge(kind, epoch)
    }

    /// Marks end-of-stream. Cleared by the next seek or stop request.
    pub fn set_eof(&self) {
        self.lock().eof = true;
    }

    /// Bounded wait at end-of-stream; returns early on stop, a new seek,
    /// or the eof flag being cleared.
    pub fn wait_eof(&self, kind: LoopKind, timeout: Duration) {
        let control = self.lock();
        let _unused = self
            .cond
            .wait_timeout_while(control, timeout, |c| {
                c.eof && !c.stopped && c.seek.pending_for(kind).is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks while paused. Returns when unpaused, stopped, or a seek
    /// arrives for this loop.
    pub fn wait_while_paused(&self, kind: LoopKind) {
        let control = self.lock();
        let _unused = self
            .cond
            .wait_while(control, |c| {
                c.paused && !c.stopped && c.seek.pending_for(kind).is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Cancellable pacing sleep: a timed wait on the shared condvar that
    /// stop, pause, and a new seek interrupt immediately.
    ///
    /// Returns true if the full duration elapsed, false when interrupted.
    pub fn interruptible_sleep(&self, kind: LoopKind, duration: Duration) -> bool {
        if duration.is_zero() {
            return true;
        }
        let control = self.lock();
        let (_guard, result) = self
            .cond
            .wait_timeout_while(control, duration, |c| {
                !c.stopped && !c.paused && c.seek.pending_for(kind).is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);
        result.timed_out()
    }

    // ---- atomics ------------------------------------------------------

    /// Publishes the audio clock. Written only by the audio loop.
    pub fn set_clock_ms(&self, ms: i64) {
        self.audio_clock_ms.store(ms, Ordering::SeqCst);
    }

    #[must_use]
    pub fn clock_ms(&self) -> i64 {
        self.audio_clock_ms.load(Ordering::SeqCst)
    }

    pub fn set_speed(&self, speed: PlaybackSpeed) {
        self.speed_bits
            .store(speed.value().to_bits(), Ordering::SeqCst);
    }

    #[must_use]
    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::SeqCst))
    }
}
