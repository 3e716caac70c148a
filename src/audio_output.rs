// SPDX-License-Identifier: MPL-2.0
//! Audio output using cpal for low-latency playback.
//!
//! A thin consumer of the engine's `AudioReady` chunks: queue PCM with
//! [`AudioOutput::queue`], and the device callback drains it. Construct the
//! output first and feed its [`AudioOutput::spec`] into `EngineOptions` so
//! the engine resamples directly to the device's native format.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::warn;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::AudioSpec;
use crate::error::{Error, Result};
use crate::events::AudioChunk;
use crate::volume::Volume;

/// Shared state between the device callback and the control methods.
struct OutputState {
    /// Pending interleaved f32 samples.
    buffer: Mutex<VecDeque<f32>>,

    /// Upper bound on buffered samples (~0.5 s); excess is dropped.
    max_buffered: usize,

    /// Current volume (stored as u32 bits of f32 for atomic access).
    volume_bits: AtomicU32,

    /// Mute state.
    muted: AtomicBool,

    /// Pause state.
    paused: AtomicBool,
}

impl OutputState {
    fn new(initial_volume: f32, max_buffered: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(max_buffered)),
            max_buffered,
            volume_bits: AtomicU32::new(initial_volume.to_bits()),
            muted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Audio output stream manager.
///
/// Handles playback through the system's default audio device.
pub struct AudioOutput {
    state: Arc<OutputState>,
    sample_rate: u32,
    channels: u16,

    /// The audio stream (kept alive to maintain playback).
    _stream: cpal::Stream,
}

impl AudioOutput {
    /// Creates a new audio output stream on the default device.
    ///
    /// # Errors
    ///
    /// Returns an error if no audio output device is found, if the device
    /// configuration cannot be retrieved, or if the audio stream fails to
    /// start.
    pub fn new(initial_volume: Volume) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Io("No audio output device found".to_string()))?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::Io(format!("Failed to get audio config: {e}")))?;

        let sample_rate = supported_config.sample_rate().0;
        let channels = supported_config.channels();

        // ~0.5 seconds of buffered audio before backpressure drops samples
        let max_buffered = (sample_rate as usize) * (channels as usize) / 2;
        let state = Arc::new(OutputState::new(initial_volume.value(), max_buffered));

        let stream = match supported_config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(
                &device,
                &supported_config.into(),
                Arc::clone(&state),
            )?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(
                &device,
                &supported_config.into(),
                Arc::clone(&state),
            )?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(
                &device,
                &supported_config.into(),
                Arc::clone(&state),
            )?,
            _ => return Err(Error::Io("Unsupported audio sample format".to_string())),
        };

        stream
            .play()
            .map_err(|e| Error::Io(format!("Failed to start audio stream: {e}")))?;

        Ok(Self {
            state,
            sample_rate,
            channels,
            _stream: stream,
        })
    }

    /// Builds an audio output stream for a specific sample format.
    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        state: Arc<OutputState>,
    ) -> Result<cpal::Stream> {
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if state.muted.load(Ordering::Relaxed) || state.paused.load(Ordering::Relaxed)
                    {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0f32);
                        }
                        return;
                    }

                    // Perceptual volume curve (quadratic): human hearing is
                    // logarithmic, so squaring makes the control feel linear.
                    let volume = state.volume();
                    let perceptual_volume = volume * volume;

                    let mut buffer = state.buffer();
                    for sample in data.iter_mut() {
                        match buffer.pop_front() {
                            Some(value) => {
                                // Clamp slightly below 1.0: integer sample
                                // conversion overflows at exactly 1.0.
                                let amplified =
                                    (value * perceptual_volume).clamp(-1.0, 0.999_999_9);
                                *sample = T::from_sample(amplified);
                            }
                            None => {
                                *sample = T::from_sample(0.0f32);
                            }
                        }
                    }
                },
                |err| {
                    warn!("audio output error: {err}");
                },
                None,
            )
            .map_err(|e| Error::Io(format!("Failed to build audio stream: {e}")))?;

        Ok(stream)
    }

    /// The output format the engine should resample to.
    #[must_use]
    pub fn spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Queues a PCM chunk for playback.
    ///
    /// When the buffer is full the excess samples are dropped; losing late
    /// audio is preferable to unbounded memory growth.
    pub fn queue(&self, chunk: &AudioChunk) {
        let mut buffer = self.state.buffer();
        let available = self.state.max_buffered.saturating_sub(buffer.len());
        for &sample in chunk.samples.iter().take(available) {
            buffer.push_back(sample);
        }
    }

    /// Pauses output (the device keeps running and emits silence).
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Relaxed);
    }

    /// Resumes output.
    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Relaxed);
    }

    /// Discards buffered samples without changing the pause state.
    /// Used during seek to cut off stale audio immediately.
    pub fn clear_buffer(&self) {
        self.state.buffer().clear();
    }

    /// Sets the volume.
    pub fn set_volume(&self, volume: Volume) {
        self.state
            .volume_bits
            .store(volume.value().to_bits(), Ordering::Relaxed);
    }

    /// Returns the current volume.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.state.volume()
    }

    /// Sets the mute state.
    pub fn set_muted(&self, muted: bool) {
        self.state.muted.store(muted, Ordering::Relaxed);
    }

    /// Returns whether audio is muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.state.muted.load(Ordering::Relaxed)
    }

    /// Returns the output sample rate.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of output channels.
    #[must_use]
    pub fn channels(&self) -> u16 {
        self.channels
    }
}
