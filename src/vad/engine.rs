//! Chunked voice activity detection state machine
//!
//! Frames are scored by a [`SpeechModel`] and classified with hysteresis: a
//! frame enters speech above `speech_threshold`, and once recording it stays
//! in speech down to `exit_threshold`. Speech is accumulated in a fixed
//! capacity buffer; a segment is emitted once trailing silence exceeds the
//! minimum silence duration, or force-flushed when the buffer fills.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SpeechModel;
use crate::audio::SAMPLE_RATE;
use crate::{Error, Result};

/// VAD tuning, expressed in milliseconds and converted to samples at `sample_rate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Sample rate of incoming frames
    pub sample_rate: u32,
    /// Probability above which a frame starts speech
    pub speech_threshold: f32,
    /// Probability at or above which a frame keeps an active recording in speech
    pub exit_threshold: f32,
    /// Trailing silence tolerated before a recording is closed
    pub min_silence_ms: u32,
    /// Recordings shorter than this are discarded as noise
    pub min_speech_ms: u32,
    /// Silence appended after a closed recording
    pub speech_pad_ms: u32,
    /// Capacity of the speech buffer before a forced flush
    pub max_buffer_ms: u32,
    /// Pre-speech frames kept for pre-roll
    pub max_prev_buffers: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            speech_threshold: 0.3,
            exit_threshold: 0.1,
            min_silence_ms: 400,
            min_speech_ms: 250,
            speech_pad_ms: 80,
            max_buffer_ms: 30_000,
            max_prev_buffers: 3,
        }
    }
}

impl VadConfig {
    /// Convert a millisecond duration to a sample count
    #[must_use]
    pub fn samples_for_ms(&self, ms: u32) -> usize {
        (u64::from(ms) * u64::from(self.sample_rate) / 1000) as usize
    }

    /// Trailing silence that closes a recording, in samples
    #[must_use]
    pub fn min_silence_samples(&self) -> usize {
        self.samples_for_ms(self.min_silence_ms)
    }

    /// Minimum recording length, in samples
    #[must_use]
    pub fn min_speech_samples(&self) -> usize {
        self.samples_for_ms(self.min_speech_ms)
    }

    /// Trailing pad length, in samples
    #[must_use]
    pub fn pad_samples(&self) -> usize {
        self.samples_for_ms(self.speech_pad_ms)
    }

    /// Speech buffer capacity, in samples
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.samples_for_ms(self.max_buffer_ms)
    }

    /// Check thresholds and sizes for consistency
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("vad sample_rate must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.speech_threshold)
            || !(0.0..=1.0).contains(&self.exit_threshold)
        {
            return Err(Error::Config("vad thresholds must be within 0.0..=1.0".to_string()));
        }
        if self.exit_threshold > self.speech_threshold {
            return Err(Error::Config(format!(
                "vad exit_threshold ({}) must not exceed speech_threshold ({})",
                self.exit_threshold, self.speech_threshold
            )));
        }
        if self.buffer_capacity() == 0 {
            return Err(Error::Config("vad max_buffer_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Observable state of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No recording in progress
    Idle,
    /// Recording, currently inside a tolerated pause
    BufferingSilence,
    /// Recording speech
    Recording,
}

/// A finalized utterance
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Pre-roll, buffered audio, then trailing pad
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// Stream offset of the first buffered sample (pre-roll excluded)
    pub start: Duration,
    /// Stream offset just past the last buffered sample (pad excluded)
    pub end: Duration,
    /// `end - start`
    pub duration: Duration,
    /// Wall-clock time the segment was dispatched
    pub ended_at: DateTime<Utc>,
    /// Leading samples taken from the lookback queue
    pub lookback_samples: usize,
    /// Trailing pad samples
    pub pad_samples: usize,
}

impl SpeechSegment {
    /// The buffered audio without pre-roll or pad
    #[must_use]
    pub fn buffered(&self) -> &[f32] {
        &self.samples[self.lookback_samples..self.samples.len() - self.pad_samples]
    }
}

/// Events emitted by the detector
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    /// Model initialized, frames are accepted
    Ready,
    /// A recording started
    SpeechStart,
    /// A recording ended
    SpeechEnd,
    /// A finalized segment
    SpeechChunk(SpeechSegment),
    /// The detector failed to initialize and will not process frames
    Error(String),
}

/// Voice activity detector over a stream of frames
pub struct VadEngine {
    config: VadConfig,
    model: Box<dyn SpeechModel>,
    buffer: Vec<f32>,
    pointer: usize,
    /// Stream position of `buffer[0]`
    buffer_start: u64,
    lookback: VecDeque<Vec<f32>>,
    recording: bool,
    /// A forced flush already split the current recording
    split: bool,
    post_speech_samples: usize,
    stream_position: u64,
}

impl VadEngine {
    /// Create a detector
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: VadConfig, model: Box<dyn SpeechModel>) -> Result<Self> {
        config.validate()?;
        let capacity = config.buffer_capacity();

        tracing::debug!(
            sample_rate = config.sample_rate,
            capacity,
            speech_threshold = config.speech_threshold,
            exit_threshold = config.exit_threshold,
            "vad engine initialized"
        );

        Ok(Self {
            lookback: VecDeque::with_capacity(config.max_prev_buffers),
            config,
            model,
            buffer: vec![0.0; capacity],
            pointer: 0,
            buffer_start: 0,
            recording: false,
            split: false,
            post_speech_samples: 0,
            stream_position: 0,
        })
    }

    /// Process one frame, returning the events it produced in order
    ///
    /// # Errors
    ///
    /// Returns error if the model fails to score the frame; the frame is
    /// then skipped without touching the buffers.
    pub fn process(&mut self, frame: &[f32]) -> Result<Vec<VadEvent>> {
        let probability = self.model.predict(frame)?;
        let is_speech = self.classify(probability);

        let frame_start = self.stream_position;
        self.stream_position += frame.len() as u64;

        tracing::trace!(
            probability,
            is_speech,
            recording = self.recording,
            pointer = self.pointer,
            "vad frame"
        );

        let mut events = Vec::new();

        if !self.recording && !is_speech {
            self.push_lookback(frame);
            return Ok(events);
        }

        if self.pointer == 0 {
            self.buffer_start = frame_start;
        }

        // A frame may span several buffer capacities; flush each full chunk
        let mut rest = frame;
        let mut rest_start = frame_start;
        while rest.len() >= self.buffer.len() - self.pointer {
            let remaining = self.buffer.len() - self.pointer;
            let (fits, overflow) = rest.split_at(remaining);
            self.buffer[self.pointer..].copy_from_slice(fits);
            self.pointer += remaining;

            tracing::debug!(overflow = overflow.len(), "speech buffer full, forcing flush");
            events.push(VadEvent::SpeechChunk(self.compose_segment(0)));
            rest_start += remaining as u64;
            self.reset_buffer(rest_start);
            self.split = true;
            rest = overflow;
        }
        self.buffer[self.pointer..self.pointer + rest.len()].copy_from_slice(rest);
        self.pointer += rest.len();

        if is_speech {
            if !self.recording {
                tracing::debug!(probability, "speech started");
                events.push(VadEvent::SpeechStart);
                self.recording = true;
            }
            self.post_speech_samples = 0;
            return Ok(events);
        }

        self.post_speech_samples += frame.len();

        if self.post_speech_samples < self.config.min_silence_samples() {
            return Ok(events);
        }

        events.push(VadEvent::SpeechEnd);

        // Trailing silence does not count toward the minimum speech length
        let speech_samples = self.pointer.saturating_sub(self.post_speech_samples);
        if !self.split && speech_samples < self.config.min_speech_samples() {
            tracing::debug!(samples = speech_samples, "recording too short, discarding");
            self.finish_recording();
            return Ok(events);
        }

        let segment = self.compose_segment(self.config.pad_samples());
        tracing::debug!(
            samples = segment.samples.len(),
            duration_ms = segment.duration.as_millis(),
            "speech segment complete"
        );
        events.push(VadEvent::SpeechChunk(segment));
        self.finish_recording();

        Ok(events)
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> VadState {
        if !self.recording {
            VadState::Idle
        } else if self.post_speech_samples > 0 {
            VadState::BufferingSilence
        } else {
            VadState::Recording
        }
    }

    /// Samples currently buffered for the active recording
    #[must_use]
    pub const fn buffered_samples(&self) -> usize {
        self.pointer
    }

    /// Frames currently held for pre-roll
    #[must_use]
    pub fn lookback_frames(&self) -> usize {
        self.lookback.len()
    }

    /// The active configuration
    #[must_use]
    pub const fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Drop all buffered audio and model state
    pub fn reset(&mut self) {
        self.finish_recording();
        self.model.reset();
    }

    fn classify(&self, probability: f32) -> bool {
        probability > self.config.speech_threshold
            || (self.recording && probability >= self.config.exit_threshold)
    }

    fn push_lookback(&mut self, frame: &[f32]) {
        if self.config.max_prev_buffers == 0 {
            return;
        }
        if self.lookback.len() >= self.config.max_prev_buffers {
            self.lookback.pop_front();
        }
        self.lookback.push_back(frame.to_vec());
    }

    /// Build a segment from the lookback queue and `buffer[..pointer + pad]`
    fn compose_segment(&mut self, pad: usize) -> SpeechSegment {
        let end_index = (self.pointer + pad).min(self.buffer.len());
        let lookback_samples: usize = self.lookback.iter().map(Vec::len).sum();

        let mut samples = Vec::with_capacity(lookback_samples + end_index);
        for prev in self.lookback.drain(..) {
            samples.extend_from_slice(&prev);
        }
        samples.extend_from_slice(&self.buffer[..end_index]);

        let start = self.samples_to_duration(self.buffer_start);
        let end = self.samples_to_duration(self.buffer_start + self.pointer as u64);

        SpeechSegment {
            samples,
            sample_rate: self.config.sample_rate,
            start,
            end,
            duration: end.saturating_sub(start),
            ended_at: Utc::now(),
            lookback_samples,
            pad_samples: end_index - self.pointer,
        }
    }

    /// Zero the buffer; the next sample written sits at stream offset `start`
    fn reset_buffer(&mut self, start: u64) {
        self.buffer.fill(0.0);
        self.pointer = 0;
        self.buffer_start = start;
    }

    fn finish_recording(&mut self) {
        self.reset_buffer(self.stream_position);
        self.lookback.clear();
        self.recording = false;
        self.split = false;
        self.post_speech_samples = 0;
    }

    fn samples_to_duration(&self, samples: u64) -> Duration {
        let rate = u64::from(self.config.sample_rate);
        let nanos = (samples % rate) * 1_000_000_000 / rate;
        Duration::from_secs(samples / rate) + Duration::from_nanos(nanos)
    }
}

impl std::fmt::Debug for VadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VadEngine")
            .field("state", &self.state())
            .field("pointer", &self.pointer)
            .field("lookback", &self.lookback.len())
            .field("stream_position", &self.stream_position)
            .finish_non_exhaustive()
    }
}
