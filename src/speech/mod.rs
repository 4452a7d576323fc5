//! Speech output
//!
//! Text fragments are queued on a [`SpeechQueue`], synthesized by a
//! [`Synthesizer`] and played on an [`AudioSink`], one at a time in order.

mod playback;
mod queue;
mod tts;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;

pub use playback::CpalPlayback;
pub use queue::SpeechQueue;
pub use tts::{OpenAiSynthesizer, decode_mp3};

/// Decoded mono audio ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / u64::from(self.sample_rate))
    }

    /// A sine tone, used to check the output device
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tone(frequency: f32, duration: Duration, sample_rate: u32) -> Self {
        let count = (duration.as_secs_f32() * sample_rate as f32) as usize;
        let samples = (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (t * frequency * std::f32::consts::TAU).sin() * 0.2
            })
            .collect();
        Self::new(samples, sample_rate)
    }
}

/// Turns text into audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// # Errors
    ///
    /// Returns `Error::Tts` if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// Plays audio to completion
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `clip`, returning early once `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if playback fails
    async fn play(&self, clip: AudioClip, cancel: &CancellationToken) -> Result<()>;
}
