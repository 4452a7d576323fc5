//! Speech-to-text
//!
//! A [`Transcriber`] turns a finalized speech segment into text. Transcription
//! runs behind a [`worker`](crate::worker) so the voice loop only awaits a
//! request id.

mod whisper;

use async_trait::async_trait;

use crate::worker::{self, Service, WorkerClient};
use crate::{Error, Result};

pub use whisper::WhisperTranscriber;

/// Turns audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// The only sample rate [`Transcriber::transcribe`] accepts
    fn expected_sample_rate(&self) -> u32;

    /// Transcribe mono samples
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt` if `sample_rate` differs from
    /// [`Transcriber::expected_sample_rate`] or transcription fails
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Reject audio at a rate the transcriber was not built for
///
/// # Errors
///
/// Returns `Error::Stt` on mismatch
pub fn check_sample_rate(expected: u32, actual: u32) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Stt(format!(
            "expected {expected} Hz audio, got {actual} Hz"
        )))
    }
}

/// One transcription job
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Hosts a [`Transcriber`] on a worker
pub struct TranscriptionService<T> {
    transcriber: T,
}

impl<T: Transcriber + 'static> TranscriptionService<T> {
    #[must_use]
    pub const fn new(transcriber: T) -> Self {
        Self { transcriber }
    }

    /// Spawn the service on its own worker task
    #[must_use]
    pub fn spawn(self) -> WorkerClient<Self> {
        worker::spawn("stt", self)
    }
}

#[async_trait]
impl<T: Transcriber + 'static> Service for TranscriptionService<T> {
    type Request = TranscriptionRequest;
    type Response = String;

    async fn handle(&mut self, request: TranscriptionRequest) -> Result<String> {
        let started = std::time::Instant::now();
        let text = self
            .transcriber
            .transcribe(&request.samples, request.sample_rate)
            .await?;
        tracing::debug!(
            samples = request.samples.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "transcription finished"
        );
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl Transcriber for Fixed {
        fn expected_sample_rate(&self) -> u32 {
            16_000
        }

        async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
            check_sample_rate(self.expected_sample_rate(), sample_rate)?;
            Ok(format!("  heard {} samples \n", samples.len()))
        }
    }

    #[tokio::test]
    async fn worker_trims_transcripts() {
        let client = TranscriptionService::new(Fixed).spawn();
        let text = client
            .call(TranscriptionRequest {
                samples: vec![0.0; 320],
                sample_rate: 16_000,
            })
            .await
            .unwrap();
        assert_eq!(text, "heard 320 samples");
    }

    #[tokio::test]
    async fn wrong_rate_is_rejected() {
        let client = TranscriptionService::new(Fixed).spawn();
        let err = client
            .call(TranscriptionRequest {
                samples: vec![0.0; 320],
                sample_rate: 44_100,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Stt(_)));
    }
}
