//! Whisper-compatible HTTP transcription
//!
//! Works against the hosted OpenAI API and local servers that expose the
//! same `/v1/audio/transcriptions` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{Transcriber, check_sample_rate};
use crate::audio::{SAMPLE_RATE, samples_to_wav};
use crate::config::SttConfig;
use crate::{Error, Result};

/// Response from a Whisper transcription endpoint
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech through a Whisper-compatible endpoint
pub struct WhisperTranscriber {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    /// Create a transcriber from config
    #[must_use]
    pub fn new(config: &SttConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!(
                "{}/v1/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
        }
    }

    /// Full URL requests are posted to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn expected_sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        check_sample_rate(self.expected_sample_rate(), sample_rate)?;

        let audio = samples_to_wav(samples, sample_rate)?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let part = Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
            e
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
