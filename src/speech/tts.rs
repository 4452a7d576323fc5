//! Text-to-speech through an OpenAI-compatible endpoint

use std::io::Cursor;

use async_trait::async_trait;

use super::{AudioClip, Synthesizer};
use crate::config::TtsConfig;
use crate::{Error, Result};

/// Sample rate assumed when a stream carries no decodable frame header
const DEFAULT_MP3_RATE: u32 = 24_000;

/// Synthesizes speech via `/v1/audio/speech`
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    voice: String,
    speed: f32,
    model: String,
}

impl OpenAiSynthesizer {
    #[must_use]
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/v1/audio/speech", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'static str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), chars = text.len(), "speech synthesized");
        decode_mp3(&audio)
    }
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns `Error::Tts` if the stream is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate.is_none() {
                    sample_rate = u32::try_from(frame.sample_rate).ok();
                }

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Tts(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(AudioClip::new(
        samples,
        sample_rate.unwrap_or(DEFAULT_MP3_RATE),
    ))
}
