//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio_util::sync::CancellationToken;

use super::{AudioClip, AudioSink};
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays clips on the default output device
#[derive(Debug, Clone)]
pub struct CpalPlayback {
    device_name: String,
}

impl CpalPlayback {
    /// Check that an output device is available
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        let device_name = device.name().unwrap_or_default();

        tracing::debug!(device = %device_name, "audio playback initialized");
        Ok(Self { device_name })
    }

    /// Name of the output device found at startup
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[async_trait]
impl AudioSink for CpalPlayback {
    async fn play(&self, clip: AudioClip, cancel: &CancellationToken) -> Result<()> {
        if clip.samples.is_empty() {
            return Ok(());
        }

        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || play_blocking(&clip, &cancel))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Pick an output config at `rate`, or the device default
fn output_config(device: &cpal::Device, rate: u32) -> Result<StreamConfig> {
    let exact = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.channels() <= 2 && c.sample_format() == cpal::SampleFormat::F32)
        .find(|c| {
            c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate)
        });

    match exact {
        Some(supported) => Ok(supported.with_sample_rate(SampleRate(rate)).config()),
        None => device
            .default_output_config()
            .map(Into::into)
            .map_err(|e| Error::Audio(e.to_string())),
    }
}

fn play_blocking(clip: &AudioClip, cancel: &CancellationToken) -> Result<()> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = output_config(&device, clip.sample_rate)?;
    let channels = usize::from(config.channels);

    let samples = if config.sample_rate.0 == clip.sample_rate {
        clip.samples.clone()
    } else {
        resample(&clip.samples, clip.sample_rate, config.sample_rate.0)?
    };
    let samples = Arc::new(samples);

    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(config.sample_rate.0);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::Relaxed) {
        if cancel.is_cancelled() {
            tracing::debug!("playback cancelled");
            return Err(Error::Cancelled);
        }
        if start.elapsed() > timeout {
            tracing::warn!(duration_ms, "playback did not finish in time");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);

    tracing::debug!(samples = samples.len(), "playback complete");
    Ok(())
}

/// Resample mono audio between arbitrary rates
fn resample(input: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    const CHUNK: usize = 1024;

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK, 2, 1)
        .map_err(|e| Error::Audio(format!("failed to build resampler: {e}")))?;

    let expected = input.len() * to as usize / from as usize;
    let mut out = Vec::with_capacity(expected + CHUNK);

    for chunk in input.chunks(CHUNK) {
        let mut block = vec![0.0; CHUNK];
        block[..chunk.len()].copy_from_slice(chunk);
        let frames = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        if let Some(channel) = frames.into_iter().next() {
            out.extend(channel);
        }
    }

    out.truncate(expected.max(1));
    Ok(out)
}
