//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::{AudioFrame, FrameAssembler, downmix};
use crate::{Error, Result};

/// Captures audio from the default input device as 16kHz frames
///
/// The device is opened at its native configuration; the stream callback
/// downmixes, resamples and frames the audio before handing it off.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let config: StreamConfig = device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .into();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    /// Start capturing, delivering frames to `frames`
    ///
    /// Frames are dropped with a warning if the receiver falls behind.
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let mut assembler = FrameAssembler::new(self.config.sample_rate.0)?;

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    match assembler.push(&mono) {
                        Ok(ready) => {
                            for frame in ready {
                                if let Err(mpsc::error::TrySendError::Full(_)) =
                                    frames.try_send(frame)
                                {
                                    tracing::warn!("capture consumer lagging, dropping frame");
                                }
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "failed to frame captured audio"),
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Native rate of the input device
    #[must_use]
    pub const fn device_sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
