//! Conversion of device audio into fixed-size 16kHz frames

use rubato::{FftFixedIn, Resampler};

use super::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE};
use crate::{Error, Result};

/// Input block size handed to the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Sub-chunks used by the FFT resampler
const SUB_CHUNKS: usize = 2;

/// Turns arbitrary-rate mono audio into [`FRAME_SAMPLES`]-long frames at [`SAMPLE_RATE`]
///
/// Input may arrive in blocks of any size; leftovers are carried to the next
/// call so no samples are lost between blocks.
pub struct FrameAssembler {
    resampler: Option<FftFixedIn<f32>>,
    input_rate: u32,
    pending_input: Vec<f32>,
    pending_output: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler for audio captured at `input_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for this rate
    pub fn new(input_rate: u32) -> Result<Self> {
        if input_rate == 0 {
            return Err(Error::Audio("input sample rate must be positive".to_string()));
        }

        let resampler = if input_rate == SAMPLE_RATE {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                input_rate as usize,
                SAMPLE_RATE as usize,
                RESAMPLE_CHUNK,
                SUB_CHUNKS,
                1,
            )
            .map_err(|e| Error::Audio(format!("failed to build resampler: {e}")))?;
            tracing::debug!(from = input_rate, to = SAMPLE_RATE, "resampling capture audio");
            Some(resampler)
        };

        Ok(Self {
            resampler,
            input_rate,
            pending_input: Vec::new(),
            pending_output: Vec::new(),
        })
    }

    /// Rate of the audio being fed in
    #[must_use]
    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Feed mono samples, returning every frame completed by them
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<AudioFrame>> {
        match self.resampler.as_mut() {
            None => self.pending_output.extend_from_slice(samples),
            Some(resampler) => {
                self.pending_input.extend_from_slice(samples);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending_input.len() < needed {
                        break;
                    }
                    let block = [self.pending_input.drain(..needed).collect::<Vec<f32>>()];
                    let output = resampler
                        .process(&block, None)
                        .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
                    if let Some(channel) = output.into_iter().next() {
                        self.pending_output.extend(channel);
                    }
                }
            }
        }

        let complete = self.pending_output.len() / FRAME_SAMPLES;
        let frames = self
            .pending_output
            .drain(..complete * FRAME_SAMPLES)
            .collect::<Vec<_>>()
            .chunks_exact(FRAME_SAMPLES)
            .map(|chunk| AudioFrame::new(chunk.to_vec(), SAMPLE_RATE))
            .collect();

        Ok(frames)
    }
}

impl std::fmt::Debug for FrameAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAssembler")
            .field("input_rate", &self.input_rate)
            .field("resampling", &self.resampler.is_some())
            .field("pending_output", &self.pending_output.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_rate_is_chunked_without_loss() {
        let mut assembler = FrameAssembler::new(SAMPLE_RATE).unwrap();
        let input: Vec<f32> = (0..1300).map(|i| i as f32).collect();

        let mut frames = assembler.push(&input[..700]).unwrap();
        assert_eq!(frames.len(), 1);
        frames.extend(assembler.push(&input[700..]).unwrap());
        assert_eq!(frames.len(), 2);

        let joined: Vec<f32> = frames.into_iter().flat_map(|f| f.samples).collect();
        assert_eq!(joined, input[..2 * FRAME_SAMPLES]);
    }

    #[test]
    fn higher_rates_are_downsampled() {
        let mut assembler = FrameAssembler::new(48_000).unwrap();
        let one_second = vec![0.0f32; 48_000];

        let frames = assembler.push(&one_second).unwrap();
        // One second at 16kHz is 31.25 frames, less resampler latency
        assert!(frames.len() >= 20 && frames.len() <= 32, "got {}", frames.len());
        assert!(frames.iter().all(|f| f.sample_rate == SAMPLE_RATE));
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(FrameAssembler::new(0).is_err());
    }
}
