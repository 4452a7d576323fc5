//! Audio input: frames, microphone capture, resampling, WAV helpers

mod capture;
mod resample;
mod wav;

pub use capture::AudioCapture;
pub use resample::FrameAssembler;
pub use wav::{read_wav, samples_to_wav};

/// Sample rate expected by every downstream stage (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per frame delivered to the VAD (32ms at 16kHz)
pub const FRAME_SAMPLES: usize = 512;

/// A fixed-size block of mono samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Frame length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Average interleaved channels into mono
#[must_use]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = [0.2, 0.4, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.3, 0.0]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn frame_duration() {
        let frame = AudioFrame::new(vec![0.0; FRAME_SAMPLES], SAMPLE_RATE);
        assert!((frame.seconds() - 0.032).abs() < f32::EPSILON);
    }
}
