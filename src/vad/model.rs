//! Per-frame speech probability models

use crate::Result;

/// Scores a frame of 16 kHz audio with a speech probability in `0.0..=1.0`
///
/// Implementations may carry recurrent state across frames, so frames must be
/// fed in arrival order.
pub trait SpeechModel: Send {
    /// Score one frame
    ///
    /// # Errors
    ///
    /// Returns error if inference fails for this frame
    fn predict(&mut self, frame: &[f32]) -> Result<f32>;

    /// Clear any recurrent state
    fn reset(&mut self) {}
}

/// Loudness of the logistic midpoint (probability 0.5), in dBFS
const DEFAULT_MIDPOINT_DB: f32 = -32.0;

/// Width of the logistic transition, in dB
const DEFAULT_WIDTH_DB: f32 = 2.5;

/// Heuristic model mapping RMS energy to a probability with a logistic curve
#[derive(Debug, Clone, Copy)]
pub struct EnergyModel {
    midpoint_db: f32,
    width_db: f32,
}

impl EnergyModel {
    /// Create a model whose probability crosses 0.5 at `midpoint_db`
    #[must_use]
    pub fn new(midpoint_db: f32, width_db: f32) -> Self {
        Self {
            midpoint_db,
            width_db: width_db.max(f32::EPSILON),
        }
    }
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self::new(DEFAULT_MIDPOINT_DB, DEFAULT_WIDTH_DB)
    }
}

impl SpeechModel for EnergyModel {
    fn predict(&mut self, frame: &[f32]) -> Result<f32> {
        let rms = calculate_energy(frame);
        if rms <= f32::EPSILON {
            return Ok(0.0);
        }

        let db = 20.0 * rms.log10();
        Ok(1.0 / (1.0 + (-(db - self.midpoint_db) / self.width_db).exp()))
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
