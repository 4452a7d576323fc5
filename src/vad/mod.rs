//! Voice activity detection
//!
//! A [`SpeechModel`] scores frames; the [`VadEngine`] turns scores into
//! speech segments; [`spawn_vad_worker`] hosts the engine on its own thread.

mod engine;
mod model;
mod worker;

pub use engine::{SpeechSegment, VadConfig, VadEngine, VadEvent, VadState};
pub use model::{EnergyModel, SpeechModel, calculate_energy};
pub use worker::{VadHandle, spawn_vad_worker};
