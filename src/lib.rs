//! Voxloop - Streaming voice assistant engine
//!
//! This library provides the building blocks of a hands-free assistant:
//! - Voice activity detection over 16 kHz frames
//! - Speech-to-text behind a request/response worker
//! - A tool-calling conversation loop over a streaming LLM
//! - Ordered, interruptible speech output
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │   Microphone  →  AudioCapture  →  VAD worker          │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ SpeechChunk
//! ┌────────────────────▼─────────────────────────────────┐
//! │   VoiceAssistant  →  STT worker  →  Orchestrator      │
//! │                         LlmSession + ToolDispatcher   │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ sentences
//! ┌────────────────────▼─────────────────────────────────┐
//! │   SpeechQueue  →  Synthesizer  →  AudioSink           │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod observer;
pub mod speech;
pub mod stt;
pub mod tools;
pub mod vad;
pub mod worker;

pub use assistant::VoiceAssistant;
pub use config::Config;
pub use conversation::{Message, MessagePart, Orchestrator, Role, Status};
pub use error::{Error, Result};
pub use speech::SpeechQueue;
pub use tools::ToolDispatcher;
pub use vad::{VadConfig, VadEngine, VadEvent};
