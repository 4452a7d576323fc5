//! Conversation orchestration
//!
//! [`Orchestrator`] drives the generation loop; [`StreamScanner`] splits the
//! streamed reply into sentences and tool calls; [`prompt`] builds the system
//! and tool-result prompts.

mod message;
mod orchestrator;
pub mod prompt;
mod scanner;

pub use message::{Message, MessagePart, Role, ToolCallPart};
pub use orchestrator::{Orchestrator, OrchestratorSettings, Status, StopHandle, TurnOutcome};
pub use scanner::{ParsedToolCall, ScanItem, StreamScanner};
