//! Error types for voxloop

use thiserror::Error;

/// Result type alias for voxloop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice assistant engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error
    #[error("vad error: {0}")]
    Vad(String),

    /// VAD engine failed to initialize and will not accept frames
    #[error("vad engine is not ready")]
    VadNotReady,

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// LLM backend or session error
    #[error("llm error: {0}")]
    Llm(String),

    /// Tool backend error
    #[error("tool error: {0}")]
    Tool(String),

    /// Worker channel closed or worker crashed
    #[error("worker error: {0}")]
    Worker(String),

    /// Conversation state error
    #[error("conversation error: {0}")]
    Conversation(String),

    /// Operation was cancelled by the caller
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error represents a user-initiated cancellation rather than a failure
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguished() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::Tool("boom".to_string()).is_cancellation());
    }
}
