//! Language model sessions
//!
//! An [`LlmBackend`] owns the loaded model and creates [`LlmSession`]s. A
//! session carries its own history and streams reply deltas for each prompt.

mod ollama;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::LlmConfig;

pub use ollama::OllamaBackend;

/// Reply deltas as they are generated
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Model loading progress in `0.0..=1.0`
pub type ProgressFn<'a> = &'a (dyn Fn(f32) + Send + Sync);

/// Decoding parameters for a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Upper bound on generated tokens per prompt
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for SamplingParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_tokens: config.max_tokens,
        }
    }
}

/// Stopping condition polled by a generation between deltas
#[derive(Debug, Clone, Default)]
pub struct StopSignal(CancellationToken);

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the current generation to stop after the delta in flight
    pub fn stop(&self) {
        self.0.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once [`StopSignal::stop`] has been called
    pub async fn stopped(&self) {
        self.0.cancelled().await;
    }
}

/// A loaded model able to create sessions
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Make the model available, reporting progress
    ///
    /// # Errors
    ///
    /// Returns `Error::Llm` if the model cannot be loaded
    async fn load(&self, progress: ProgressFn<'_>) -> Result<()>;

    /// Create a session seeded with `system_prompt`
    ///
    /// With `warmup`, the session runs a zero-token generation so the first
    /// real prompt starts from a primed cache.
    ///
    /// # Errors
    ///
    /// Returns `Error::Llm` if the session cannot be created
    async fn create_session(
        &self,
        system_prompt: &str,
        params: &SamplingParams,
        warmup: bool,
    ) -> Result<Box<dyn LlmSession>>;
}

/// A conversation-scoped generation context
#[async_trait]
pub trait LlmSession: Send {
    /// Append `prompt` as a user message and stream the reply
    ///
    /// The reply is appended to the session history when the stream ends or
    /// is dropped, including a partial reply cut short by `stop`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Llm` if generation cannot start; errors after the
    /// first delta arrive as stream items
    async fn stream_prompt(&mut self, prompt: &str, stop: StopSignal) -> Result<TokenStream>;

    /// Release the session
    async fn destroy(self: Box<Self>);
}
