//! Ollama backend
//!
//! Talks to a local Ollama server: `/api/pull` for loading with progress and
//! `/api/chat` NDJSON streaming for generation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{LlmBackend, LlmSession, ProgressFn, SamplingParams, StopSignal, TokenStream};
use crate::config::LlmConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: Options,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Options {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_predict: u32,
}

impl From<&SamplingParams> for Options {
    fn from(params: &SamplingParams) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            num_predict: params.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Backend for a model served by Ollama
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_stream<T, B>(&self, path: &str, body: &B) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + 'static,
        B: Serialize + Sync,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, path, "ollama request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("ollama {path} returned {status}: {body}")));
        }

        Ok(ndjson(response))
    }
}

/// Split a streamed response body into JSON lines
fn ndjson<T>(response: reqwest::Response) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let lines = response
        .bytes_stream()
        .map_err(Error::from)
        .scan(String::new(), |buffer, chunk| {
            let items: Vec<Result<T>> = match chunk {
                Err(e) => vec![Err(e)],
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    drain_lines(buffer)
                }
            };
            futures::future::ready(Some(items))
        });

    Box::pin(lines.flat_map(stream::iter))
}

/// Parse every complete line in `buffer`, keeping the incomplete tail
fn drain_lines<T: DeserializeOwned>(buffer: &mut String) -> Vec<Result<T>> {
    let Some(last_newline) = buffer.rfind('\n') else {
        return Vec::new();
    };

    let items = buffer[..last_newline]
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<T>(line) {
            Ok(item) => Some(Ok(item)),
            Err(e) => {
                tracing::warn!(error = %e, line, "skipping malformed stream line");
                None
            }
        })
        .collect();

    buffer.drain(..=last_newline);
    items
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn load(&self, progress: ProgressFn<'_>) -> Result<()> {
        tracing::info!(model = %self.model, "loading model");
        let request = PullRequest {
            model: &self.model,
            stream: true,
        };
        let mut updates = self.post_stream::<PullStatus, _>("/api/pull", &request).await?;

        progress(0.0);
        while let Some(update) = updates.next().await {
            let update = update?;
            if let Some(error) = update.error {
                return Err(Error::Llm(format!("failed to pull {}: {error}", self.model)));
            }
            if let (Some(total), Some(completed)) = (update.total, update.completed)
                && total > 0
            {
                #[allow(clippy::cast_precision_loss)]
                let fraction = (completed as f64 / total as f64) as f32;
                progress(fraction.clamp(0.0, 1.0));
            }
            tracing::trace!(status = %update.status, "pull progress");
        }
        progress(1.0);

        tracing::info!(model = %self.model, "model ready");
        Ok(())
    }

    async fn create_session(
        &self,
        system_prompt: &str,
        params: &SamplingParams,
        warmup: bool,
    ) -> Result<Box<dyn LlmSession>> {
        let session = OllamaSession {
            backend: self.clone(),
            options: Options::from(params),
            history: Arc::new(Mutex::new(vec![ChatMessage::new("system", system_prompt)])),
        };

        if warmup {
            session.warm_up().await?;
        }

        tracing::debug!(model = %self.model, warmup, "session created");
        Ok(Box::new(session))
    }
}

/// A chat history bound to one Ollama model
struct OllamaSession {
    backend: OllamaBackend,
    options: Options,
    history: Arc<Mutex<Vec<ChatMessage>>>,
}

impl OllamaSession {
    fn snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Evaluate the system prompt without generating
    async fn warm_up(&self) -> Result<()> {
        let messages = self.snapshot();
        let request = ChatRequest {
            model: &self.backend.model,
            messages: &messages,
            stream: false,
            options: Options {
                num_predict: 0,
                ..self.options
            },
        };

        let started = std::time::Instant::now();
        let response = self
            .backend
            .client
            .post(self.backend.url("/api/chat"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("warm-up failed with {status}: {body}")));
        }

        tracing::debug!(elapsed_ms = started.elapsed().as_millis(), "session warmed up");
        Ok(())
    }
}

/// Appends the reply to the history once generation finishes or is abandoned
struct ReplyCommit {
    history: Arc<Mutex<Vec<ChatMessage>>>,
    reply: String,
}

impl Drop for ReplyCommit {
    fn drop(&mut self) {
        if let Ok(mut history) = self.history.lock() {
            history.push(ChatMessage::new("assistant", std::mem::take(&mut self.reply)));
        }
    }
}

struct Generation {
    chunks: BoxStream<'static, Result<ChatChunk>>,
    stop: StopSignal,
    commit: ReplyCommit,
    finished: bool,
}

#[async_trait]
impl LlmSession for OllamaSession {
    async fn stream_prompt(&mut self, prompt: &str, stop: StopSignal) -> Result<TokenStream> {
        let mut messages = self.snapshot();
        messages.push(ChatMessage::new("user", prompt));

        let request = ChatRequest {
            model: &self.backend.model,
            messages: &messages,
            stream: true,
            options: self.options,
        };
        let chunks = self.backend.post_stream::<ChatChunk, _>("/api/chat", &request).await?;

        if let Ok(mut history) = self.history.lock() {
            history.push(ChatMessage::new("user", prompt));
        }

        let generation = Generation {
            chunks,
            stop,
            commit: ReplyCommit {
                history: Arc::clone(&self.history),
                reply: String::new(),
            },
            finished: false,
        };

        let deltas = stream::unfold(generation, |mut generation| async move {
            loop {
                if generation.finished || generation.stop.is_stopped() {
                    return None;
                }

                let next = tokio::select! {
                    () = generation.stop.stopped() => {
                        tracing::debug!("generation stopped");
                        return None;
                    }
                    next = generation.chunks.next() => next,
                };

                match next {
                    None => return None,
                    Some(Err(e)) => {
                        generation.finished = true;
                        return Some((Err(e), generation));
                    }
                    Some(Ok(chunk)) => {
                        if let Some(error) = chunk.error {
                            generation.finished = true;
                            return Some((Err(Error::Llm(error)), generation));
                        }
                        generation.finished = chunk.done;
                        let delta = chunk.message.map(|m| m.content).unwrap_or_default();
                        if delta.is_empty() {
                            continue;
                        }
                        generation.commit.reply.push_str(&delta);
                        return Some((Ok(delta), generation));
                    }
                }
            }
        });

        Ok(Box::pin(deltas))
    }

    async fn destroy(self: Box<Self>) {
        let turns = self.history.lock().map_or(0, |h| h.len());
        tracing::debug!(model = %self.backend.model, messages = turns, "session destroyed");
    }
}
