//! Conversation state machine
//!
//! Owns the LLM session and the message log. A user turn streams a reply,
//! records sentences and tool calls in text order, runs the tool calls
//! concurrently, and feeds their results back until the model answers
//! without tools.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use uuid::Uuid;

use super::prompt::{system_prompt, tool_results_prompt};
use super::scanner::{ParsedToolCall, ScanItem, StreamScanner};
use super::{Message, MessagePart, Role, ToolCallPart};
use crate::config::ConversationConfig;
use crate::llm::{LlmBackend, LlmSession, SamplingParams, StopSignal};
use crate::observer::{Observers, Subscription};
use crate::tools::{ToolDispatcher, ToolResponse};
use crate::{Error, Result};

/// Lifecycle of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Idle,
    /// Model is loading; `progress` in `0.0..=1.0`
    ModelLoading { progress: f32 },
    ConversationLoading,
    Ready,
    /// A subsystem failed; cleared by a successful reload
    Error(String),
}

/// Settings fixed for the lifetime of an orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub base_prompt: String,
    pub end_keyword: String,
    pub restart_delay: Duration,
    pub max_tool_rounds: usize,
    pub warmup: bool,
    pub sampling: SamplingParams,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn new(conversation: &ConversationConfig, sampling: SamplingParams) -> Self {
        Self {
            base_prompt: conversation.system_prompt.clone(),
            end_keyword: conversation.end_keyword.clone(),
            restart_delay: Duration::from_millis(conversation.restart_delay_ms),
            max_tool_rounds: conversation.max_tool_rounds.max(1),
            warmup: conversation.warmup,
            sampling,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::new(&ConversationConfig::default(), SamplingParams::default())
    }
}

/// Summary of one user turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Sentences forwarded to the caller, joined by spaces
    pub spoken: String,
    /// Raw text of the final generation round
    pub raw_reply: String,
    /// Generation rounds run
    pub rounds: usize,
    /// Tool calls dispatched across all rounds
    pub tool_calls: usize,
    /// Generation was stopped before it finished
    pub stopped: bool,
    /// The reply ended the conversation and a fresh one was created
    pub conversation_ended: bool,
}

/// Shared handle that stops whichever generation is running
#[derive(Debug, Clone)]
pub struct StopHandle {
    current: Arc<Mutex<StopSignal>>,
}

impl StopHandle {
    /// Stop the running generation, if any
    pub fn stop(&self) {
        if let Ok(signal) = self.current.lock() {
            signal.stop();
        }
    }
}

struct SessionState {
    session: Option<Box<dyn LlmSession>>,
    system_prompt: Option<String>,
    model_loaded: bool,
}

/// Drives conversations against an LLM backend and a tool dispatcher
pub struct Orchestrator {
    backend: Arc<dyn LlmBackend>,
    tools: Arc<ToolDispatcher>,
    settings: OrchestratorSettings,
    state: tokio::sync::Mutex<SessionState>,
    messages: Mutex<Vec<Message>>,
    status: Mutex<Status>,
    stop: Arc<Mutex<StopSignal>>,
    message_observers: Observers<Vec<Message>>,
    status_observers: Observers<Status>,
    end_observers: Observers<()>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        tools: Arc<ToolDispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backend,
            tools,
            settings,
            state: tokio::sync::Mutex::new(SessionState {
                session: None,
                system_prompt: None,
                model_loaded: false,
            }),
            messages: Mutex::new(Vec::new()),
            status: Mutex::new(Status::Idle),
            stop: Arc::new(Mutex::new(StopSignal::new())),
            message_observers: Observers::new(),
            status_observers: Observers::new(),
            end_observers: Observers::new(),
        }
    }

    /// Load the model once
    ///
    /// # Errors
    ///
    /// Returns the backend error; status becomes [`Status::Error`]
    pub async fn load_model(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.load_model_locked(&mut state).await
    }

    /// Create a conversation for the current tool configuration
    ///
    /// Returns `false` without touching the session when the system prompt is
    /// unchanged and `force` is not set.
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot be loaded or the session cannot be
    /// created; status becomes [`Status::Error`]
    pub async fn create_conversation(&self, force: bool) -> Result<bool> {
        let tools = self.tools.list_active_tools().await;
        let prompt = system_prompt(&self.settings.base_prompt, &tools, &self.settings.end_keyword);

        let mut state = self.state.lock().await;
        if !force && state.session.is_some() && state.system_prompt.as_deref() == Some(&prompt) {
            tracing::debug!("system prompt unchanged, keeping conversation");
            return Ok(false);
        }

        self.rebuild_locked(&mut state, prompt).await?;
        Ok(true)
    }

    /// Run one user turn
    ///
    /// `on_sentence` receives each spoken sentence as soon as it is complete.
    /// A failed generation aborts the turn and leaves the parts recorded so
    /// far in the log.
    ///
    /// # Errors
    ///
    /// Returns error if no conversation is loaded or generation fails
    pub async fn submit_user_turn<F>(&self, text: &str, mut on_sentence: F) -> Result<TurnOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let mut state = self.state.lock().await;
        if state.session.is_none() {
            return Err(Error::Conversation("no conversation loaded".to_string()));
        }

        let stop = StopSignal::new();
        if let Ok(mut current) = self.stop.lock() {
            *current = stop.clone();
        }

        let assistant = Message::new(Role::Assistant);
        let assistant_id = assistant.id;
        self.update_messages(|messages| {
            messages.push(Message::with_text(Role::User, text));
            messages.push(assistant);
        });

        tracing::info!(user = text, "user turn");

        let mut outcome = TurnOutcome::default();
        let mut spoken = Vec::new();
        let mut prompt = text.to_string();

        while !prompt.is_empty() {
            outcome.rounds += 1;
            let session = state
                .session
                .as_mut()
                .ok_or_else(|| Error::Conversation("conversation closed during turn".to_string()))?;

            let mut stream = session.stream_prompt(&prompt, stop.clone()).await?;
            let mut scanner = StreamScanner::new();
            let mut calls: Vec<(usize, ParsedToolCall)> = Vec::new();

            while let Some(delta) = stream.next().await {
                let delta = delta?;
                for item in scanner.push(&delta) {
                    self.record_item(assistant_id, item, &mut calls, &mut spoken, &mut on_sentence);
                }
            }
            drop(stream);
            for item in scanner.finish() {
                self.record_item(assistant_id, item, &mut calls, &mut spoken, &mut on_sentence);
            }

            outcome.raw_reply = scanner.raw().to_string();

            if stop.is_stopped() {
                tracing::debug!(round = outcome.rounds, "generation stopped, ending turn");
                outcome.stopped = true;
                break;
            }

            if calls.is_empty() {
                break;
            }

            outcome.tool_calls += calls.len();
            let results = self.dispatch(assistant_id, calls).await;

            if outcome.rounds >= self.settings.max_tool_rounds {
                tracing::warn!(rounds = outcome.rounds, "tool round limit reached, ending turn");
                break;
            }
            prompt = tool_results_prompt(&results);
        }

        outcome.spoken = spoken.join(" ");

        if !outcome.stopped && self.is_conversation_end(&outcome.raw_reply) {
            tracing::info!("conversation end keyword received");
            self.end_observers.notify(&());
            tokio::time::sleep(self.settings.restart_delay).await;

            let prompt = state.system_prompt.clone().unwrap_or_else(|| {
                system_prompt(&self.settings.base_prompt, &[], &self.settings.end_keyword)
            });
            self.rebuild_locked(&mut state, prompt).await?;
            outcome.conversation_ended = true;
        }

        tracing::debug!(
            rounds = outcome.rounds,
            tool_calls = outcome.tool_calls,
            stopped = outcome.stopped,
            ended = outcome.conversation_ended,
            "turn complete"
        );
        Ok(outcome)
    }

    /// Handle that stops the running generation
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            current: Arc::clone(&self.stop),
        }
    }

    /// Snapshot of the message log
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| Status::Error(e.to_string()))
    }

    /// Called with the full log whenever it changes
    pub fn subscribe_messages(
        &self,
        listener: impl Fn(&Vec<Message>) + Send + Sync + 'static,
    ) -> Subscription {
        self.message_observers.subscribe(listener)
    }

    /// Called on every status change
    pub fn subscribe_status(
        &self,
        listener: impl Fn(&Status) + Send + Sync + 'static,
    ) -> Subscription {
        self.status_observers.subscribe(listener)
    }

    /// Called when a reply ends the conversation, before it is rebuilt
    pub fn subscribe_conversation_end(
        &self,
        listener: impl Fn(&()) + Send + Sync + 'static,
    ) -> Subscription {
        self.end_observers.subscribe(listener)
    }

    /// Stop generation and release the session
    pub async fn shutdown(&self) {
        self.stop_handle().stop();
        let mut state = self.state.lock().await;
        if let Some(session) = state.session.take() {
            session.destroy().await;
        }
        state.system_prompt = None;
        drop(state);
        self.set_status(Status::Idle);
        tracing::debug!("orchestrator shut down");
    }

    async fn load_model_locked(&self, state: &mut SessionState) -> Result<()> {
        if state.model_loaded {
            return Ok(());
        }

        self.set_status(Status::ModelLoading { progress: 0.0 });
        let progress = |fraction: f32| self.set_status(Status::ModelLoading { progress: fraction });

        match self.backend.load(&progress).await {
            Ok(()) => {
                state.model_loaded = true;
                self.set_status(Status::Idle);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "model failed to load");
                self.set_status(Status::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Replace the session with a fresh one seeded with `prompt`
    async fn rebuild_locked(&self, state: &mut SessionState, prompt: String) -> Result<()> {
        self.load_model_locked(state).await?;
        self.set_status(Status::ConversationLoading);

        if let Some(old) = state.session.take() {
            old.destroy().await;
        }
        state.system_prompt = None;

        let session = match self
            .backend
            .create_session(&prompt, &self.settings.sampling, self.settings.warmup)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "failed to create conversation");
                self.set_status(Status::Error(e.to_string()));
                return Err(e);
            }
        };

        state.session = Some(session);
        let system = Message::with_text(Role::System, prompt.clone());
        state.system_prompt = Some(prompt);
        self.update_messages(|messages| {
            messages.clear();
            messages.push(system);
        });

        self.set_status(Status::Ready);
        tracing::info!("conversation ready");
        Ok(())
    }

    fn record_item<F: FnMut(&str)>(
        &self,
        assistant_id: Uuid,
        item: ScanItem,
        calls: &mut Vec<(usize, ParsedToolCall)>,
        spoken: &mut Vec<String>,
        on_sentence: &mut F,
    ) {
        match item {
            ScanItem::Sentence(sentence) => {
                let text = self.strip_end_keyword(&sentence);
                if text.is_empty() {
                    return;
                }
                self.update_message(assistant_id, |message| {
                    message.parts.push(MessagePart::Text { text: text.clone() });
                });
                on_sentence(&text);
                spoken.push(text);
            }
            ScanItem::ToolCall(call) => {
                tracing::debug!(tool = %call.name, "tool call extracted");
                let mut index = 0;
                self.update_message(assistant_id, |message| {
                    index = message.parts.len();
                    message.parts.push(MessagePart::ToolCall(ToolCallPart {
                        function_name: call.name.clone(),
                        parameters: call.parameters.clone(),
                        response: String::new(),
                        response_media: None,
                    }));
                });
                calls.push((index, call));
            }
        }
    }

    /// Run every call concurrently and record the results in place
    async fn dispatch(
        &self,
        assistant_id: Uuid,
        calls: Vec<(usize, ParsedToolCall)>,
    ) -> Vec<(String, ToolResponse)> {
        let responses = join_all(calls.iter().map(|(_, call)| async move {
            match self.tools.call_tool(&call.name, call.parameters.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool dispatch failed");
                    ToolResponse {
                        text: format!("Error calling tool \"{}\": {e}", call.name),
                        media: None,
                    }
                }
            }
        }))
        .await;

        self.update_message(assistant_id, |message| {
            for ((index, _), response) in calls.iter().zip(&responses) {
                if let Some(MessagePart::ToolCall(part)) = message.parts.get_mut(*index) {
                    part.response.clone_from(&response.text);
                    part.response_media.clone_from(&response.media);
                }
            }
        });

        calls
            .into_iter()
            .map(|(_, call)| call.name)
            .zip(responses)
            .collect()
    }

    fn is_conversation_end(&self, raw_reply: &str) -> bool {
        let keyword = self.settings.end_keyword.as_str();
        !keyword.is_empty() && raw_reply.trim_end().ends_with(keyword)
    }

    fn strip_end_keyword(&self, text: &str) -> String {
        let keyword = self.settings.end_keyword.as_str();
        if keyword.is_empty() || !text.contains(keyword) {
            return text.trim().to_string();
        }
        text.replace(keyword, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn update_messages(&self, f: impl FnOnce(&mut Vec<Message>)) {
        let snapshot = match self.messages.lock() {
            Ok(mut messages) => {
                f(&mut messages);
                messages.clone()
            }
            Err(e) => {
                tracing::error!(error = %e, "message log lock poisoned");
                return;
            }
        };
        self.message_observers.notify(&snapshot);
    }

    fn update_message(&self, id: Uuid, f: impl FnOnce(&mut Message)) {
        self.update_messages(|messages| {
            if let Some(message) = messages.iter_mut().find(|m| m.id == id) {
                f(message);
            }
        });
    }

    fn set_status(&self, status: Status) {
        if let Ok(mut current) = self.status.lock() {
            if *current == status {
                return;
            }
            current.clone_from(&status);
        }
        tracing::debug!(status = ?status, "status changed");
        self.status_observers.notify(&status);
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("status", &self.status())
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}
