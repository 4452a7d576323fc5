//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use voxloop::llm::{LlmBackend, LlmSession, ProgressFn, SamplingParams, StopSignal, TokenStream};
use voxloop::speech::{AudioClip, AudioSink, Synthesizer};
use voxloop::tools::{ContentItem, ToolArguments, ToolBackend, ToolDefinition};
use voxloop::{Error, Result};

/// A scripted delta that makes the session stream yield an error instead
pub const STREAM_FAILURE: &str = "\u{0}stream failure";

/// Counters shared between a scripted backend and its sessions
#[derive(Debug, Default)]
pub struct ScriptLog {
    pub loads: AtomicUsize,
    pub sessions_created: AtomicUsize,
    pub sessions_destroyed: AtomicUsize,
    pub system_prompts: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptLog {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().unwrap().clone()
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
            - self.sessions_destroyed.load(Ordering::SeqCst)
    }
}

/// LLM backend replaying canned replies in order, one per prompt
///
/// Each reply is a list of deltas. When the script runs out the reply is empty.
pub struct ScriptedBackend {
    replies: Arc<Mutex<VecDeque<Vec<String>>>>,
    delta_delay: Duration,
    fail_sessions: AtomicBool,
    pub log: Arc<ScriptLog>,
}

impl ScriptedBackend {
    pub fn new<I, R, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = replies
            .into_iter()
            .map(|reply| reply.into_iter().map(Into::into).collect())
            .collect();
        Self {
            replies: Arc::new(Mutex::new(replies)),
            delta_delay: Duration::ZERO,
            fail_sessions: AtomicBool::new(false),
            log: Arc::new(ScriptLog::default()),
        }
    }

    /// Pause before every delta so a test can stop generation midway
    #[must_use]
    pub const fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }

    /// Make the next session creations fail
    pub fn fail_sessions(&self, fail: bool) {
        self.fail_sessions.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn load(&self, progress: ProgressFn<'_>) -> Result<()> {
        progress(0.5);
        progress(1.0);
        self.log.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_session(
        &self,
        system_prompt: &str,
        _params: &SamplingParams,
        _warmup: bool,
    ) -> Result<Box<dyn LlmSession>> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(Error::Llm("session refused".to_string()));
        }
        self.log.sessions_created.fetch_add(1, Ordering::SeqCst);
        self.log
            .system_prompts
            .lock()
            .unwrap()
            .push(system_prompt.to_string());

        Ok(Box::new(ScriptedSession {
            replies: Arc::clone(&self.replies),
            delta_delay: self.delta_delay,
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedSession {
    replies: Arc<Mutex<VecDeque<Vec<String>>>>,
    delta_delay: Duration,
    log: Arc<ScriptLog>,
}

#[async_trait]
impl LlmSession for ScriptedSession {
    async fn stream_prompt(&mut self, prompt: &str, stop: StopSignal) -> Result<TokenStream> {
        self.log.prompts.lock().unwrap().push(prompt.to_string());
        let deltas = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        let delay = self.delta_delay;

        let stream = futures::stream::unfold(
            (deltas.into_iter(), stop),
            move |(mut deltas, stop)| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if stop.is_stopped() {
                    return None;
                }
                let delta = deltas.next()?;
                let item = if delta == STREAM_FAILURE {
                    Err(Error::Llm("connection reset mid-stream".to_string()))
                } else {
                    Ok(delta)
                };
                Some((item, (deltas, stop)))
            },
        );
        Ok(stream.boxed())
    }

    async fn destroy(self: Box<Self>) {
        self.log.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Synthesizer encoding each character of the text as one sample
#[derive(Debug, Default)]
pub struct CharSynthesizer {
    pub synthesized: Mutex<Vec<String>>,
}

#[async_trait]
impl Synthesizer for CharSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        self.synthesized.lock().unwrap().push(text.to_string());
        if text.contains("unspeakable") {
            return Err(Error::Tts("cannot synthesize".to_string()));
        }
        let samples = text.bytes().map(f32::from).collect();
        Ok(AudioClip::new(samples, 16_000))
    }
}

/// Sink that records what it played, decoding [`CharSynthesizer`] clips
#[derive(Debug)]
pub struct RecordingSink {
    play_time: Duration,
    pub played: Mutex<Vec<String>>,
    pub interrupted: AtomicUsize,
}

impl RecordingSink {
    pub const fn new(play_time: Duration) -> Self {
        Self {
            play_time,
            played: Mutex::new(Vec::new()),
            interrupted: AtomicUsize::new(0),
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, clip: AudioClip, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            () = cancel.cancelled() => {
                self.interrupted.fetch_add(1, Ordering::SeqCst);
                Err(Error::Cancelled)
            }
            () = tokio::time::sleep(self.play_time) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let text: String = clip.samples.iter().map(|&s| char::from(s as u8)).collect();
                self.played.lock().unwrap().push(text);
                Ok(())
            }
        }
    }
}

type Handler = Box<dyn Fn(&str, &ToolArguments) -> Result<Vec<ContentItem>> + Send + Sync>;

/// In-memory tool backend
pub struct StaticTools {
    id: String,
    tools: Vec<ToolDefinition>,
    handler: Handler,
    concurrent: bool,
    call_time: Duration,
    reachable: AtomicBool,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StaticTools {
    pub fn new(
        id: &str,
        names: &[&str],
        handler: impl Fn(&str, &ToolArguments) -> Result<Vec<ContentItem>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.to_string(),
            tools: names.iter().map(|name| tool(name)).collect(),
            handler: Box::new(handler),
            concurrent: true,
            call_time: Duration::ZERO,
            reachable: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Backend whose tools reply with `"<name> ok"`
    pub fn echo(id: &str, names: &[&str]) -> Self {
        Self::new(id, names, |name, _| Ok(vec![ContentItem::text(format!("{name} ok"))]))
    }

    #[must_use]
    pub const fn serialized(mut self) -> Self {
        self.concurrent = false;
        self
    }

    #[must_use]
    pub const fn with_call_time(mut self, call_time: Duration) -> Self {
        self.call_time = call_time;
        self
    }

    /// Make tool listing fail
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ToolBackend for StaticTools {
    fn id(&self) -> &str {
        &self.id
    }

    async fn active_tools(&self) -> Result<Vec<ToolDefinition>> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(self.tools.clone())
        } else {
            Err(Error::Tool(format!("{} is unreachable", self.id)))
        }
    }

    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.call_time.is_zero() {
            tokio::time::sleep(self.call_time).await;
        }
        let result = (self.handler)(name, &arguments);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn supports_concurrent_calls(&self) -> bool {
        self.concurrent
    }
}

/// A tool definition with an empty parameter schema
pub fn tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("The {name} tool"),
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

/// Wait until `condition` holds, polling for up to a second
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
