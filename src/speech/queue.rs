//! Sequential, cancellable speech output

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{AudioSink, Synthesizer};
use crate::Error;

struct SpeechJob {
    text: String,
    token: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<SpeechJob>,
    processing: bool,
}

struct Inner {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    state: Mutex<QueueState>,
    token: Mutex<CancellationToken>,
    idle: Notify,
}

/// FIFO of synthesis and playback jobs
///
/// At most one job is synthesized or played at a time. Cancelled jobs are
/// skipped when they reach the head of the queue; a job already playing
/// stops when its token fires.
#[derive(Clone)]
pub struct SpeechQueue {
    inner: Arc<Inner>,
}

impl SpeechQueue {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                synthesizer,
                sink,
                state: Mutex::new(QueueState::default()),
                token: Mutex::new(CancellationToken::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue `text` for playback under `token`
    ///
    /// Returns `false` if the text is blank or the token is already cancelled.
    /// Must be called from within a tokio runtime.
    pub fn speak(&self, text: &str, token: &CancellationToken) -> bool {
        let text = text.trim();
        if text.is_empty() || token.is_cancelled() {
            return false;
        }

        let Ok(mut state) = self.inner.state.lock() else {
            return false;
        };
        state.jobs.push_back(SpeechJob {
            text: text.to_string(),
            token: token.clone(),
        });

        if !state.processing {
            state.processing = true;
            tokio::spawn(process(Arc::clone(&self.inner)));
        }
        true
    }

    /// Token for speech that should stop on the next interrupt
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.inner
            .token
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Cancel all speech under the current token and install a fresh one
    pub fn interrupt(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        if let Ok(mut token) = self.inner.token.lock() {
            token.cancel();
            *token = fresh.clone();
        }
        tracing::debug!("speech interrupted");
        fresh
    }

    /// Jobs waiting behind the one in progress
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().map_or(0, |s| s.jobs.len())
    }

    /// Whether a job is being synthesized or played
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().is_ok_and(|s| s.processing)
    }

    /// Wait until the queue has drained
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for SpeechQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechQueue")
            .field("pending", &self.pending())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Drain the queue, one job at a time
async fn process(inner: Arc<Inner>) {
    loop {
        let job = {
            let Ok(mut state) = inner.state.lock() else {
                return;
            };
            state.jobs.retain(|job| !job.token.is_cancelled());
            if let Some(job) = state.jobs.pop_front() {
                job
            } else {
                state.processing = false;
                drop(state);
                inner.idle.notify_waiters();
                return;
            }
        };

        if let Err(e) = play_job(&inner, job).await {
            if e.is_cancellation() {
                tracing::debug!("speech job cancelled");
            } else {
                tracing::warn!(error = %e, "speech job failed, continuing");
            }
        }
    }
}

async fn play_job(inner: &Inner, job: SpeechJob) -> crate::Result<()> {
    if job.token.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tracing::debug!(text = %job.text, "synthesizing");
    let clip = inner.synthesizer.synthesize(&job.text).await?;

    if job.token.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let duration_ms = clip.duration().as_millis();
    inner.sink.play(clip, &job.token).await?;
    tracing::debug!(duration_ms, "speech played");
    Ok(())
}
