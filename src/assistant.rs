//! The live voice loop
//!
//! [`VoiceAssistant`] consumes VAD events. Finalized segments are transcribed
//! and submitted as user turns one at a time, while speech onsets are handled
//! immediately so a user can talk over the assistant.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::conversation::{Orchestrator, StopHandle};
use crate::speech::SpeechQueue;
use crate::stt::{Transcriber, TranscriptionRequest, TranscriptionService};
use crate::vad::{SpeechSegment, VadEvent};
use crate::worker::WorkerClient;
use crate::{Error, Result};

/// Segments waiting for their turn
const TURN_QUEUE: usize = 8;

/// Wires VAD events to transcription, the orchestrator and speech output
pub struct VoiceAssistant<T: Transcriber + 'static> {
    orchestrator: Arc<Orchestrator>,
    stt: WorkerClient<TranscriptionService<T>>,
    speech: Option<SpeechQueue>,
    barge_in: bool,
}

impl<T: Transcriber + 'static> VoiceAssistant<T> {
    #[must_use]
    pub const fn new(
        orchestrator: Arc<Orchestrator>,
        stt: WorkerClient<TranscriptionService<T>>,
        speech: Option<SpeechQueue>,
        barge_in: bool,
    ) -> Self {
        Self {
            orchestrator,
            stt,
            speech,
            barge_in,
        }
    }

    /// Process events until the VAD source closes or reports an error
    ///
    /// Waits for the turn in progress to finish before returning.
    ///
    /// # Errors
    ///
    /// Returns `Error::Vad` when the source reports an `Error` event
    pub async fn run(self, mut events: mpsc::Receiver<VadEvent>) -> Result<()> {
        let stop = self.orchestrator.stop_handle();
        let (segment_tx, segment_rx) = mpsc::channel::<SpeechSegment>(TURN_QUEUE);

        let turns = tokio::spawn(turn_loop(
            Arc::clone(&self.orchestrator),
            self.stt.clone(),
            self.speech.clone(),
            segment_rx,
        ));

        let mut outcome = Ok(());
        while let Some(event) = events.recv().await {
            match event {
                VadEvent::Ready => tracing::info!("listening"),
                VadEvent::SpeechStart => {
                    tracing::debug!("speech started");
                    if self.barge_in {
                        self.barge_in(&stop);
                    }
                }
                VadEvent::SpeechEnd => tracing::debug!("speech ended"),
                VadEvent::SpeechChunk(segment) => {
                    tracing::debug!(
                        duration_ms = segment.duration.as_millis(),
                        samples = segment.samples.len(),
                        "segment ready"
                    );
                    if segment_tx.try_send(segment).is_err() {
                        tracing::warn!("turn queue full, dropping segment");
                    }
                }
                VadEvent::Error(message) => {
                    tracing::error!(error = %message, "vad failed");
                    outcome = Err(Error::Vad(message));
                    break;
                }
            }
        }

        drop(segment_tx);
        if let Err(e) = turns.await {
            tracing::warn!(error = %e, "turn loop panicked");
        }
        outcome
    }

    fn barge_in(&self, stop: &StopHandle) {
        if let Some(speech) = &self.speech
            && (speech.is_busy() || speech.pending() > 0)
        {
            tracing::debug!("barge-in, interrupting speech");
            speech.interrupt();
        }
        stop.stop();
    }
}

impl<T: Transcriber + 'static> std::fmt::Debug for VoiceAssistant<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceAssistant")
            .field("speech", &self.speech.is_some())
            .field("barge_in", &self.barge_in)
            .finish_non_exhaustive()
    }
}

async fn turn_loop<T: Transcriber + 'static>(
    orchestrator: Arc<Orchestrator>,
    stt: WorkerClient<TranscriptionService<T>>,
    speech: Option<SpeechQueue>,
    mut segments: mpsc::Receiver<SpeechSegment>,
) {
    while let Some(segment) = segments.recv().await {
        if let Err(e) = handle_segment(&orchestrator, &stt, speech.as_ref(), segment).await {
            if e.is_cancellation() {
                tracing::debug!("turn cancelled");
            } else {
                tracing::error!(error = %e, "voice turn failed");
            }
        }
    }
}

async fn handle_segment<T: Transcriber + 'static>(
    orchestrator: &Orchestrator,
    stt: &WorkerClient<TranscriptionService<T>>,
    speech: Option<&SpeechQueue>,
    segment: SpeechSegment,
) -> Result<()> {
    let text = stt
        .call(TranscriptionRequest {
            samples: segment.samples,
            sample_rate: segment.sample_rate,
        })
        .await?;

    if text.is_empty() {
        tracing::debug!("empty transcript, skipping");
        return Ok(());
    }
    tracing::info!(transcript = %text, "user said");

    // Sentences of this turn stop together on the next interrupt
    let token = speech.map(SpeechQueue::token);
    let outcome = orchestrator
        .submit_user_turn(&text, |sentence| match (speech, &token) {
            (Some(queue), Some(token)) => {
                queue.speak(sentence, token);
            }
            _ => tracing::info!(sentence, "assistant"),
        })
        .await?;

    tracing::info!(
        reply = %outcome.spoken,
        rounds = outcome.rounds,
        tool_calls = outcome.tool_calls,
        stopped = outcome.stopped,
        "turn complete"
    );
    if outcome.conversation_ended {
        tracing::info!("conversation ended, started a new one");
    }
    Ok(())
}
