//! VAD engine hosted on a dedicated thread
//!
//! The engine's buffers never leave the worker thread: frames go in over a
//! channel and finalized events come back over another.

use tokio::sync::mpsc;

use super::{SpeechModel, VadConfig, VadEngine, VadEvent};
use crate::audio::AudioFrame;
use crate::{Error, Result};

/// Frames buffered ahead of the worker (~8s of 512-sample frames at 16kHz)
const FRAME_QUEUE: usize = 256;

/// Events buffered ahead of the consumer
const EVENT_QUEUE: usize = 64;

/// Sender side of a running VAD worker
#[derive(Debug, Clone)]
pub struct VadHandle {
    frames: mpsc::Sender<AudioFrame>,
}

impl VadHandle {
    /// Forward a frame to the worker, waiting for queue space
    ///
    /// # Errors
    ///
    /// Returns `Error::VadNotReady` if the worker failed to start or has stopped
    pub async fn push(&self, frame: AudioFrame) -> Result<()> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| Error::VadNotReady)
    }

    /// Forward a frame without waiting; a full queue drops the frame
    ///
    /// # Errors
    ///
    /// Returns `Error::VadNotReady` if the worker has stopped
    pub fn try_push(&self, frame: AudioFrame) -> Result<()> {
        match self.frames.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("vad worker lagging, dropping frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::VadNotReady),
        }
    }

    /// Whether the worker is still accepting frames
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.frames.is_closed()
    }
}

/// Start a VAD worker thread
///
/// `init` runs on the worker thread. If it fails, a single
/// [`VadEvent::Error`] is emitted and the worker exits; no retry is
/// attempted. On success the first event is [`VadEvent::Ready`].
///
/// # Errors
///
/// Returns error if the thread cannot be spawned
pub fn spawn_vad_worker<F>(
    config: VadConfig,
    init: F,
) -> Result<(VadHandle, mpsc::Receiver<VadEvent>)>
where
    F: FnOnce() -> Result<Box<dyn SpeechModel>> + Send + 'static,
{
    let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(FRAME_QUEUE);
    let (event_tx, event_rx) = mpsc::channel::<VadEvent>(EVENT_QUEUE);

    std::thread::Builder::new()
        .name("vad-worker".to_string())
        .spawn(move || {
            let engine = init().and_then(|model| VadEngine::new(config, model));
            let mut engine = match engine {
                Ok(engine) => engine,
                Err(e) => {
                    tracing::error!(error = %e, "vad model failed to initialize");
                    let _ = event_tx.blocking_send(VadEvent::Error(e.to_string()));
                    return;
                }
            };

            if event_tx.blocking_send(VadEvent::Ready).is_err() {
                return;
            }
            tracing::debug!("vad worker ready");

            let expected_rate = engine.config().sample_rate;
            while let Some(frame) = frame_rx.blocking_recv() {
                if frame.sample_rate != expected_rate {
                    tracing::warn!(
                        got = frame.sample_rate,
                        expected = expected_rate,
                        "dropping frame with unexpected sample rate"
                    );
                    continue;
                }

                let events = match engine.process(&frame.samples) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(error = %e, "vad inference failed, skipping frame");
                        continue;
                    }
                };

                for event in events {
                    if event_tx.blocking_send(event).is_err() {
                        tracing::debug!("vad event receiver dropped, stopping worker");
                        return;
                    }
                }
            }

            tracing::debug!("vad worker stopped");
        })?;

    Ok((VadHandle { frames: frame_tx }, event_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{FRAME_SAMPLES, SAMPLE_RATE};
    use crate::vad::EnergyModel;

    fn frame(value: f32) -> AudioFrame {
        AudioFrame::new(vec![value; FRAME_SAMPLES], SAMPLE_RATE)
    }

    #[tokio::test]
    async fn init_failure_is_reported_and_worker_refuses_frames() {
        let (handle, mut events) = spawn_vad_worker(VadConfig::default(), || {
            Err(Error::Vad("model file missing".to_string()))
        })
        .unwrap();

        match events.recv().await {
            Some(VadEvent::Error(message)) => assert!(message.contains("model file missing")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(events.recv().await.is_none());
        assert!(matches!(
            handle.push(frame(0.0)).await,
            Err(Error::VadNotReady)
        ));
    }

    #[tokio::test]
    async fn emits_ready_then_segments() {
        let (handle, mut events) = spawn_vad_worker(VadConfig::default(), || {
            Ok(Box::new(EnergyModel::default()) as Box<dyn SpeechModel>)
        })
        .unwrap();

        assert_eq!(events.recv().await, Some(VadEvent::Ready));

        // ~0.5s of tone, then ~0.6s of silence
        for _ in 0..16 {
            handle.push(frame(0.3)).await.unwrap();
        }
        for _ in 0..19 {
            handle.push(frame(0.0)).await.unwrap();
        }

        assert_eq!(events.recv().await, Some(VadEvent::SpeechStart));
        assert_eq!(events.recv().await, Some(VadEvent::SpeechEnd));
        match events.recv().await {
            Some(VadEvent::SpeechChunk(segment)) => {
                assert_eq!(segment.sample_rate, SAMPLE_RATE);
                assert!(segment.duration.as_millis() >= 500);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }
}
