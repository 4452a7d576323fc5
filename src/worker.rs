//! Request/response actors for heavy work
//!
//! A worker owns its service exclusively and runs it on its own task. Callers
//! hold a cloneable [`WorkerClient`]; every call is tagged with a fresh
//! [`RequestId`] so concurrent in-flight requests are demultiplexed by a
//! router task when responses come back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Error, Result};

/// Caller-generated identifier for one request
pub type RequestId = Uuid;

/// Queue depth for requests waiting on a worker
const REQUEST_QUEUE: usize = 32;

/// A service that can be hosted by a worker
#[async_trait]
pub trait Service: Send + 'static {
    /// Request payload
    type Request: Send + 'static;
    /// Response payload
    type Response: Send + 'static;

    /// Handle one request
    async fn handle(&mut self, request: Self::Request) -> Result<Self::Response>;
}

struct Envelope<Req> {
    id: RequestId,
    payload: Req,
}

type Pending<Resp> = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Resp>>>>>;

/// Client side of a worker
pub struct WorkerClient<S: Service> {
    name: &'static str,
    requests: mpsc::Sender<Envelope<S::Request>>,
    pending: Pending<S::Response>,
}

impl<S: Service> Clone for WorkerClient<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            requests: self.requests.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

/// Spawn a worker hosting `service`
///
/// Must be called from within a tokio runtime.
pub fn spawn<S: Service>(name: &'static str, mut service: S) -> WorkerClient<S> {
    let (request_tx, mut request_rx) = mpsc::channel::<Envelope<S::Request>>(REQUEST_QUEUE);
    let (response_tx, mut response_rx) =
        mpsc::unbounded_channel::<(RequestId, Result<S::Response>)>();
    let pending: Pending<S::Response> = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        tracing::debug!(worker = name, "worker started");
        while let Some(envelope) = request_rx.recv().await {
            let result = service.handle(envelope.payload).await;
            if response_tx.send((envelope.id, result)).is_err() {
                break;
            }
        }
        tracing::debug!(worker = name, "worker stopped");
    });

    let router_pending = Arc::clone(&pending);
    tokio::spawn(async move {
        while let Some((id, result)) = response_rx.recv().await {
            let waiter = router_pending.lock().await.remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                // Caller gave up (cancelled) before the response arrived
                None => {
                    tracing::trace!(worker = name, request_id = %id, "dropping orphaned response");
                }
            }
        }
    });

    WorkerClient {
        name,
        requests: request_tx,
        pending,
    }
}

impl<S: Service> WorkerClient<S> {
    /// Send a request and await its response
    ///
    /// # Errors
    ///
    /// Returns the service error, or `Error::Worker` if the worker has stopped
    pub async fn call(&self, request: S::Request) -> Result<S::Response> {
        let (id, rx) = self.submit(request).await?;
        self.resolve(id, rx).await
    }

    /// Send a request, giving up with `Error::Cancelled` if `cancel` fires first
    ///
    /// Cancellation is checked before the response resolves; the worker still
    /// finishes the request and its response is discarded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled`, the service error, or `Error::Worker`
    pub async fn call_cancellable(
        &self,
        request: S::Request,
        cancel: &CancellationToken,
    ) -> Result<S::Response> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (id, rx) = self.submit(request).await?;

        tokio::select! {
            () = cancel.cancelled() => {
                self.pending.lock().await.remove(&id);
                tracing::debug!(worker = self.name, request_id = %id, "request cancelled");
                Err(Error::Cancelled)
            }
            result = self.resolve(id, rx) => result,
        }
    }

    /// Number of requests awaiting a response
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn submit(
        &self,
        request: S::Request,
    ) -> Result<(RequestId, oneshot::Receiver<Result<S::Response>>)> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let envelope = Envelope {
            id,
            payload: request,
        };
        if self.requests.send(envelope).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::Worker(format!("{} worker is not running", self.name)));
        }

        tracing::trace!(worker = self.name, request_id = %id, "request submitted");
        Ok((id, rx))
    }

    async fn resolve(
        &self,
        id: RequestId,
        rx: oneshot::Receiver<Result<S::Response>>,
    ) -> Result<S::Response> {
        rx.await.map_err(|_| {
            Error::Worker(format!(
                "{} worker dropped request {id} without responding",
                self.name
            ))
        })?
    }
}
