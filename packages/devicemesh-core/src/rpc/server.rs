//! RPC server: binds request handlers to fixed topics.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mux::{MuxResult, Subscription, TopicMultiplexer};
use crate::runtime::{TaskSpawner, TokioSpawner};

use super::envelope::{Envelope, ErrorReply};

/// Failure reported by a request handler.
///
/// Only the message crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Error message replied when a handler panics.
const HANDLER_PANICKED: &str = "handler panicked";

/// Handles one request body and produces the serialized reply.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, body: String) -> Result<String, HandlerError>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
{
    async fn handle(&self, body: String) -> Result<String, HandlerError> {
        (self)(body).await
    }
}

/// Serves requests arriving on fixed topics.
#[derive(Clone)]
pub struct RpcServer {
    mux: TopicMultiplexer,
    spawner: TokioSpawner,
}

impl RpcServer {
    pub fn new(mux: TopicMultiplexer, spawner: TokioSpawner) -> Self {
        Self { mux, spawner }
    }

    /// Binds `handler` to `topic` until the returned registration is disposed.
    ///
    /// # Arguments
    /// * `topic` - Request topic (may be a filter)
    /// * `handler` - Invoked once per well-formed request, concurrently
    pub fn handle<H>(&self, topic: &str, handler: H) -> MuxResult<HandlerRegistration>
    where
        H: RequestHandler + 'static,
    {
        self.handle_shared(topic, Arc::new(handler))
    }

    /// Like [`handle`](Self::handle), for handlers that are already shared.
    pub fn handle_shared(
        &self,
        topic: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> MuxResult<HandlerRegistration> {
        let requests = self.mux.subscribe(topic)?;
        let cancel = CancellationToken::new();

        let task = self.spawner.spawn_tracked(serve(
            requests,
            handler,
            self.mux.clone(),
            self.spawner.clone(),
            cancel.clone(),
        ));
        log::debug!("[RpcServer] Serving '{}'", topic);

        Ok(HandlerRegistration {
            topic: topic.to_string(),
            cancel,
            task: Some(task),
        })
    }
}

/// Receives requests until cancelled. Each request is handled in its own task.
async fn serve(
    mut requests: Subscription,
    handler: Arc<dyn RequestHandler>,
    mux: TopicMultiplexer,
    spawner: TokioSpawner,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = requests.recv() => delivery,
        };

        let message = match delivery {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                log::warn!("[RpcServer] Request stream '{}' failed: {}", requests.filter(), e);
                continue;
            }
            None => break,
        };

        let envelope = match Envelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!(
                    "[RpcServer] Dropping malformed request on '{}': {}",
                    message.topic,
                    e
                );
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let mux = mux.clone();
        let cancel = cancel.clone();
        spawner.spawn(async move {
            let reply = match AssertUnwindSafe(handler.handle(envelope.body))
                .catch_unwind()
                .await
            {
                Ok(Ok(result)) => Bytes::from(result),
                Ok(Err(e)) => {
                    log::debug!("[RpcServer] Handler for '{}' failed: {}", message.topic, e);
                    ErrorReply::encode(e.message())
                }
                Err(_) => {
                    log::warn!("[RpcServer] Handler for '{}' panicked", message.topic);
                    ErrorReply::encode(HANDLER_PANICKED)
                }
            };
            if cancel.is_cancelled() {
                log::debug!(
                    "[RpcServer] Registration disposed, discarding reply to '{}'",
                    envelope.response_topic
                );
                return;
            }
            if let Err(e) = mux.publish(&envelope.response_topic, reply).await {
                log::warn!(
                    "[RpcServer] Failed to reply on '{}': {}",
                    envelope.response_topic,
                    e
                );
            }
        });
    }

    requests.unsubscribe();
    log::debug!("[RpcServer] Stopped serving '{}'", requests.filter());
}

/// Live binding of a handler to a request topic.
///
/// Disposing it (explicitly or by drop) unsubscribes from the request topic.
/// Invocations already running finish but publish nothing.
pub struct HandlerRegistration {
    topic: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HandlerRegistration {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stops serving. Idempotent.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Disposes and waits for the serving loop to release its subscription.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("[RpcServer] Serving task for '{}' failed: {}", self.topic, e);
            }
        }
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("topic", &self.topic)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
