//! RPC client.
//!
//! Every call gets its own response topic. The call subscribes to it, publishes
//! the request envelope, and completes with the first message that arrives on
//! that topic. The response subscription and the deadline are owned by the
//! call's future, so whichever of reply, timeout or cancellation happens first
//! releases them exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::mux::TopicMultiplexer;
use crate::runtime::{TaskSpawner, TokioSpawner};

use super::envelope::Envelope;
use super::{RpcError, RpcResult};

/// Book-keeping for an in-flight call.
struct PendingCall {
    destination: String,
    started_at: Instant,
}

/// Removes a pending-call entry when the call finishes, however it finishes.
struct PendingGuard {
    pending: Arc<DashMap<String, PendingCall>>,
    response_topic: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some((_, call)) = self.pending.remove(&self.response_topic) {
            log::trace!(
                "[Rpc] Call to '{}' settled after {:?}",
                call.destination,
                call.started_at.elapsed()
            );
        }
    }
}

/// Request/response client over a [`TopicMultiplexer`].
///
/// Any number of calls may be outstanding; each has an independent response
/// topic, so there is no head-of-line blocking between them.
#[derive(Clone)]
pub struct RpcClient {
    mux: TopicMultiplexer,
    response_prefix: String,
    pending: Arc<DashMap<String, PendingCall>>,
    spawner: TokioSpawner,
}

impl RpcClient {
    /// Creates a client whose response topics live under `response_prefix`.
    pub fn new(
        mux: TopicMultiplexer,
        response_prefix: impl Into<String>,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            mux,
            response_prefix: response_prefix.into(),
            pending: Arc::new(DashMap::new()),
            spawner,
        }
    }

    /// Returns the multiplexer this client publishes through.
    pub fn multiplexer(&self) -> &TopicMultiplexer {
        &self.mux
    }

    /// Response topics of calls that have not settled yet.
    #[must_use]
    pub fn pending_calls(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    /// Number of calls that have not settled yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Generates a fresh response topic: `<prefix>/<uuid v4>`.
    fn next_response_topic(&self) -> String {
        format!("{}/{}", self.response_prefix, Uuid::new_v4().simple())
    }

    /// Sends `body` to `topic` and waits for the reply.
    ///
    /// Resolves with the raw reply payload. With a `timeout`, resolves with
    /// [`RpcError::Timeout`] if no reply arrives in time. Dropping the returned
    /// future cancels the call and releases its response subscription.
    pub async fn call(
        &self,
        topic: &str,
        body: impl Into<String>,
        timeout: Option<Duration>,
    ) -> RpcResult<Bytes> {
        let response_topic = self.next_response_topic();
        let mut responses = self.mux.subscribe(&response_topic)?;

        self.pending.insert(
            response_topic.clone(),
            PendingCall {
                destination: topic.to_string(),
                started_at: Instant::now(),
            },
        );
        let _pending = PendingGuard {
            pending: Arc::clone(&self.pending),
            response_topic: response_topic.clone(),
        };

        let envelope = Envelope::new(body, response_topic.as_str());
        self.mux.publish(topic, envelope.encode()?).await?;

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, responses.recv()).await {
                Ok(reply) => reply,
                Err(_) => {
                    log::debug!("[Rpc] Call to '{}' timed out after {:?}", topic, limit);
                    return Err(RpcError::Timeout {
                        topic: topic.to_string(),
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
            None => responses.recv().await,
        };
        responses.unsubscribe();

        match reply {
            Some(Ok(message)) => Ok(message.payload),
            Some(Err(e)) => Err(RpcError::Transport(e)),
            None => Err(RpcError::Closed),
        }
    }

    /// Starts a call in the background and returns a cancellable handle.
    pub fn spawn_call(
        &self,
        topic: impl Into<String>,
        body: impl Into<String>,
        timeout: Option<Duration>,
    ) -> CallHandle {
        let client = self.clone();
        let topic = topic.into();
        let body = body.into();
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        let token = cancel.clone();
        self.spawner.spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(RpcError::Cancelled),
                result = client.call(&topic, body, timeout) => result,
            };
            let _ = tx.send(result);
        });

        CallHandle { cancel, result: rx }
    }
}

/// Handle to a call started with [`RpcClient::spawn_call`].
///
/// Dropping the handle cancels the call.
pub struct CallHandle {
    cancel: CancellationToken,
    result: oneshot::Receiver<RpcResult<Bytes>>,
}

impl CallHandle {
    /// Cancels the call. Idempotent; a call that already settled is unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the call to settle.
    pub async fn wait(mut self) -> RpcResult<Bytes> {
        (&mut self.result).await.unwrap_or(Err(RpcError::Cancelled))
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
