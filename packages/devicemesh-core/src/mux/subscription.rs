//! Logical subscriptions handed out by the multiplexer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::transport::TransportError;

use super::multiplexer::MuxShared;

/// A message delivered to a logical subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    /// Concrete topic the message was published to.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

/// Item yielded by a [`Subscription`]: a message, or the broker-level failure
/// that affected this filter.
pub type Delivery = Result<TopicMessage, TransportError>;

/// A cancellable stream of messages for one filter.
///
/// Each call to [`TopicMultiplexer::subscribe`](super::TopicMultiplexer::subscribe)
/// yields an independent `Subscription`, even when several share one
/// broker-level subscription. Disposal (explicit [`unsubscribe`](Self::unsubscribe)
/// or drop) releases exactly one reference on the filter; repeating it is a no-op.
pub struct Subscription {
    filter: String,
    listener_id: u64,
    rx: UnboundedReceiverStream<Delivery>,
    /// `None` once released.
    shared: Option<Arc<MuxShared>>,
}

impl Subscription {
    pub(super) fn new(
        filter: String,
        listener_id: u64,
        rx: mpsc::UnboundedReceiver<Delivery>,
        shared: Arc<MuxShared>,
    ) -> Self {
        Self {
            filter,
            listener_id,
            rx: UnboundedReceiverStream::new(rx),
            shared: Some(shared),
        }
    }

    /// Returns the filter this subscription was created with.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Returns whether the subscription still holds its filter reference.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.is_some()
    }

    /// Waits for the next delivery.
    ///
    /// Returns `None` once the subscription was disposed (after draining
    /// anything already queued) or the multiplexer closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.next().await
    }

    /// Releases this subscription's reference on its filter.
    pub fn unsubscribe(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release(&self.filter, self.listener_id);
        }
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("listener_id", &self.listener_id)
            .field("active", &self.is_active())
            .finish()
    }
}
