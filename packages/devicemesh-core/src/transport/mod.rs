//! Transport primitive abstraction.
//!
//! The broker connection itself (connect/reconnect, QoS, authentication) lives
//! outside this crate. Everything above the transport only needs the four
//! operations of [`Transport`] plus a channel of [`InboundMessage`]s, which is
//! handed over together with the transport when a connection is made.
//!
//! [`LocalBroker`] is an in-process implementation used by tests and by the
//! simulation binary.

mod local;

pub use local::{BrokerStats, LocalBroker, LocalTransport};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Concrete topic the message was published to.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Creates a new inbound message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Broker-level failures.
///
/// These are surfaced on the specific stream or call affected. Nothing in this
/// crate retries or reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection to the broker is gone.
    #[error("transport disconnected")]
    Disconnected,

    /// The broker refused a subscription.
    #[error("subscription to '{filter}' rejected: {reason}")]
    SubscribeRejected {
        /// Filter that was refused.
        filter: String,
        /// Broker-provided reason.
        reason: String,
    },

    /// The broker refused or failed to accept a publish.
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed {
        /// Destination topic.
        topic: String,
        /// Failure description.
        reason: String,
    },
}

/// Convenient Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Publish/subscribe transport primitive.
///
/// Implementations wrap a single broker connection. Inbound messages are not
/// part of this trait: they arrive on the receiver returned alongside the
/// transport at connect time (see [`LocalBroker::connect`]).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a payload to a concrete topic. No delivery acknowledgment.
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()>;

    /// Subscribes to a filter, resolving once the broker acknowledges it.
    async fn subscribe(&self, filter: &str) -> TransportResult<()>;

    /// Removes a subscription. Unsubscribing an unknown filter is not an error.
    async fn unsubscribe(&self, filter: &str) -> TransportResult<()>;
}
