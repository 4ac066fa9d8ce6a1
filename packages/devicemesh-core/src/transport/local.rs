//! In-process loopback broker.
//!
//! Routes publishes between connections living in the same process using the
//! same filter semantics as the multiplexer. Besides routing, the broker keeps
//! per-filter subscribe/unsubscribe counters and a bounded publish history so
//! broker-level behavior can be observed from tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::mux::topic;
use crate::protocol_constants::LOCAL_BROKER_HISTORY_LEN;

use super::{InboundMessage, Transport, TransportError, TransportResult};

/// One connected client.
struct Connection {
    filters: HashSet<String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    connections: HashMap<u64, Connection>,
    subscribe_counts: HashMap<String, usize>,
    unsubscribe_counts: HashMap<String, usize>,
    denied_filters: HashSet<String>,
    denied_topics: HashSet<String>,
    history: VecDeque<InboundMessage>,
    published_total: u64,
}

/// Snapshot of broker activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStats {
    /// Number of live connections.
    pub connections: usize,
    /// Number of (connection, filter) subscriptions currently active.
    pub active_subscriptions: usize,
    /// Total publishes accepted since the broker was created.
    pub published_total: u64,
    /// Total subscribe requests, accepted or not.
    pub subscribes_total: usize,
    /// Total unsubscribe requests.
    pub unsubscribes_total: usize,
}

/// In-process broker shared by any number of [`LocalTransport`] connections.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
    next_connection_id: Arc<AtomicU64>,
}

impl LocalBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection.
    ///
    /// Returns the transport half and the receiver on which every message
    /// routed to this connection is delivered.
    pub fn connect(&self) -> (LocalTransport, mpsc::UnboundedReceiver<InboundMessage>) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.state.lock().connections.insert(
            id,
            Connection {
                filters: HashSet::new(),
                tx,
            },
        );
        log::debug!("[Broker] Connection {} opened", id);

        let transport = LocalTransport {
            id,
            broker: self.clone(),
        };
        (transport, rx)
    }

    /// Makes every future subscription to `filter` fail.
    pub fn deny_filter(&self, filter: impl Into<String>) {
        self.state.lock().denied_filters.insert(filter.into());
    }

    /// Lifts a previous [`deny_filter`](Self::deny_filter).
    pub fn allow_filter(&self, filter: &str) {
        self.state.lock().denied_filters.remove(filter);
    }

    /// Makes every future publish to exactly `topic` fail.
    pub fn deny_publish(&self, topic: impl Into<String>) {
        self.state.lock().denied_topics.insert(topic.into());
    }

    /// Number of broker-level subscribe requests seen for `filter`.
    #[must_use]
    pub fn subscribe_count(&self, filter: &str) -> usize {
        self.state
            .lock()
            .subscribe_counts
            .get(filter)
            .copied()
            .unwrap_or(0)
    }

    /// Number of broker-level unsubscribe requests seen for `filter`.
    #[must_use]
    pub fn unsubscribe_count(&self, filter: &str) -> usize {
        self.state
            .lock()
            .unsubscribe_counts
            .get(filter)
            .copied()
            .unwrap_or(0)
    }

    /// Payloads recently published to exactly `topic`, oldest first.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<Bytes> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Recently published messages whose topic matches `filter`, oldest first.
    #[must_use]
    pub fn published_matching(&self, filter: &str) -> Vec<InboundMessage> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|m| topic::matches(filter, &m.topic))
            .cloned()
            .collect()
    }

    /// Returns a snapshot of broker activity.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let state = self.state.lock();
        BrokerStats {
            connections: state.connections.len(),
            active_subscriptions: state.connections.values().map(|c| c.filters.len()).sum(),
            published_total: state.published_total,
            subscribes_total: state.subscribe_counts.values().sum(),
            unsubscribes_total: state.unsubscribe_counts.values().sum(),
        }
    }

    fn subscribe(&self, connection_id: u64, filter: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        *state.subscribe_counts.entry(filter.to_string()).or_default() += 1;

        if state.denied_filters.contains(filter) {
            return Err(TransportError::SubscribeRejected {
                filter: filter.to_string(),
                reason: "not authorized".to_string(),
            });
        }

        let connection = state
            .connections
            .get_mut(&connection_id)
            .ok_or(TransportError::Disconnected)?;
        connection.filters.insert(filter.to_string());
        Ok(())
    }

    fn unsubscribe(&self, connection_id: u64, filter: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        *state
            .unsubscribe_counts
            .entry(filter.to_string())
            .or_default() += 1;

        let connection = state
            .connections
            .get_mut(&connection_id)
            .ok_or(TransportError::Disconnected)?;
        connection.filters.remove(filter);
        Ok(())
    }

    fn route(&self, connection_id: u64, topic: &str, payload: Bytes) -> TransportResult<()> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&connection_id) {
            return Err(TransportError::Disconnected);
        }
        if state.denied_topics.contains(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "not authorized".to_string(),
            });
        }

        let message = InboundMessage::new(topic, payload);
        for connection in state.connections.values() {
            if connection
                .filters
                .iter()
                .any(|filter| topic::matches(filter, topic))
            {
                // A closed receiver just means the client stopped reading.
                let _ = connection.tx.send(message.clone());
            }
        }

        state.published_total += 1;
        if state.history.len() == LOCAL_BROKER_HISTORY_LEN {
            state.history.pop_front();
        }
        state.history.push_back(message);
        Ok(())
    }

    fn disconnect(&self, connection_id: u64) {
        if self.state.lock().connections.remove(&connection_id).is_some() {
            log::debug!("[Broker] Connection {} closed", connection_id);
        }
    }
}

/// A single connection to a [`LocalBroker`].
///
/// Dropping the transport closes the connection and ends its inbound stream.
pub struct LocalTransport {
    id: u64,
    broker: LocalBroker,
}

impl LocalTransport {
    /// Returns the broker-assigned connection ID.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()> {
        self.broker.route(self.id, topic, payload)
    }

    async fn subscribe(&self, filter: &str) -> TransportResult<()> {
        self.broker.subscribe(self.id, filter)
    }

    async fn unsubscribe(&self, filter: &str) -> TransportResult<()> {
        self.broker.unsubscribe(self.id, filter)
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.broker.disconnect(self.id);
    }
}
