//! Topic multiplexer.
//!
//! Owns the single transport connection and shares broker-level subscriptions
//! between any number of logical subscribers:
//!
//! - The filter table maps each filter string to its listener set. The
//!   listener count is the filter's refcount.
//! - A 0→1 transition queues exactly one broker subscribe, a 1→0 transition
//!   exactly one broker unsubscribe. Both are queued while the table lock is
//!   held, so broker operations follow refcount transitions in order.
//! - A rejected broker subscribe ends the streams of the listeners it
//!   affected and drops the filter, so the next subscriber retries it.
//! - One broker task executes subscribe/unsubscribe/publish operations in
//!   submission order. A subscribe issued before a publish is acknowledged
//!   before the publish goes out, which the RPC client relies on.
//! - One dispatcher task fans every inbound message out to all listeners whose
//!   filter matches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::transport::{InboundMessage, Transport, TransportError};

use super::subscription::{Delivery, Subscription, TopicMessage};
use super::topic::{self, TopicError};

/// Errors returned by multiplexer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuxError {
    /// The filter passed to `subscribe` is malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(TopicError),

    /// The topic passed to `publish` is malformed.
    #[error("invalid topic: {0}")]
    InvalidTopic(TopicError),

    /// The broker rejected the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The multiplexer was closed or its broker task is gone.
    #[error("multiplexer is closed")]
    Closed,
}

/// Convenient Result alias for multiplexer operations.
pub type MuxResult<T> = Result<T, MuxError>;

type Listener = mpsc::UnboundedSender<Delivery>;

/// Listeners sharing one broker-level subscription.
struct FilterEntry {
    /// Listener ID that created the entry; tells re-subscriptions apart.
    generation: u64,
    listeners: HashMap<u64, Listener>,
}

/// Filter → entry.
type FilterTable = HashMap<String, FilterEntry>;

/// Work for the broker task.
enum BrokerOp {
    Subscribe {
        filter: String,
        generation: u64,
    },
    Unsubscribe {
        filter: String,
    },
    Publish {
        topic: String,
        payload: Bytes,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
}

/// State shared between the multiplexer handles and live subscriptions.
pub(super) struct MuxShared {
    table: Arc<Mutex<FilterTable>>,
    ops: mpsc::UnboundedSender<BrokerOp>,
    next_listener_id: AtomicU64,
    cancel: CancellationToken,
}

impl MuxShared {
    /// Removes one listener; issues the broker unsubscribe when it was the last.
    ///
    /// Unknown listeners are ignored, which makes repeated disposal a no-op.
    pub(super) fn release(&self, filter: &str, listener_id: u64) {
        let mut table = self.table.lock();
        let Some(entry) = table.get_mut(filter) else {
            return;
        };
        if entry.listeners.remove(&listener_id).is_none() {
            return;
        }

        if entry.listeners.is_empty() {
            table.remove(filter);
            log::debug!("[Mux] Last listener left '{}', unsubscribing", filter);
            if self
                .ops
                .send(BrokerOp::Unsubscribe {
                    filter: filter.to_string(),
                })
                .is_err()
            {
                log::debug!("[Mux] Broker task gone, dropping unsubscribe for '{}'", filter);
            }
        }
    }
}

impl Drop for MuxShared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Multiplexes many logical subscribers onto one transport connection.
///
/// Cloning is cheap and yields another handle to the same multiplexer.
/// Independent multiplexers never share state.
#[derive(Clone)]
pub struct TopicMultiplexer {
    shared: Arc<MuxShared>,
}

impl TopicMultiplexer {
    /// Creates a multiplexer over a connected transport.
    ///
    /// # Arguments
    /// * `transport` - Broker connection used for outbound operations
    /// * `inbound` - Receiver of every message the broker routes to this connection
    /// * `spawner` - Spawner for the broker and dispatcher tasks
    pub fn new(
        transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<InboundMessage>,
        spawner: &TokioSpawner,
    ) -> Self {
        let table = Arc::new(Mutex::new(FilterTable::new()));
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        spawner.spawn(run_broker_ops(transport, ops_rx, Arc::clone(&table)));
        spawner.spawn(run_dispatch(inbound, Arc::clone(&table), cancel.clone()));

        Self {
            shared: Arc::new(MuxShared {
                table,
                ops: ops_tx,
                next_listener_id: AtomicU64::new(1),
                cancel,
            }),
        }
    }

    /// Subscribes to a topic filter.
    ///
    /// Never blocks the caller. The broker-level subscribe (if this is the first
    /// listener for `filter`) is queued; a broker rejection arrives as an `Err`
    /// item on the returned stream.
    pub fn subscribe(&self, filter: &str) -> MuxResult<Subscription> {
        topic::validate_filter(filter).map_err(MuxError::InvalidFilter)?;
        if self.shared.cancel.is_cancelled() {
            return Err(MuxError::Closed);
        }

        let listener_id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut table = self.shared.table.lock();
            let entry = table
                .entry(filter.to_string())
                .or_insert_with(|| FilterEntry {
                    generation: listener_id,
                    listeners: HashMap::new(),
                });
            let first = entry.listeners.is_empty();
            entry.listeners.insert(listener_id, tx);

            if first {
                log::debug!("[Mux] First listener on '{}', subscribing", filter);
                let op = BrokerOp::Subscribe {
                    filter: filter.to_string(),
                    generation: entry.generation,
                };
                if self.shared.ops.send(op).is_err() {
                    table.remove(filter);
                    return Err(MuxError::Closed);
                }
            }
        }

        Ok(Subscription::new(
            filter.to_string(),
            listener_id,
            rx,
            Arc::clone(&self.shared),
        ))
    }

    /// Publishes a payload to a concrete topic.
    ///
    /// Resolves once the transport accepted (or refused) the publish. There is
    /// no end-to-end delivery acknowledgment.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> MuxResult<()> {
        topic::validate_topic(topic).map_err(MuxError::InvalidTopic)?;

        let (done, result) = oneshot::channel();
        self.shared
            .ops
            .send(BrokerOp::Publish {
                topic: topic.to_string(),
                payload: payload.into(),
                done,
            })
            .map_err(|_| MuxError::Closed)?;

        result.await.map_err(|_| MuxError::Closed)??;
        Ok(())
    }

    /// Waits until every broker operation queued before this call has run.
    pub async fn flush(&self) -> MuxResult<()> {
        let (done, flushed) = oneshot::channel();
        self.shared
            .ops
            .send(BrokerOp::Flush { done })
            .map_err(|_| MuxError::Closed)?;
        flushed.await.map_err(|_| MuxError::Closed)
    }

    /// Number of live logical subscriptions for exactly `filter`.
    #[must_use]
    pub fn subscriber_count(&self, filter: &str) -> usize {
        self.shared
            .table
            .lock()
            .get(filter)
            .map_or(0, |entry| entry.listeners.len())
    }

    /// Filters that currently hold a broker-level subscription.
    #[must_use]
    pub fn active_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.shared.table.lock().keys().cloned().collect();
        filters.sort();
        filters
    }

    /// Returns whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stops dispatching and releases every broker-level subscription.
    ///
    /// Live subscriptions end (their streams yield `None`); disposing them
    /// afterwards is a no-op.
    pub fn close(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();

        let mut table = self.shared.table.lock();
        for filter in table.keys() {
            let _ = self.shared.ops.send(BrokerOp::Unsubscribe {
                filter: filter.clone(),
            });
        }
        let released = table.len();
        table.clear();
        log::info!("[Mux] Closed, released {} filter(s)", released);
    }
}

/// Executes broker operations one at a time, in submission order.
async fn run_broker_ops(
    transport: Arc<dyn Transport>,
    mut ops: mpsc::UnboundedReceiver<BrokerOp>,
    table: Arc<Mutex<FilterTable>>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            BrokerOp::Subscribe { filter, generation } => {
                if let Err(e) = transport.subscribe(&filter).await {
                    log::warn!("[Mux] Broker subscribe to '{}' failed: {}", filter, e);
                    reject_filter(&table, &filter, generation, &e);
                }
            }
            BrokerOp::Unsubscribe { filter } => {
                if let Err(e) = transport.unsubscribe(&filter).await {
                    log::warn!("[Mux] Broker unsubscribe from '{}' failed: {}", filter, e);
                }
            }
            BrokerOp::Publish {
                topic,
                payload,
                done,
            } => {
                let result = transport.publish(&topic, payload).await;
                if let Err(ref e) = result {
                    log::warn!("[Mux] Publish to '{}' failed: {}", topic, e);
                }
                let _ = done.send(result);
            }
            BrokerOp::Flush { done } => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("[Mux] Broker task stopped");
}

/// Removes the entry a failed subscribe was issued for and hands its listeners
/// the error. Their streams end afterwards and their disposal is a no-op, since
/// there is no broker subscription to release.
fn reject_filter(
    table: &Mutex<FilterTable>,
    filter: &str,
    generation: u64,
    error: &TransportError,
) {
    let mut table = table.lock();
    if table.get(filter).map(|entry| entry.generation) != Some(generation) {
        // Every listener of that generation already left.
        return;
    }
    if let Some(entry) = table.remove(filter) {
        for listener in entry.listeners.into_values() {
            let _ = listener.send(Err(error.clone()));
        }
    }
}

/// Fans inbound messages out to matching listeners until cancelled or the
/// transport's inbound stream ends.
async fn run_dispatch(
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    table: Arc<Mutex<FilterTable>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbound.recv() => message,
        };

        match message {
            Some(message) => dispatch(&table, message),
            None => {
                log::warn!("[Mux] Inbound stream ended, notifying listeners");
                for entry in table.lock().values() {
                    for listener in entry.listeners.values() {
                        let _ = listener.send(Err(TransportError::Disconnected));
                    }
                }
                break;
            }
        }
    }
    log::debug!("[Mux] Dispatcher stopped");
}

fn dispatch(table: &Mutex<FilterTable>, message: InboundMessage) {
    let delivered = TopicMessage {
        topic: message.topic,
        payload: message.payload,
    };

    let mut receivers = 0usize;
    for (filter, entry) in table.lock().iter() {
        if !topic::matches(filter, &delivered.topic) {
            continue;
        }
        for listener in entry.listeners.values() {
            if listener.send(Ok(delivered.clone())).is_ok() {
                receivers += 1;
            }
        }
    }

    if receivers == 0 {
        log::trace!("[Mux] No listener for '{}'", delivered.topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalBroker;
    use std::time::Duration;

    fn connect(broker: &LocalBroker) -> TopicMultiplexer {
        let (transport, inbound) = broker.connect();
        TopicMultiplexer::new(Arc::new(transport), inbound, &TokioSpawner::current())
    }

    async fn next_topic(sub: &mut Subscription) -> String {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("delivery timed out")
            .expect("stream ended")
            .expect("transport error")
            .topic
    }

    async fn collect_until(sub: &mut Subscription, sentinel: &str) -> Vec<String> {
        let mut topics = Vec::new();
        loop {
            let topic = next_topic(sub).await;
            let done = topic == sentinel;
            topics.push(topic);
            if done {
                return topics;
            }
        }
    }

    #[tokio::test]
    async fn concurrent_subscribers_share_one_broker_subscription() {
        let broker = LocalBroker::new();
        let mux = connect(&broker);

        let mut subs: Vec<_> = (0..3).map(|_| mux.subscribe("foo/bar").unwrap()).collect();
        mux.flush().await.unwrap();
        assert_eq!(broker.subscribe_count("foo/bar"), 1);
        assert_eq!(mux.subscriber_count("foo/bar"), 3);

        // Dispose out of creation order.
        let last = subs.remove(0);
        drop(subs.remove(1));
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("foo/bar"), 0);

        drop(subs);
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("foo/bar"), 0);

        drop(last);
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("foo/bar"), 1);
        assert!(mux.active_filters().is_empty());
    }

    #[tokio::test]
    async fn second_disposal_issues_the_only_unsubscribe() {
        let broker = LocalBroker::new();
        let mux = connect(&broker);

        let mut first = mux.subscribe("foo/bar").unwrap();
        let mut second = mux.subscribe("foo/bar").unwrap();

        first.unsubscribe();
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("foo/bar"), 0);

        second.unsubscribe();
        second.unsubscribe();
        drop(second);
        drop(first);
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("foo/bar"), 1);
    }

    #[tokio::test]
    async fn delivery_respects_wildcards() {
        let broker = LocalBroker::new();
        let mux = connect(&broker);
        let peer = connect(&broker);

        let mut exact = mux.subscribe("foo/bar").unwrap();
        let mut single = mux.subscribe("foo/+").unwrap();
        let mut multi = mux.subscribe("foo/#").unwrap();
        mux.flush().await.unwrap();

        for topic in ["foo/bar/baz", "foo/x", "foo/y", "foo/x/y", "foo/bar"] {
            peer.publish(topic, Bytes::from_static(b"1")).await.unwrap();
        }

        assert_eq!(collect_until(&mut exact, "foo/bar").await, vec!["foo/bar"]);
        assert_eq!(
            collect_until(&mut single, "foo/bar").await,
            vec!["foo/x", "foo/y", "foo/bar"]
        );
        assert_eq!(
            collect_until(&mut multi, "foo/bar").await,
            vec!["foo/bar/baz", "foo/x", "foo/y", "foo/x/y", "foo/bar"]
        );
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_copy() {
        let broker = LocalBroker::new();
        let mux = connect(&broker);
        let peer = connect(&broker);

        let mut a = mux.subscribe("ns/+").unwrap();
        let mut b = mux.subscribe("ns/+").unwrap();
        mux.flush().await.unwrap();

        peer.publish("ns/lamp", "on").await.unwrap();
        assert_eq!(next_topic(&mut a).await, "ns/lamp");
        assert_eq!(next_topic(&mut b).await, "ns/lamp");

        a.unsubscribe();
        peer.publish("ns/fan", "off").await.unwrap();
        assert_eq!(next_topic(&mut b).await, "ns/fan");
        assert!(a.recv().await.is_none());
    }

    #[tokio::test]
    async fn rejected_subscription_surfaces_on_stream() {
        let broker = LocalBroker::new();
        broker.deny_filter("secret/#");
        let mux = connect(&broker);

        let mut sub = mux.subscribe("secret/#").unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            delivery,
            Err(TransportError::SubscribeRejected { .. })
        ));
        assert!(sub.recv().await.is_none());
        assert!(mux.active_filters().is_empty());
    }

    #[tokio::test]
    async fn subscribe_retries_after_rejection() {
        let broker = LocalBroker::new();
        broker.deny_filter("secret/#");
        let mux = connect(&broker);
        let peer = connect(&broker);

        let mut rejected = mux.subscribe("secret/#").unwrap();
        assert!(matches!(
            rejected.recv().await,
            Some(Err(TransportError::SubscribeRejected { .. }))
        ));

        broker.allow_filter("secret/#");
        let mut retried = mux.subscribe("secret/#").unwrap();
        mux.flush().await.unwrap();
        assert_eq!(broker.subscribe_count("secret/#"), 2);

        peer.publish("secret/x", "1").await.unwrap();
        assert_eq!(next_topic(&mut retried).await, "secret/x");

        // Only the accepted subscription is released at the broker.
        drop(rejected);
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("secret/#"), 0);
        assert_eq!(mux.subscriber_count("secret/#"), 1);

        drop(retried);
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("secret/#"), 1);
    }

    #[tokio::test]
    async fn refused_publish_reports_transport_error() {
        let broker = LocalBroker::new();
        broker.deny_publish("ns/locked");
        let mux = connect(&broker);

        let err = mux.publish("ns/locked", "x").await.unwrap_err();
        assert_eq!(
            err,
            MuxError::Transport(TransportError::PublishFailed {
                topic: "ns/locked".into(),
                reason: "not authorized".into(),
            })
        );
        mux.publish("ns/open", "x").await.unwrap();
    }

    #[tokio::test]
    async fn malformed_filter_and_topic_are_rejected() {
        let broker = LocalBroker::new();
        let mux = connect(&broker);

        assert!(matches!(
            mux.subscribe("foo/#/bar"),
            Err(MuxError::InvalidFilter(_))
        ));
        assert!(matches!(
            mux.publish("foo/+", "x").await,
            Err(MuxError::InvalidTopic(_))
        ));
        mux.flush().await.unwrap();
        assert_eq!(broker.stats().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn independent_multiplexers_do_not_share_state() {
        let broker = LocalBroker::new();
        let a = connect(&broker);
        let b = connect(&broker);

        let _sa = a.subscribe("foo/bar").unwrap();
        let _sb = b.subscribe("foo/bar").unwrap();
        a.flush().await.unwrap();
        b.flush().await.unwrap();

        assert_eq!(broker.subscribe_count("foo/bar"), 2);
        assert_eq!(a.subscriber_count("foo/bar"), 1);
        assert_eq!(b.subscriber_count("foo/bar"), 1);
    }

    #[tokio::test]
    async fn close_releases_filters_once() {
        let broker = LocalBroker::new();
        let mux = connect(&broker);

        let mut sub = mux.subscribe("foo/bar").unwrap();
        mux.close();
        mux.flush().await.unwrap();

        assert!(mux.is_closed());
        assert!(sub.recv().await.is_none());
        drop(sub);
        mux.flush().await.unwrap();
        assert_eq!(broker.unsubscribe_count("foo/bar"), 1);
        assert!(matches!(mux.subscribe("foo/bar"), Err(MuxError::Closed)));
    }
}
