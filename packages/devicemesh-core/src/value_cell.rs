//! Latest-value holder with explicit fan-out.
//!
//! Every sensor stream in the mesh (local or proxied) is a [`ValueCell`]. A new
//! watcher first receives the stored value, then every later update, in order.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

struct CellState<T> {
    latest: Option<T>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<T>>,
    next_id: u64,
}

/// Stores the latest value and broadcasts updates to watchers.
///
/// Cloning yields another handle to the same cell.
pub struct ValueCell<T> {
    state: Arc<Mutex<CellState<T>>>,
}

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> ValueCell<T> {
    /// Creates a cell seeded with `initial`.
    pub fn new(initial: T) -> Self {
        Self::with_latest(Some(initial))
    }

    /// Creates a cell with no value yet.
    pub fn empty() -> Self {
        Self::with_latest(None)
    }

    fn with_latest(latest: Option<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CellState {
                latest,
                subscribers: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Stores `value` and delivers it to every live watcher.
    ///
    /// Watchers whose receiving side is gone are pruned.
    pub fn set(&self, value: T) {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|_, tx| tx.send(value.clone()).is_ok());
        state.latest = Some(value);
    }

    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.state.lock().latest.clone()
    }

    /// Starts watching. The stored value, if any, is delivered first.
    pub fn watch(&self) -> ValueWatch<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let replays_latest = match state.latest {
            Some(ref latest) => tx.send(latest.clone()).is_ok(),
            None => false,
        };
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, tx);

        ValueWatch {
            id,
            replays_latest,
            rx: UnboundedReceiverStream::new(rx),
            cell: Some(Arc::downgrade(&self.state)),
        }
    }

    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

/// Stream of values from a [`ValueCell`].
///
/// Ends once unsubscribed (after draining queued values) or once the cell is
/// gone. Unsubscribing twice is a no-op.
pub struct ValueWatch<T> {
    id: u64,
    replays_latest: bool,
    rx: UnboundedReceiverStream<T>,
    cell: Option<Weak<Mutex<CellState<T>>>>,
}

impl<T> ValueWatch<T> {
    /// Waits for the next value.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.next().await
    }

    /// Returns whether the first value yielded is the one stored when the
    /// watch started rather than an update.
    #[must_use]
    pub fn replays_latest(&self) -> bool {
        self.replays_latest
    }

    /// Stops receiving further updates.
    pub fn unsubscribe(&mut self) {
        if let Some(cell) = self.cell.take().and_then(|weak| weak.upgrade()) {
            cell.lock().subscribers.remove(&self.id);
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cell.is_some()
    }
}

impl<T> Stream for ValueWatch<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl<T> Drop for ValueWatch<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_replays_latest_then_updates() {
        let cell = ValueCell::new(1);
        cell.set(2);

        let mut watch = cell.watch();
        assert!(watch.replays_latest());
        cell.set(3);

        assert_eq!(watch.recv().await, Some(2));
        assert_eq!(watch.recv().await, Some(3));
        assert_eq!(cell.get(), Some(3));
    }

    #[tokio::test]
    async fn empty_cell_delivers_only_updates() {
        let cell = ValueCell::empty();
        let mut watch = cell.watch();
        assert!(!watch.replays_latest());
        assert_eq!(cell.get(), None);

        cell.set("on");
        assert_eq!(watch.recv().await, Some("on"));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_ends_stream() {
        let cell = ValueCell::new(0);
        let mut a = cell.watch();
        let mut b = cell.watch();
        assert_eq!(cell.watcher_count(), 2);

        a.unsubscribe();
        a.unsubscribe();
        assert!(!a.is_active());
        assert_eq!(cell.watcher_count(), 1);

        cell.set(5);
        let collected: Vec<_> = a.collect().await;
        assert_eq!(collected, vec![0]);
        assert_eq!(b.recv().await, Some(0));
        assert_eq!(b.recv().await, Some(5));

        drop(b);
        assert_eq!(cell.watcher_count(), 0);
    }

    #[tokio::test]
    async fn watch_ends_when_cell_dropped() {
        let cell = ValueCell::new(7);
        let mut watch = cell.watch();
        drop(cell);

        assert_eq!(watch.recv().await, Some(7));
        assert_eq!(watch.recv().await, None);
    }
}
