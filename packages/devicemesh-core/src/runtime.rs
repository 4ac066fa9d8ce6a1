//! Task spawning abstraction.
//!
//! Every long-lived loop in this crate (broker operations, inbound dispatch,
//! RPC serving, sensor forwarding, proxy value tracking) is started through a
//! [`TaskSpawner`], so an embedding application decides which runtime hosts
//! the mesh.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// Spawned tasks run detached. Use [`spawn_until`](TaskSpawner::spawn_until)
/// for loops that must stop when their owner is disposed.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a future that is dropped as soon as `cancel` fires.
    ///
    /// Dropping the future releases whatever it owns (subscriptions, timers),
    /// so cancellation doubles as cleanup.
    fn spawn_until<F>(&self, cancel: CancellationToken, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = future => {}
            }
        });
    }
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Spawns a future and keeps its join handle, for owners that need to
    /// wait for the task to wind down.
    pub fn spawn_tracked<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
