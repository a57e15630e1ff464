//! Task spawning abstraction.
//!
//! Core services spawn their background work (queue pumps, prepare-window
//! expiry, heartbeat pushes) through [`TaskSpawner`] so tests and binaries
//! decide which runtime handle the work lands on.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// Implementations should ensure tasks keep running even if the spawner
/// itself is dropped.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a future that is dropped as soon as `token` is cancelled.
    ///
    /// Used for long-lived loops that should stop on shutdown without
    /// checking the token themselves.
    fn spawn_until_cancelled<F>(&self, token: CancellationToken, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = future => {}
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
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(executed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_reaches_its_end() {
        let spawner = TokioSpawner::current();
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = finished.clone();

        spawner.spawn_until_cancelled(token.clone(), async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            finished_clone.store(true, Ordering::SeqCst);
        });

        token.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(!finished.load(Ordering::SeqCst));
    }
}
