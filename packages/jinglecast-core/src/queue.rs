//! Sequential request queue with per-item cancellation.
//!
//! Tasks run strictly one at a time in enqueue order. A task that has not
//! started yet can be removed by id; a running task only receives a
//! cancellation signal and decides itself how fast to wind down.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::runtime::{TaskSpawner, TokioSpawner};

// A panicking task is reported as `QueueError::Panicked` only when panics unwind.
#[cfg(panic = "abort")]
compile_error!("the request queue needs `panic = \"unwind\"` to isolate task panics");

/// A task with the same id is already waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a task with id '{0}' is already queued")]
pub struct DuplicateTaskId(pub String);

/// Why a queued task did not produce a value.
#[derive(Debug, Error)]
pub enum QueueError<E> {
    /// Removed by [`RequestQueue::abort`] before it started.
    #[error("task was cancelled before it started")]
    Cancelled,
    /// Discarded by [`RequestQueue::clear`] or dropped with the queue.
    #[error("task was dropped from the queue")]
    Dropped,
    /// The task panicked while running.
    #[error("task panicked")]
    Panicked,
    /// The task ran and returned an error.
    #[error("task failed: {0}")]
    Failed(E),
}

type TaskReply<T, E> = oneshot::Sender<Result<T, QueueError<E>>>;
type TaskBody<T, E> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, E>> + Send>;

struct QueuedTask<T, E> {
    id: String,
    token: CancellationToken,
    body: TaskBody<T, E>,
    reply: TaskReply<T, E>,
}

struct QueueState<T, E> {
    queued: VecDeque<QueuedTask<T, E>>,
    running: Option<(String, CancellationToken)>,
}

/// Resolves with the outcome of a pushed task.
#[must_use = "a task handle does nothing unless awaited"]
pub struct TaskHandle<T, E> {
    rx: oneshot::Receiver<Result<T, QueueError<E>>>,
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, QueueError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Dropped)))
    }
}

/// FIFO queue running one task at a time.
///
/// Cloning yields another handle to the same queue.
pub struct RequestQueue<T, E> {
    state: Arc<Mutex<QueueState<T, E>>>,
    spawner: TokioSpawner,
}

impl<T, E> Clone for RequestQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            spawner: self.spawner.clone(),
        }
    }
}

impl<T, E> RequestQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates an empty queue that runs tasks on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn new() -> Self {
        Self::with_spawner(TokioSpawner::current())
    }

    /// Creates an empty queue that runs tasks through `spawner`.
    #[must_use]
    pub fn with_spawner(spawner: TokioSpawner) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                queued: VecDeque::new(),
                running: None,
            })),
            spawner,
        }
    }

    /// Enqueues a task and starts it if nothing is running.
    ///
    /// The task receives a cancellation token that fires when it is aborted
    /// while running.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateTaskId`] if a task with the same id is still
    /// waiting. The queue is left unchanged in that case.
    pub fn push<F, Fut>(
        &self,
        id: impl Into<String>,
        task: F,
    ) -> Result<TaskHandle<T, E>, DuplicateTaskId>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = id.into();
        let (reply, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.queued.iter().any(|queued| queued.id == id) {
                return Err(DuplicateTaskId(id));
            }
            log::debug!("[Queue] Enqueued {} ({} waiting)", id, state.queued.len());
            state.queued.push_back(QueuedTask {
                id,
                token: CancellationToken::new(),
                body: Box::new(move |token| task(token).boxed()),
                reply,
            });
        }
        self.pump();
        Ok(TaskHandle { rx })
    }

    /// Cancels the task with the given id.
    ///
    /// A waiting task is removed and its handle resolves with
    /// [`QueueError::Cancelled`]. A running task only has its token raised.
    /// Returns `false` if no task with that id is known.
    pub fn abort(&self, id: &str) -> bool {
        let mut state = self.state.lock();

        if let Some(position) = state.queued.iter().position(|queued| queued.id == id) {
            if let Some(task) = state.queued.remove(position) {
                task.token.cancel();
                let _ = task.reply.send(Err(QueueError::Cancelled));
                log::debug!("[Queue] Removed {} before start", id);
            }
            return true;
        }

        match &state.running {
            Some((running_id, token)) if running_id == id => {
                token.cancel();
                log::debug!("[Queue] Signalled running task {}", id);
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if a task with this id is waiting (not yet started).
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.state.lock().queued.iter().any(|queued| queued.id == id)
    }

    /// Drops every waiting task without running or cancelling it.
    ///
    /// Their handles resolve with [`QueueError::Dropped`]. The running task
    /// is left alone. Returns how many tasks were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.queued.len();
        state.queued.clear();
        if dropped > 0 {
            log::debug!("[Queue] Cleared {} waiting task(s)", dropped);
        }
        dropped
    }

    /// Number of waiting tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Returns `true` if no task is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().queued.is_empty()
    }

    /// Returns `true` while a task is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running.is_some()
    }

    /// Ids of the waiting tasks in start order.
    #[must_use]
    pub fn queued_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .queued
            .iter()
            .map(|queued| queued.id.clone())
            .collect()
    }

    fn pump(&self) {
        let next = {
            let mut state = self.state.lock();
            if state.running.is_some() {
                return;
            }
            let Some(task) = state.queued.pop_front() else {
                return;
            };
            state.running = Some((task.id.clone(), task.token.clone()));
            task
        };

        let queue = self.clone();
        self.spawner.spawn(async move {
            let QueuedTask {
                id,
                token,
                body,
                reply,
            } = next;

            let outcome = match AssertUnwindSafe(async move { body(token).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(QueueError::Failed(err)),
                Err(_) => {
                    log::error!("[Queue] Task {} panicked", id);
                    Err(QueueError::Panicked)
                }
            };

            queue.state.lock().running = None;
            let _ = reply.send(outcome);
            queue.pump();
        });
    }
}

impl<T, E> Default for RequestQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type TestQueue = RequestQueue<&'static str, String>;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn aborted_middle_item_is_skipped() {
        let queue = TestQueue::new();
        let order = recorder();
        let (release, gate) = oneshot::channel::<()>();

        let o = order.clone();
        let a = queue
            .push("A", move |_| async move {
                let _ = gate.await;
                o.lock().push("A");
                Ok("A")
            })
            .unwrap();
        let o = order.clone();
        let b = queue
            .push("B", move |_| async move {
                o.lock().push("B");
                Ok("B")
            })
            .unwrap();
        let o = order.clone();
        let c = queue
            .push("C", move |_| async move {
                o.lock().push("C");
                Ok("C")
            })
            .unwrap();

        assert!(queue.abort("B"));
        assert_eq!(queue.queued_ids(), vec!["C".to_string()]);
        release.send(()).unwrap();

        assert_eq!(a.await.unwrap(), "A");
        assert!(matches!(b.await, Err(QueueError::Cancelled)));
        assert_eq!(c.await.unwrap(), "C");
        assert_eq!(*order.lock(), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn duplicate_queued_id_is_rejected() {
        let queue = TestQueue::new();
        let (release, gate) = oneshot::channel::<()>();

        let first = queue
            .push("A", move |_| async move {
                let _ = gate.await;
                Ok("A")
            })
            .unwrap();
        let second = queue.push("B", |_| async { Ok("B") }).unwrap();

        let duplicate = queue.push("B", |_| async { Ok("B2") });
        assert_eq!(duplicate.err(), Some(DuplicateTaskId("B".into())));
        assert_eq!(queue.len(), 1);
        assert!(queue.has("B"));

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), "A");
        assert_eq!(second.await.unwrap(), "B");
    }

    #[tokio::test]
    async fn running_task_is_signalled_not_killed() {
        let queue = TestQueue::new();

        let handle = queue
            .push("A", |token| async move {
                token.cancelled().await;
                Ok("wound down")
            })
            .unwrap();

        tokio::task::yield_now().await;
        assert!(queue.is_running());
        assert!(!queue.has("A"));
        assert!(queue.abort("A"));

        assert_eq!(handle.await.unwrap(), "wound down");
    }

    #[tokio::test]
    async fn never_runs_two_tasks_at_once() {
        let queue = TestQueue::new();
        let active = Arc::new(Mutex::new((0usize, 0usize)));

        let handles: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|id| {
                let active = active.clone();
                queue
                    .push(id, move |_| async move {
                        {
                            let mut guard = active.lock();
                            guard.0 += 1;
                            guard.1 = guard.1.max(guard.0);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.lock().0 -= 1;
                        Ok(id)
                    })
                    .unwrap()
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(active.lock().1, 1);
    }

    #[tokio::test]
    async fn failure_and_panic_still_start_next_task() {
        let queue = TestQueue::new();

        let failed = queue
            .push("A", |_| async { Err("boom".to_string()) })
            .unwrap();
        let panicked = queue
            .push("B", |_| async { panic!("task exploded") })
            .unwrap();
        let next = queue.push("C", |_| async { Ok("C") }).unwrap();

        assert!(matches!(failed.await, Err(QueueError::Failed(msg)) if msg == "boom"));
        assert!(matches!(panicked.await, Err(QueueError::Panicked)));
        assert_eq!(next.await.unwrap(), "C");
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn clear_drops_waiting_tasks() {
        let queue = TestQueue::new();
        let (release, gate) = oneshot::channel::<()>();

        let running = queue
            .push("A", move |_| async move {
                let _ = gate.await;
                Ok("A")
            })
            .unwrap();
        let waiting = queue.push("B", |_| async { Ok("B") }).unwrap();

        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        release.send(()).unwrap();

        assert_eq!(running.await.unwrap(), "A");
        assert!(matches!(waiting.await, Err(QueueError::Dropped)));
    }

    #[tokio::test]
    async fn abort_unknown_id_returns_false() {
        let queue = TestQueue::new();
        assert!(!queue.abort("missing"));
    }
}
