//! Cancellable operations and the single-slot owner that supersedes them.
//!
//! An [`Operation`] is one in-flight unit of work (typically one playback).
//! It carries a one-shot cancellation signal and settles exactly once: either
//! it completes normally or it is cancelled, never both.
//!
//! An [`OperationSlot`] holds at most one *active* operation. Starting a new
//! operation cancels the previous one before the new one is installed, under
//! the same lock, so no two operations are ever active from the slot's
//! perspective.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Read-only view of an operation's cancellation signal.
///
/// Handed to downstream asynchronous work (e.g. an audio output process),
/// which must react to it by terminating early and reporting an incomplete
/// result.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    /// Returns `true` once the owning operation has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the owning operation is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// A signal that never fires. Useful for callers with nothing to cancel.
    #[must_use]
    pub fn never() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }
}

struct OperationInner {
    id: u64,
    token: CancellationToken,
    completed: AtomicBool,
}

/// One in-flight unit of work with a one-shot cancellation signal.
///
/// Cloning yields another handle to the same operation.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl Operation {
    fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                id,
                token: CancellationToken::new(),
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Slot-local sequence number of this operation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Cancels the operation.
    ///
    /// Idempotent. Has no effect once the operation completed normally.
    pub fn cancel(&self) {
        if !self.inner.completed.load(Ordering::Acquire) {
            self.inner.token.cancel();
        }
    }

    /// Returns `true` if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Returns `true` if the operation completed normally.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Returns the read-only cancellation signal for downstream work.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            token: self.inner.token.clone(),
        }
    }

    /// Marks the operation as completed.
    ///
    /// Returns `false` if it had already been cancelled, in which case it
    /// stays cancelled.
    fn complete(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.inner.completed.store(true, Ordering::Release);
        true
    }

    fn same(&self, other: &Operation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Exclusive owner of at most one active [`Operation`].
#[derive(Default)]
pub struct OperationSlot {
    current: Mutex<Option<Operation>>,
    next_id: AtomicU64,
}

impl OperationSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new operation, superseding the active one.
    ///
    /// The previous operation's signal fires before the new operation becomes
    /// active, so a stale task observes cancellation promptly.
    pub fn start(&self) -> Operation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let operation = Operation::new(id);

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            log::debug!("[Operation] #{} superseded by #{}", previous.id(), id);
            previous.cancel();
        }
        *current = Some(operation.clone());
        operation
    }

    /// Cancels the active operation, if any.
    ///
    /// Returns `true` if an operation was active. Calling this with nothing
    /// active is a no-op.
    pub fn cancel(&self) -> bool {
        match self.current.lock().take() {
            Some(operation) => {
                operation.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `operation` is the active one and was not cancelled.
    #[must_use]
    pub fn is_active(&self, operation: &Operation) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|current| current.same(operation) && !current.is_cancelled())
    }

    /// Returns `true` if any operation is currently active.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Settles `operation` and releases the slot if it still holds it.
    ///
    /// Returns `true` if the operation completed normally, `false` if it had
    /// been cancelled first.
    pub fn finish(&self, operation: &Operation) -> bool {
        let mut current = self.current.lock();
        let completed = operation.complete();
        if current.as_ref().is_some_and(|c| c.same(operation)) {
            *current = None;
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_cancels_previous_operation() {
        let slot = OperationSlot::new();
        let first = slot.start();
        let second = slot.start();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!slot.is_active(&first));
        assert!(slot.is_active(&second));
    }

    #[test]
    fn cancel_is_idempotent() {
        let slot = OperationSlot::new();
        let op = slot.start();

        assert!(slot.cancel());
        assert!(!slot.cancel());
        op.cancel();
        op.cancel();
        assert!(op.is_cancelled());
        assert!(!slot.has_active());
    }

    #[test]
    fn cancel_after_completion_has_no_effect() {
        let slot = OperationSlot::new();
        let op = slot.start();

        assert!(slot.finish(&op));
        op.cancel();

        assert!(op.is_completed());
        assert!(!op.is_cancelled());
        assert!(!slot.has_active());
    }

    #[test]
    fn finish_after_cancel_reports_incomplete() {
        let slot = OperationSlot::new();
        let op = slot.start();
        op.cancel();

        assert!(!slot.finish(&op));
        assert!(!op.is_completed());
    }

    #[test]
    fn finishing_superseded_operation_keeps_new_one_active() {
        let slot = OperationSlot::new();
        let old = slot.start();
        let new = slot.start();

        assert!(!slot.finish(&old));
        assert!(slot.is_active(&new));
    }

    #[tokio::test]
    async fn signal_resolves_on_cancel() {
        let slot = OperationSlot::new();
        let op = slot.start();
        let signal = op.signal();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            true
        });
        slot.start();

        assert!(waiter.await.unwrap());
    }
}
