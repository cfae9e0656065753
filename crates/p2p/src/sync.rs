//! Lifecycle synchronization primitives.
//!
//! Reactors coordinate shutdown through two small primitives: a one-shot,
//! multi-observer cancellation signal ([`Closer`]) and a join counter for
//! spawned tasks ([`TaskGroup`]). Both are cheap to clone and safe to await
//! from any number of tasks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A one-shot cancellation signal.
///
/// `close()` fires the signal at most once; every current and future
/// `done().await` completes after that. Clones observe the same signal.
#[derive(Clone, Default)]
pub struct Closer {
    inner: Arc<CloserInner>,
}

#[derive(Default)]
struct CloserInner {
    closed: AtomicBool,
    notify: Notify,
}

impl Closer {
    /// Create an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the signal has fired.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until the signal fires.
    pub async fn done(&self) {
        loop {
            // The Notified future must exist before the flag is re-checked,
            // otherwise a close() between check and await is lost.
            let notified = self.inner.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Closer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closer")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A join counter for spawned tasks.
///
/// Tasks are registered with `add()` before being spawned and report
/// completion with `done()`; `wait()` completes once the count returns to
/// zero. Unlike a `JoinSet`, membership is anonymous, which is all the
/// reactor teardown path needs.
#[derive(Clone, Default)]
pub struct TaskGroup {
    inner: Arc<TaskGroupInner>,
}

#[derive(Default)]
struct TaskGroupInner {
    active: AtomicUsize,
    drained: Notify,
}

impl TaskGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one task. Call before spawning.
    pub fn add(&self) {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
    }

    /// Report one task as finished.
    pub fn done(&self) {
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }

    /// Number of registered, unfinished tasks.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Wait until every registered task has finished.
    ///
    /// Completes immediately if the group is empty.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("active", &self.active())
            .finish()
    }
}
