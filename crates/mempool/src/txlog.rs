//! Concurrent transaction log.
//!
//! The gossip view of the mempool is a linked log that any number of
//! broadcasters walk independently while admission appends to the tail and
//! eviction removes arbitrary entries. Two properties make that safe:
//!
//! - **Await-next**: [`LogEntry::next_wait`] completes once the entry has a
//!   successor *or* has been detached from the log, so a consumer parked at
//!   the tail wakes exactly when there is something to do.
//! - **Garbage detachment**: removing an entry while a consumer holds a
//!   reference to it is legal; [`LogEntry::next`] then returns `None`, the
//!   consumer's signal to restart from the head.
//!
//! Structural mutation is serialized by a log-level mutex. Entries link
//! backwards through `Weak` so a detached prefix is freed as soon as the
//! last consumer drops its cursor.

use crate::tx::WrappedTx;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// One element of the log.
pub struct LogEntry {
    value: Arc<WrappedTx>,
    links: Mutex<Links>,
    /// Set by [`TxLog::append`]; an entry evicted before attachment is
    /// marked detached without ever being linked.
    linked: AtomicBool,
    detached: AtomicBool,
    /// Fired when a successor is attached or the entry is detached.
    changed: Notify,
}

#[derive(Default)]
struct Links {
    prev: Weak<LogEntry>,
    next: Option<Arc<LogEntry>>,
}

impl LogEntry {
    fn new(value: Arc<WrappedTx>) -> Arc<Self> {
        Arc::new(LogEntry {
            value,
            links: Mutex::new(Links::default()),
            linked: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            changed: Notify::new(),
        })
    }

    /// The transaction stored at this entry.
    pub fn value(&self) -> &Arc<WrappedTx> {
        &self.value
    }

    /// Whether this entry has been removed from the log.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// The successor entry, or `None` once this entry is detached.
    ///
    /// `None` is the restart sentinel: the caller's cursor no longer lies
    /// on the live log and traversal must resume from the head.
    pub fn next(&self) -> Option<Arc<LogEntry>> {
        if self.is_detached() {
            return None;
        }
        self.links.lock().next.clone()
    }

    /// Wait until this entry has a successor or has been detached.
    pub async fn next_wait(&self) {
        loop {
            // The Notified future must exist before the condition is
            // re-checked, otherwise a concurrent wakeup is lost.
            let notified = self.changed.notified();
            if self.is_detached() || self.links.lock().next.is_some() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEntry")
            .field("tx_hash", &self.value.hash())
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// The shared transaction log.
#[derive(Default)]
pub struct TxLog {
    inner: Mutex<LogInner>,
    /// Fired when the log transitions from empty to non-empty.
    nonempty: Notify,
}

#[derive(Default)]
struct LogInner {
    head: Option<Arc<LogEntry>>,
    tail: Option<Arc<LogEntry>>,
    len: usize,
}

impl TxLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Whether the log has no attached entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current head of the log.
    ///
    /// May race with concurrent removal and return `None` immediately after
    /// a wakeup; callers restart their wait in that case.
    pub fn front(&self) -> Option<Arc<LogEntry>> {
        self.inner.lock().head.clone()
    }

    /// Create an entry that is not yet part of the log.
    ///
    /// Admission indexes the entry before attaching it with
    /// [`append`](TxLog::append): consumers are only woken once every view
    /// of the transaction is in place.
    pub fn new_entry(value: Arc<WrappedTx>) -> Arc<LogEntry> {
        LogEntry::new(value)
    }

    /// Append a transaction, waking consumers parked at the old tail and
    /// any consumer waiting for the log to become non-empty.
    pub fn push_back(&self, value: Arc<WrappedTx>) -> Arc<LogEntry> {
        let entry = Self::new_entry(value);
        self.append(&entry);
        entry
    }

    /// Attach a previously created entry at the tail.
    ///
    /// An entry that was already detached (evicted between creation and
    /// attachment) is left off the log.
    pub fn append(&self, entry: &Arc<LogEntry>) {
        let mut inner = self.inner.lock();
        if entry.is_detached() {
            return;
        }
        entry.linked.store(true, Ordering::Release);

        let old_tail = inner.tail.replace(Arc::clone(entry));
        match &old_tail {
            Some(tail) => {
                entry.links.lock().prev = Arc::downgrade(tail);
                tail.links.lock().next = Some(Arc::clone(entry));
            }
            None => {
                inner.head = Some(Arc::clone(entry));
            }
        }
        inner.len += 1;
        let became_nonempty = inner.len == 1;
        drop(inner);

        if let Some(tail) = old_tail {
            tail.changed.notify_waiters();
        }
        if became_nonempty {
            self.nonempty.notify_waiters();
        }
    }

    /// Detach an entry from the log.
    ///
    /// Consumers holding a cursor on the entry observe detachment through
    /// [`LogEntry::next`]/[`LogEntry::next_wait`]; consumers positioned on
    /// its neighbors are unaffected. Idempotent.
    pub fn remove(&self, entry: &Arc<LogEntry>) {
        let mut inner = self.inner.lock();
        if entry.detached.swap(true, Ordering::AcqRel) {
            return;
        }

        // Evicted before it was ever attached; there is nothing to unlink.
        if !entry.linked.load(Ordering::Acquire) {
            drop(inner);
            entry.changed.notify_waiters();
            return;
        }

        let (prev, next) = {
            let mut links = entry.links.lock();
            (links.prev.upgrade(), links.next.take())
        };

        match &prev {
            Some(prev) => prev.links.lock().next = next.clone(),
            None => inner.head = next.clone(),
        }
        match &next {
            Some(next) => {
                next.links.lock().prev = match &prev {
                    Some(prev) => Arc::downgrade(prev),
                    None => Weak::new(),
                };
            }
            None => inner.tail = prev,
        }
        inner.len -= 1;
        drop(inner);

        entry.changed.notify_waiters();
    }

    /// Wait until the log is non-empty.
    pub async fn wait_nonempty(&self) {
        loop {
            let notified = self.nonempty.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
