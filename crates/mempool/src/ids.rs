//! Compact per-peer sender IDs.
//!
//! Per-transaction sender sets store peers as small integers rather than
//! full node identities; this allocator owns the mapping. ID `0` is
//! reserved for locally submitted transactions.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tidepool_types::NodeId;

/// Compact alias for a peer, used as a sender-set element.
pub type SenderId = u16;

/// Sender ID representing "locally submitted / no peer".
pub const UNKNOWN_SENDER_ID: SenderId = 0;

/// Upper bound on concurrently active peer IDs.
pub const MAX_ACTIVE_IDS: SenderId = u16::MAX;

/// Thread-safe allocator of [`SenderId`]s.
///
/// At any instant the active assignments form an injection from peer
/// identity into `[1, MAX_ACTIVE_IDS)`; reclaimed IDs are reusable.
#[derive(Default)]
pub struct MempoolIds {
    inner: Mutex<IdsInner>,
}

#[derive(Default)]
struct IdsInner {
    peer_map: HashMap<NodeId, SenderId>,
    active: BTreeSet<SenderId>,
}

impl MempoolIds {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the smallest unused ID to `peer`.
    ///
    /// Idempotent: a peer that already holds an ID keeps it.
    ///
    /// # Panics
    ///
    /// Panics when the active set has exhausted the ID space; a node with
    /// 65k simultaneously broadcasting peers has bigger problems, so this
    /// fails fast rather than degrading.
    pub fn reserve_for_peer(&self, peer: &NodeId) -> SenderId {
        let mut inner = self.inner.lock();

        if let Some(&id) = inner.peer_map.get(peer) {
            return id;
        }

        if inner.active.len() >= (MAX_ACTIVE_IDS - 1) as usize {
            panic!(
                "no available sender ids: {} peers active (max {})",
                inner.active.len(),
                MAX_ACTIVE_IDS - 1
            );
        }

        let mut id: SenderId = 1;
        while inner.active.contains(&id) {
            id += 1;
        }

        inner.active.insert(id);
        inner.peer_map.insert(peer.clone(), id);
        id
    }

    /// The ID reserved for `peer`, or [`UNKNOWN_SENDER_ID`] if none.
    pub fn get_for_peer(&self, peer: &NodeId) -> SenderId {
        self.inner
            .lock()
            .peer_map
            .get(peer)
            .copied()
            .unwrap_or(UNKNOWN_SENDER_ID)
    }

    /// Release the ID held by `peer`, making it reusable.
    ///
    /// Idempotent: reclaiming a peer without a reservation is a no-op, so
    /// callers may reclaim unconditionally on disconnect.
    pub fn reclaim(&self, peer: &NodeId) {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.peer_map.remove(peer) {
            inner.active.remove(&id);
        }
    }

    /// Number of active reservations.
    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }
}
