//! Hash-indexed view of pooled transactions.

use crate::ids::SenderId;
use crate::txlog::LogEntry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tidepool_types::Hash;

/// Index from transaction hash to the transaction's log entry.
///
/// The store answers the two point queries the reactor needs ("do we have
/// this transaction", "does this peer already have it") and hands back the
/// log entry so eviction can detach it from the gossip log.
#[derive(Default)]
pub struct TxStore {
    txs: RwLock<HashMap<Hash, Arc<LogEntry>>>,
}

impl TxStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transactions.
    pub fn len(&self) -> usize {
        self.txs.read().len()
    }

    /// Whether a transaction with this hash is stored.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.txs.read().contains_key(hash)
    }

    /// Index a newly admitted transaction.
    pub fn insert(&self, entry: Arc<LogEntry>) {
        self.txs.write().insert(entry.value().hash(), entry);
    }

    /// Drop a transaction from the index, returning its log entry.
    pub fn remove(&self, hash: &Hash) -> Option<Arc<LogEntry>> {
        self.txs.write().remove(hash)
    }

    /// Record `sender` on the stored transaction, if present.
    pub fn add_sender(&self, hash: &Hash, sender: SenderId) -> bool {
        match self.txs.read().get(hash) {
            Some(entry) => entry.value().add_sender(sender),
            None => false,
        }
    }

    /// Whether `sender` is known to hold the stored transaction.
    ///
    /// Unknown hashes read as false.
    pub fn tx_has_peer(&self, hash: &Hash, sender: SenderId) -> bool {
        match self.txs.read().get(hash) {
            Some(entry) => entry.value().has_sender(sender),
            None => false,
        }
    }
}
