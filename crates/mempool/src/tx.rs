//! Pooled transaction wrapper and admission metadata.

use crate::ids::{SenderId, UNKNOWN_SENDER_ID};
use parking_lot::RwLock;
use std::collections::HashSet;
use tidepool_types::{BlockHeight, Hash, NodeId, Transaction};

/// Admission metadata accompanying a [`crate::TxMempool::check_tx`] call.
#[derive(Debug, Clone, Default)]
pub struct TxInfo {
    /// Compact ID of the gossiping peer, or [`UNKNOWN_SENDER_ID`] when the
    /// transaction was submitted locally.
    pub sender_id: SenderId,
    /// Full identity of the gossiping peer, if any.
    pub sender_node_id: Option<NodeId>,
}

/// A transaction held by the mempool.
///
/// Carries the payload, its content hash, the pool height at which it was
/// admitted, and the set of peers known to already hold it. The sender set
/// is written only on the admission path; broadcasters read membership to
/// suppress echo.
pub struct WrappedTx {
    tx: Transaction,
    hash: Hash,
    height: BlockHeight,
    senders: RwLock<HashSet<SenderId>>,
}

impl WrappedTx {
    /// Wrap a transaction admitted at `height`.
    pub fn new(tx: Transaction, height: BlockHeight) -> Self {
        let hash = tx.hash();
        WrappedTx {
            tx,
            hash,
            height,
            senders: RwLock::new(HashSet::new()),
        }
    }

    /// The raw transaction.
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Content hash of the transaction.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Pool height at which the transaction was admitted.
    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Record that `sender` is known to hold this transaction.
    ///
    /// [`UNKNOWN_SENDER_ID`] is never recorded. Returns true if the sender
    /// was newly added.
    pub fn add_sender(&self, sender: SenderId) -> bool {
        if sender == UNKNOWN_SENDER_ID {
            return false;
        }
        self.senders.write().insert(sender)
    }

    /// Whether `sender` is known to hold this transaction.
    pub fn has_sender(&self, sender: SenderId) -> bool {
        self.senders.read().contains(&sender)
    }
}

impl std::fmt::Debug for WrappedTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedTx")
            .field("hash", &self.hash)
            .field("height", &self.height)
            .field("senders", &*self.senders.read())
            .finish()
    }
}
