//! The transaction mempool.

use crate::config::MempoolConfig;
use crate::error::MempoolError;
use crate::ids::SenderId;
use crate::store::TxStore;
use crate::tx::{TxInfo, WrappedTx};
use crate::txlog::{LogEntry, TxLog};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tidepool_types::{BlockHeight, Hash, Transaction};
use tracing::{debug, instrument, trace};

/// Admission-policy hook run on every transaction before it enters the
/// pool. The node wires its application-level validity check in here.
pub type PreCheckFn = Box<dyn Fn(&Transaction) -> Result<(), String> + Send + Sync>;

/// The pool of unconfirmed transactions.
///
/// Admission is non-blocking: [`check_tx`](TxMempool::check_tx) either
/// admits the transaction into the store and the gossip log or returns an
/// informational error. Broadcasters consume the gossip view
/// ([`wait_for_next_tx`](TxMempool::wait_for_next_tx),
/// [`next_gossip_tx`](TxMempool::next_gossip_tx)) and never mutate pool
/// state.
pub struct TxMempool {
    cfg: MempoolConfig,
    store: TxStore,
    log: TxLog,
    cache: Mutex<SeenCache>,
    height: AtomicU64,
    pre_check: Option<PreCheckFn>,
}

impl TxMempool {
    /// Create a pool with the given configuration.
    pub fn new(cfg: MempoolConfig) -> Self {
        let cache = SeenCache::new(cfg.cache_size);
        TxMempool {
            cfg,
            store: TxStore::new(),
            log: TxLog::new(),
            cache: Mutex::new(cache),
            height: AtomicU64::new(0),
            pre_check: None,
        }
    }

    /// Install an admission-policy pre-check.
    pub fn with_pre_check(mut self, pre_check: PreCheckFn) -> Self {
        self.pre_check = Some(pre_check);
        self
    }

    /// Height the pool last observed via [`update`](TxMempool::update).
    pub fn height(&self) -> BlockHeight {
        BlockHeight(self.height.load(Ordering::Acquire))
    }

    /// Number of pooled transactions.
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Validate a transaction and admit it into the pool.
    ///
    /// Duplicate submissions are rejected with [`MempoolError::InCache`],
    /// but the gossiping peer is still recorded on the stored transaction
    /// so the broadcaster will not echo it back.
    #[instrument(skip_all, fields(sender_id = info.sender_id))]
    pub fn check_tx(&self, tx: &Transaction, info: TxInfo) -> Result<(), MempoolError> {
        if tx.len() > self.cfg.max_tx_bytes {
            return Err(MempoolError::TxTooLarge {
                got: tx.len(),
                max: self.cfg.max_tx_bytes,
            });
        }

        if let Some(pre_check) = &self.pre_check {
            pre_check(tx).map_err(MempoolError::PreCheck)?;
        }

        let hash = tx.hash();

        if self.store.contains(&hash) {
            self.store.add_sender(&hash, info.sender_id);
            return Err(MempoolError::InCache);
        }

        if !self.cache.lock().push(hash) {
            // Still pooled or recently evicted; either way the peer now
            // holds it, which matters for echo suppression.
            self.store.add_sender(&hash, info.sender_id);
            return Err(MempoolError::InCache);
        }

        if self.size() >= self.cfg.size {
            // Forget the hash so the transaction can be resubmitted once
            // the pool has drained.
            self.cache.lock().remove(&hash);
            return Err(MempoolError::Full {
                size: self.size(),
                max: self.cfg.size,
            });
        }

        let wtx = Arc::new(WrappedTx::new(tx.clone(), self.height()));
        wtx.add_sender(info.sender_id);

        // Index before attaching: by the time a broadcaster is woken by the
        // log, the sender set is already visible through the store.
        let entry = TxLog::new_entry(wtx);
        self.store.insert(Arc::clone(&entry));
        self.log.append(&entry);

        debug!(
            tx_hash = %hash,
            pool_size = self.size(),
            "transaction admitted to mempool"
        );
        Ok(())
    }

    /// Advance the pool height and evict transactions committed at it.
    ///
    /// Evicted entries are detached from the gossip log in place;
    /// broadcasters holding a cursor on one observe the detachment and
    /// restart from the head. Committed hashes stay in the seen-cache so
    /// late gossip of them is rejected.
    #[instrument(skip_all, fields(height = height.0, committed = committed.len()))]
    pub fn update(&self, height: BlockHeight, committed: &[Hash]) {
        self.height.store(height.0, Ordering::Release);

        for hash in committed {
            if let Some(entry) = self.store.remove(hash) {
                self.log.remove(&entry);
                trace!(tx_hash = %hash, "evicted committed transaction");
            }
        }
    }

    /// Wait until the gossip log is non-empty.
    pub async fn wait_for_next_tx(&self) {
        self.log.wait_nonempty().await
    }

    /// Current head of the gossip log.
    ///
    /// May be `None` racily right after a wakeup; callers re-enter their
    /// wait in that case.
    pub fn next_gossip_tx(&self) -> Option<Arc<LogEntry>> {
        self.log.front()
    }

    /// Whether the given peer is known to hold the transaction.
    pub fn tx_has_peer(&self, hash: &Hash, sender: SenderId) -> bool {
        self.store.tx_has_peer(hash, sender)
    }
}

impl std::fmt::Debug for TxMempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxMempool")
            .field("size", &self.size())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

/// Bounded FIFO set of recently seen transaction hashes.
///
/// Deduplicates gossip across the whole network without keeping evicted
/// transactions alive: the cache outlives pool membership by design.
struct SeenCache {
    capacity: usize,
    set: HashSet<Hash>,
    order: VecDeque<Hash>,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        SeenCache {
            capacity,
            set: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a hash; returns false if it was already present.
    fn push(&mut self, hash: Hash) -> bool {
        if !self.set.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        while self.set.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.set.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    /// Forget a hash. The stale queue slot is dropped lazily on eviction.
    fn remove(&mut self, hash: &Hash) {
        self.set.remove(hash);
    }
}
