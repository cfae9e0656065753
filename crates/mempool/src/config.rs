//! Mempool configuration.

/// Configuration for the transaction mempool and its gossip reactor.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Whether admitted transactions are broadcast to peers.
    ///
    /// When false the reactor still admits inbound transactions but never
    /// spawns per-peer broadcasters.
    ///
    /// Default: `true`
    pub broadcast: bool,

    /// Maximum number of transactions held in the pool.
    ///
    /// Default: 5000
    pub size: usize,

    /// Largest admissible transaction payload, in bytes.
    ///
    /// Also feeds the channel descriptor's receive capacity.
    ///
    /// Default: 1 MiB
    pub max_tx_bytes: usize,

    /// Number of transaction hashes remembered by the seen-cache.
    ///
    /// Default: 10000
    pub cache_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            broadcast: true,
            size: 5000,
            max_tx_bytes: 1024 * 1024,
            cache_size: 10_000,
        }
    }
}

impl MempoolConfig {
    /// Set whether transactions are broadcast to peers.
    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Set the maximum number of pooled transactions.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the largest admissible transaction payload.
    pub fn with_max_tx_bytes(mut self, max_tx_bytes: usize) -> Self {
        self.max_tx_bytes = max_tx_bytes;
        self
    }

    /// Set the seen-cache capacity.
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }
}
