//! Transaction mempool and gossip reactor.
//!
//! This crate holds the node's pool of unconfirmed transactions and the
//! reactor that disseminates them:
//!
//! - [`TxMempool`]: non-blocking admission ([`TxMempool::check_tx`]), a
//!   seen-cache, sender attribution, and the shared gossip log that
//!   broadcasters walk
//! - [`TxLog`]: a concurrent linked log supporting await-next and garbage
//!   detachment under live traversal
//! - [`MempoolIds`]: compact per-peer sender IDs used in per-transaction
//!   sender sets
//! - [`Reactor`]: admits transactions gossiped by peers and runs one
//!   broadcaster task per connected peer
//!
//! # Architecture
//!
//! ```text
//! inbound envelope ──► receive loop ──► TxMempool::check_tx ──► TxLog
//!                                                                 │
//! peer update ──► peer-update loop ──► broadcaster (per peer) ◄───┘
//!                                          │
//!                                          └──► outbound envelope
//! ```
//!
//! Every loop suspends on a multi-way `select!` over its work source, the
//! externally-owned shutdown signal, and the reactor's stop signal;
//! broadcasters additionally observe their per-peer closer. This keeps the
//! wake-up set at each suspension point explicit.

mod config;
mod error;
mod ids;
mod pool;
mod reactor;
mod store;
mod tx;
mod txlog;

pub use config::MempoolConfig;
pub use error::{MempoolError, ReactorError};
pub use ids::{MempoolIds, SenderId, MAX_ACTIVE_IDS, UNKNOWN_SENDER_ID};
pub use pool::{PreCheckFn, TxMempool};
pub use reactor::{
    PanicObserver, PeerManager, Reactor, MEMPOOL_CHANNEL_ID, PEER_CATCHUP_SLEEP_INTERVAL,
};
pub use store::TxStore;
pub use tx::{TxInfo, WrappedTx};
pub use txlog::{LogEntry, TxLog};
