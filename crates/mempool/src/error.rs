//! Mempool and reactor errors.

use thiserror::Error;
use tidepool_messages::CodecError;
use tidepool_p2p::ChannelId;

/// Errors returned by transaction admission.
///
/// These are informational: a transaction can fail admission for benign
/// reasons (already known, pool full) and the reactor logs rather than
/// penalizes the gossiping peer.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction of {got} bytes exceeds the {max} byte limit")]
    TxTooLarge { got: usize, max: usize },

    #[error("transaction already present in the mempool cache")]
    InCache,

    #[error("mempool is full: {size} transactions (max {max})")]
    Full { size: usize, max: usize },

    #[error("pre-check failed: {0}")]
    PreCheck(String),
}

/// Peer-attributable errors raised while processing an inbound envelope.
///
/// Each of these is reported on the channel's error side-band; the transport
/// layer decides whether to disconnect the peer.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("empty transaction batch received from peer")]
    EmptyTxs,

    #[error("unknown channel id {0} for envelope")]
    UnknownChannel(ChannelId),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("panic in message processing: {0}")]
    Handler(String),
}
