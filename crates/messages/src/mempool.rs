//! Mempool channel message types.

use sbor::prelude::BasicSbor;

/// A batch of transaction payloads.
///
/// The broadcaster only ever emits single-element batches; multi-element
/// batches are accepted on the receive path for forward compatibility.
/// An empty batch is a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Txs {
    /// Ordered transaction payloads.
    pub txs: Vec<Vec<u8>>,
}

impl Txs {
    /// A batch holding a single transaction payload.
    pub fn single(tx: Vec<u8>) -> Self {
        Txs { txs: vec![tx] }
    }
}

/// Messages exchanged on the mempool channel.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum MempoolMessage {
    /// Transaction payloads being gossiped.
    Txs(Txs),
}
