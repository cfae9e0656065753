//! Opaque transaction payloads.

use crate::Hash;
use bytes::Bytes;
use std::fmt;

/// An opaque transaction payload.
///
/// The mempool never interprets the bytes; validation against the local
/// admission policy happens through the configured pre-check hook. The
/// payload is held as [`Bytes`] so cloning a transaction for per-peer
/// fan-out is a reference-count bump, not a copy.
#[derive(Clone, PartialEq, Eq)]
pub struct Transaction(Bytes);

impl Transaction {
    /// Construct from an owned payload.
    pub fn new(bytes: Bytes) -> Self {
        Transaction(bytes)
    }

    /// Content hash of the payload.
    pub fn hash(&self) -> Hash {
        Hash::compute(&self.0)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Copy the payload out as a `Vec<u8>` for wire encoding.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<Vec<u8>> for Transaction {
    fn from(bytes: Vec<u8>) -> Self {
        Transaction(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Transaction {
    fn from(bytes: &[u8]) -> Self {
        Transaction(Bytes::copy_from_slice(bytes))
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction({} bytes, {:?})", self.0.len(), self.hash())
    }
}
