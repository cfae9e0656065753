//! Core types for the tidepool node.
//!
//! This crate provides the foundational types used throughout the mempool
//! and its gossip reactor:
//!
//! - **Primitives**: [`Hash`] content hashes
//! - **Identifiers**: [`NodeId`], [`BlockHeight`]
//! - **Payloads**: [`Transaction`] opaque transaction bytes
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod hash;
mod identifiers;
mod transaction;

pub use hash::Hash;
pub use identifiers::{BlockHeight, NodeId};
pub use transaction::Transaction;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a test NodeId from a seed byte.
    pub fn test_node_id(seed: u8) -> NodeId {
        NodeId::new(vec![seed; 20])
    }

    /// Create a test transaction whose payload is derived from a seed.
    pub fn test_transaction(seed: u8) -> Transaction {
        Transaction::from(vec![seed, seed.wrapping_add(1), seed.wrapping_add(2)])
    }
}
