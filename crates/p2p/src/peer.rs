//! Peer status updates.

use crate::sync::Closer;
use std::fmt;
use tidepool_types::NodeId;
use tokio::sync::mpsc;

/// Connectivity status of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// The peer connected (or finished handshaking).
    Up,
    /// The peer disconnected.
    Down,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerStatus::Up => write!(f, "up"),
            PeerStatus::Down => write!(f, "down"),
        }
    }
}

/// A peer status transition delivered to subscribers.
#[derive(Debug, Clone)]
pub struct PeerUpdate {
    /// The peer whose status changed.
    pub node_id: NodeId,
    /// The new status.
    pub status: PeerStatus,
}

/// A subscription to peer status updates.
///
/// The consuming loop owns the subscription and calls [`PeerUpdates::close`]
/// when it exits; whoever coordinates shutdown holds the signal returned by
/// [`PeerUpdates::done_signal`] and awaits it after stopping the loop.
pub struct PeerUpdates {
    updates: mpsc::Receiver<PeerUpdate>,
    done: Closer,
}

impl PeerUpdates {
    /// Create a subscription with the given buffer depth.
    ///
    /// Returns the producer side (held by the peer manager or a test
    /// harness) and the subscription.
    pub fn channel(capacity: usize) -> (mpsc::Sender<PeerUpdate>, PeerUpdates) {
        let (tx, rx) = mpsc::channel(capacity);
        let updates = PeerUpdates {
            updates: rx,
            done: Closer::new(),
        };
        (tx, updates)
    }

    /// Receive the next update; `None` once the producer side is dropped.
    pub async fn recv(&mut self) -> Option<PeerUpdate> {
        self.updates.recv().await
    }

    /// Signal that the consuming loop has exited.
    pub fn close(&self) {
        self.done.close();
    }

    /// A handle on the loop-exit signal, for shutdown coordination.
    pub fn done_signal(&self) -> Closer {
        self.done.clone()
    }
}
