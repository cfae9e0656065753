//! Typed p2p channel endpoints.

use bytes::Bytes;
use std::fmt;
use tidepool_types::NodeId;
use tokio::sync::mpsc;

/// Depth of the router-owned outbound send buffer.
///
/// This buffer absorbs bounded skew between broadcasters and the transport;
/// beyond it, a broadcaster blocks, which is the intended backpressure.
pub const OUTBOUND_BUFFER_CAPACITY: usize = 128;

/// Identifier of a p2p channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u8);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Static properties of a channel, announced to the router at registration.
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
    /// Channel identifier.
    pub id: ChannelId,
    /// Scheduling priority relative to other channels (higher = sooner).
    pub priority: u8,
    /// Largest inbound message, in encoded bytes, the channel accepts.
    pub recv_message_capacity: usize,
    /// Depth of the inbound envelope buffer.
    pub recv_buffer_capacity: usize,
}

/// A message crossing the transport boundary.
///
/// `from` is `None` for locally injected envelopes; `to` is `None` on the
/// inbound side.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Originating peer, if any.
    pub from: Option<NodeId>,
    /// Destination peer for outbound envelopes.
    pub to: Option<NodeId>,
    /// Channel the envelope belongs to.
    pub channel_id: ChannelId,
    /// Encoded message payload.
    pub payload: Bytes,
}

/// A peer-attributable protocol error, reported on the error side-band.
///
/// The transport layer decides what to do with the peer (typically
/// disconnect and lower its score).
#[derive(Debug, Clone)]
pub struct PeerError {
    /// The offending peer.
    pub peer: NodeId,
    /// Human-readable description of the violation.
    pub error: String,
}

/// The reactor-facing end of a p2p channel.
pub struct Channel {
    /// Channel identifier.
    pub id: ChannelId,
    /// Inbound envelopes from peers.
    pub inbound: mpsc::Receiver<Envelope>,
    /// Outbound envelopes to peers.
    pub outbound: mpsc::Sender<Envelope>,
    /// Error side-band for peer-attributable errors.
    pub errors: mpsc::Sender<PeerError>,
}

/// The transport-facing end of a p2p channel.
///
/// In production the router holds this; tests drive it directly.
pub struct RouterHandle {
    /// Feed inbound envelopes to the reactor.
    pub inbound: mpsc::Sender<Envelope>,
    /// Drain envelopes the reactor wants sent.
    pub outbound: mpsc::Receiver<Envelope>,
    /// Drain peer errors the reactor reported.
    pub errors: mpsc::Receiver<PeerError>,
}

impl Channel {
    /// Create a channel pair from a descriptor.
    pub fn new(descriptor: &ChannelDescriptor) -> (Channel, RouterHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(descriptor.recv_buffer_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(OUTBOUND_BUFFER_CAPACITY);

        let channel = Channel {
            id: descriptor.id,
            inbound: inbound_rx,
            outbound: outbound_tx,
            errors: error_tx,
        };
        let router = RouterHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
            errors: error_rx,
        };
        (channel, router)
    }
}
