//! P2P scaffolding consumed by tidepool reactors.
//!
//! The transport itself (connection management, framing, peer scoring) lives
//! outside this workspace. What a reactor sees is:
//!
//! - a typed [`Channel`]: an inbound stream of [`Envelope`]s, an outbound
//!   sink, and an error side-band for peer-attributable protocol errors
//! - a [`PeerUpdates`] subscription delivering peer up/down transitions
//! - the lifecycle primitives [`sync::Closer`] and [`sync::TaskGroup`] used
//!   to tear reactors down deterministically
//!
//! The router side of each channel is exposed as [`RouterHandle`], which is
//! what the transport layer (or a test harness) drives.

mod channel;
mod peer;
pub mod sync;

pub use channel::{
    Channel, ChannelDescriptor, ChannelId, Envelope, PeerError, RouterHandle,
    OUTBOUND_BUFFER_CAPACITY,
};
pub use peer::{PeerStatus, PeerUpdate, PeerUpdates};
