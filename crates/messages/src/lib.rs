//! Wire messages for the tidepool mempool channel.
//!
//! The mempool channel currently carries a single message kind: [`Txs`], an
//! ordered batch of opaque transaction payloads. The enum wrapper
//! [`MempoolMessage`] exists so the wire format stays extensible; a payload
//! carrying an unrecognized variant fails to decode and is attributed to
//! the sending peer.

mod codec;
mod mempool;

pub use codec::{decode_message, encode_message, encoded_len, CodecError, WIRE_VERSION};
pub use mempool::{MempoolMessage, Txs};
