//! Message encoding and decoding for the mempool channel.
//!
//! # Wire Format
//!
//! ```text
//! [version: u8][payload: SBOR-encoded MempoolMessage]
//! ```
//!
//! Version is currently `1`. The payload is the SBOR encoding of
//! [`MempoolMessage`], so the variant tag travels inside the payload and an
//! unknown variant surfaces as a decode error.

use crate::MempoolMessage;
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("message too short")]
    MessageTooShort,

    #[error("SBOR decode error: {0}")]
    SborDecode(String),

    #[error("SBOR encode error: {0}")]
    SborEncode(String),
}

/// Encode a mempool message to wire format.
pub fn encode_message(message: &MempoolMessage) -> Result<Vec<u8>, CodecError> {
    let payload =
        sbor::basic_encode(message).map_err(|e| CodecError::SborEncode(format!("{:?}", e)))?;

    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend(payload);
    Ok(bytes)
}

/// Decode a mempool message from wire format.
pub fn decode_message(data: &[u8]) -> Result<MempoolMessage, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }

    let version = data[0];
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }

    sbor::basic_decode(&data[1..]).map_err(|e| CodecError::SborDecode(format!("{:?}", e)))
}

/// Serialized size of a message on the wire.
///
/// Used to size the channel descriptor's receive capacity from the largest
/// admissible message.
pub fn encoded_len(message: &MempoolMessage) -> usize {
    encode_message(message).map(|b| b.len()).unwrap_or_default()
}
