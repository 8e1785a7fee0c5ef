//! Message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! Messages are JSON objects tagged with the protocol they belong to:
//!
//! ```text
//! {"protocol": "bft", "payload": {"type": "prepare", "view": 0, ...}}
//! ```

use crate::ProtocolMessage;
use thiserror::Error;

/// Largest encoded message accepted by [`decode_message`].
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("JSON decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("JSON encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encode a protocol message to wire format.
pub fn encode_message(message: &ProtocolMessage) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(message).map_err(CodecError::Encode)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a protocol message from wire format.
pub fn decode_message(data: &[u8]) -> Result<ProtocolMessage, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    serde_json::from_slice(data).map_err(CodecError::Decode)
}
