//! # Wire Codec
//!
//! Compact binary encoding of [`Message`] for transports that carry messages
//! between processes. Every field round-trips losslessly, including the
//! difference between absent and empty headers.

use crate::message::Message;
use thiserror::Error;

/// Content type announced by transports carrying encoded messages.
pub const MEDIA_TYPE: &str = "application/x-mailbox-message";

/// Upper bound accepted when decoding, guarding against hostile length prefixes.
pub const MAX_ENCODED_SIZE: u64 = 16 * 1024 * 1024;

/// Errors from encoding or decoding messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// The bytes do not form a valid message.
    #[error("Failed to decode message: {0}")]
    Decode(String),
}

/// Encode a message into its wire form.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(message).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a message from its wire form.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    use bincode::Options;

    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_ENCODED_SIZE)
        .deserialize(bytes)
        .map_err(|e| CodecError::Decode(e.to_string()))
}
