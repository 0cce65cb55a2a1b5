//! Error types for protocol encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR serialization or deserialization failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A state byte did not name a known transaction state.
    #[error("unknown transaction state byte {0:#04x}")]
    UnknownState(u8),
}

impl ProtocolError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }
}
