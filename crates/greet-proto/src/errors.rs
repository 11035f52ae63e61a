//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while building, encoding or decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR encoding failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR decoding failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// Byte input does not have the expected length
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        got: usize,
    },

    /// Hexadecimal identifier could not be parsed
    #[error("invalid hex identifier: {0}")]
    InvalidHex(String),

    /// Organization identifier violates the allowed charset or size
    #[error("invalid organization id: {0:?}")]
    InvalidOrganizationId(String),

    /// Step index/payload combination is not a valid step
    #[error("invalid step {index}: {reason}")]
    InvalidStep {
        /// Step index carried on the wire
        index: u8,
        /// What is wrong with the payload
        reason: &'static str,
    },

    /// URL could not be parsed as a server or invitation address
    #[error("invalid address: {0}")]
    InvalidAddr(String),

    /// Envelope exceeds the maximum accepted size
    #[error("envelope too large: {size} bytes (max {max})")]
    EnvelopeTooLarge {
        /// Announced size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },
}
