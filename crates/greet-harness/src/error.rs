//! Harness error types.

use greet_core::StorageError;
use greet_crypto::CryptoError;
use greet_proto::{ErrorPayload, ProtocolError};
use thiserror::Error;

use crate::invariants::Violation;

/// Errors raised while driving a simulation.
#[derive(Error, Debug, Clone)]
pub enum HarnessError {
    /// The server answered with a context error
    #[error("request rejected: {} (code {:#06x})", .0.message, .0.code)]
    Rejected(ErrorPayload),

    /// The server answered with a reply the driver did not expect
    #[error("expected {expected}, got {got}")]
    Unexpected {
        /// Reply the driver was waiting for
        expected: &'static str,
        /// Debug rendering of the actual reply
        got: String,
    },

    /// Peer data failed a client-side check
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The claimer revealed a nonce that does not match its commitment
    #[error("claimer nonce does not match its commitment")]
    NonceMismatch,

    /// Both sides computed different SAS codes
    #[error("SAS codes differ between greeter and claimer")]
    SasMismatch,

    /// A client needed peer data it has not received yet
    #[error("step {0} needs data from an earlier step")]
    MissingPeerData(u8),

    /// Fixture data was rejected by the protocol layer
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reading the state for invariant checks failed
    #[error("snapshot failed: {0}")]
    Storage(#[from] StorageError),

    /// At least one invariant does not hold after an operation
    #[error("invariant violation: {}", format_violations(.0))]
    Invariant(Vec<Violation>),
}

impl HarnessError {
    /// Reply other than `expected`.
    pub fn unexpected(expected: &'static str, got: &impl std::fmt::Debug) -> Self {
        Self::Unexpected { expected, got: format!("{got:?}") }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
