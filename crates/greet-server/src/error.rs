//! Server error types.

use greet_core::StorageError;
use greet_proto::ProtocolError;
use thiserror::Error;

/// Errors that can occur in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unusable directories, etc.).
    ///
    /// Fatal: prevents server startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (connection failure, I/O error, etc.).
    ///
    /// May be transient (peer went away) or fatal (bind address in use).
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed stream data (oversized envelope, bad CBOR).
    ///
    /// Fatal for that connection, the server keeps serving the others.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Database could not be opened
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal error (worker task failure, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
