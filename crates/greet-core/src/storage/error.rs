//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `NotFound`: a write references a record that does not exist
//! - `Conflict`: a write would break invitation immutability
//! - `Serialization`: failed to encode/decode data
//! - `Io`: underlying storage system errors

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Referenced record not found
    #[error("{what} not found: {key}")]
    NotFound {
        /// Kind of record
        what: &'static str,
        /// Hex key of the record
        key: String,
    },

    /// Write rejected to protect a stored record
    ///
    /// Raised when a batch tries to modify a terminal invitation or to change
    /// the identity of an existing one.
    #[error("conflict on {key}: {reason}")]
    Conflict {
        /// Hex key of the record
        key: String,
        /// What the write tried to do
        reason: String,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
