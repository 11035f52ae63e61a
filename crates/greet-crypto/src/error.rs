//! Cryptographic error types.

use thiserror::Error;

/// Errors from cryptographic operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD decryption failed (wrong key, tampered or truncated data)
    #[error("decryption failed")]
    DecryptionFailed,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Ciphertext shorter than the nonce it must start with
    #[error("ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),

    /// SAS code value does not fit in 20 bits
    #[error("SAS code value out of range: {0}")]
    SasOutOfRange(u32),

    /// SAS code string is not 4 symbols of the SAS alphabet
    #[error("invalid SAS code: {0:?}")]
    InvalidSasCode(String),
}
