//! Cryptographic primitives for the greeting ceremony.
//!
//! The server only ever needs [`HashDigest`] (to check the claimer nonce
//! against its commitment). Greeter and claimer clients use the rest: an
//! ephemeral X25519 exchange yielding a [`SecretKey`], [`SasCode`] derivation
//! for human verification, and AEAD sealing of the enrollment payloads.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod hash;
pub mod keys;
pub mod sas;

pub use error::CryptoError;
pub use hash::{HASH_DIGEST_SIZE, HashDigest};
pub use keys::{NONCE_SIZE, PrivateKey, PublicKey, SecretKey};
pub use sas::SasCode;
