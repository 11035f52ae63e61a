//! Ephemeral key agreement and the symmetric key it yields.
//!
//! Each side of a greeting attempt generates an X25519 key pair, exchanges the
//! public halves at step 0 and derives the same [`SecretKey`]. The secret key
//! keys the SAS HMAC and seals the enrollment payloads of steps 6 and 7.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Label mixed into the shared secret derivation.
const SHARED_SECRET_LABEL: &[u8] = b"greetingSharedSecretV1";

/// Size of the XChaCha20 nonce prefixed to ciphertexts.
pub const NONCE_SIZE: usize = 24;

/// Size of keys.
pub const KEY_SIZE: usize = 32;

/// X25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// X25519 private key.
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// Build from 32 random bytes (clamped internally).
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0).to_bytes())
    }

    /// Symmetric key shared with the owner of `peer`.
    ///
    /// Both sides obtain the same key regardless of who calls first.
    pub fn generate_shared_secret_key(&self, peer: &PublicKey) -> SecretKey {
        let shared = self.0.diffie_hellman(&x25519_dalek::PublicKey::from(peer.0));
        let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());

        let mut key = [0u8; KEY_SIZE];
        let Ok(()) = hkdf.expand(SHARED_SECRET_LABEL, &mut key) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };
        SecretKey(key)
    }
}

/// Symmetric key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl SecretKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// HMAC-SHA256 of `data` under this key.
    pub fn hmac(&self, data: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(&self.0) else {
            unreachable!("HMAC accepts keys of any length");
        };
        mac.update(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    /// Seal `plaintext`. Output is `nonce || ciphertext`.
    ///
    /// The nonce must never repeat under the same key; callers draw it from
    /// their environment RNG.
    pub fn encrypt(&self, nonce: [u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new(&self.0.into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open data produced by [`SecretKey::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::CiphertextTooShort(data.len()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

        let cipher = XChaCha20Poly1305::new(&self.0.into());
        cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::DecryptionFailed)
    }
}
