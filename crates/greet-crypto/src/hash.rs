//! Hash digest used for the claimer nonce commitment.

use sha2::{Digest, Sha256};

/// Size of a [`HashDigest`].
pub const HASH_DIGEST_SIZE: usize = 32;

/// SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashDigest([u8; HASH_DIGEST_SIZE]);

impl HashDigest {
    /// Digest of `data`.
    pub fn from_data(data: &[u8]) -> Self {
        let mut digest = [0u8; HASH_DIGEST_SIZE];
        digest.copy_from_slice(&Sha256::digest(data));
        Self(digest)
    }

    /// Wrap a precomputed digest.
    pub const fn from_bytes(bytes: [u8; HASH_DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_DIGEST_SIZE] {
        &self.0
    }

    /// Whether `data` hashes to this digest.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::from_data(data) == *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // SHA-256("abc")
        let digest = HashDigest::from_data(b"abc");
        assert_eq!(digest.as_bytes()[..4], [0xba, 0x78, 0x16, 0xbf]);
        assert!(digest.matches(b"abc"));
        assert!(!digest.matches(b"abd"));
    }
}
