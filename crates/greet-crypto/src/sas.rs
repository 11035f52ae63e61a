//! Short Authentication Strings.
//!
//! Once nonces are revealed, each side computes two 4-symbol codes from the
//! shared secret and both nonces. The greeter human reads the claimer code to
//! the claimer human and vice versa; a man-in-the-middle would have to guess
//! a 20-bit value per direction.
//!
//! Derivation: `v` = first 5 bytes (big-endian) of
//! `HMAC-SHA256(shared_secret, claimer_nonce || greeter_nonce)`. The claimer
//! code encodes the low 20 bits of `v`, the greeter code the high 20 bits.

use std::{fmt, str::FromStr};

use rand::{Rng, RngCore};

use crate::{error::CryptoError, keys::SecretKey};

/// Symbols of a SAS code, without ambiguous characters (`I`, `O`, `0`, `1`).
pub const SAS_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in a SAS code.
pub const SAS_LEN: usize = 4;

/// Exclusive upper bound of the integer encoded by a SAS code.
pub const SAS_MAX: u32 = 1 << 20;

/// A 4-symbol short authentication string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SasCode(String);

impl SasCode {
    /// Encode a 20-bit value, least significant symbol first.
    pub fn from_int(value: u32) -> Result<Self, CryptoError> {
        if value >= SAS_MAX {
            return Err(CryptoError::SasOutOfRange(value));
        }
        Ok(Self::encode(value))
    }

    /// Encode the low 20 bits of `value`.
    fn encode(value: u32) -> Self {
        let mut num = value & (SAS_MAX - 1);
        let mut code = String::with_capacity(SAS_LEN);
        for _ in 0..SAS_LEN {
            code.push(char::from(SAS_ALPHABET[(num % 32) as usize]));
            num /= 32;
        }
        Self(code)
    }

    /// Code as displayed to humans.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compute `(claimer_sas, greeter_sas)`.
    pub fn generate_sas_codes(
        claimer_nonce: &[u8],
        greeter_nonce: &[u8],
        shared_secret_key: &SecretKey,
    ) -> (Self, Self) {
        let mut combined = Vec::with_capacity(claimer_nonce.len() + greeter_nonce.len());
        combined.extend_from_slice(claimer_nonce);
        combined.extend_from_slice(greeter_nonce);
        let hmac = shared_secret_key.hmac(&combined);

        let v = hmac[..5].iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let claimer = (v % u64::from(SAS_MAX)) as u32;
        let greeter = (v >> 20) as u32;

        (Self::encode(claimer), Self::encode(greeter))
    }

    /// Distinct codes in random order, `valid` always among them.
    ///
    /// Shown to a human who must pick the code read by the peer. `size` is
    /// clamped to `1..=SAS_MAX`: a request for zero codes still yields
    /// `valid` alone.
    pub fn generate_sas_code_candidates(valid: &Self, size: usize, rng: &mut impl RngCore) -> Vec<Self> {
        let size = size.clamp(1, SAS_MAX as usize);
        let mut candidates = Vec::with_capacity(size);
        candidates.push(valid.clone());
        while candidates.len() < size {
            let candidate = Self::encode(rng.next_u32());
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }

        let position = rng.gen_range(0..candidates.len());
        candidates.swap(0, position);
        candidates
    }
}

impl fmt::Display for SasCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SasCode {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == SAS_LEN && s.bytes().all(|b| SAS_ALPHABET.contains(&b));
        if valid { Ok(Self(s.to_string())) } else { Err(CryptoError::InvalidSasCode(s.to_string())) }
    }
}
