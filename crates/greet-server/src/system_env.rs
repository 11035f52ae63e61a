//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` reads the wall clock and the OS cryptographic RNG. Production
//! behavior is therefore non-deterministic, which is what invitation tokens
//! and attempt identifiers need.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use greet_core::Environment;
use greet_proto::DateTime;

/// Production environment using system time and cryptographic RNG.
///
/// # Security
///
/// Invitation tokens are bearer capabilities, so they come from getrandom
/// (e.g. /dev/urandom on Linux, `BCryptGenRandom` on Windows).
///
/// # Panics
///
/// Panics if the OS RNG fails. A server that cannot mint unguessable tokens
/// must not keep issuing invitations.
#[derive(Clone, Default)]
pub struct SystemEnv {
    /// Last reading handed out, so `now()` never goes backwards when the
    /// system clock is stepped back
    last_micros: Arc<AtomicI64>,
}

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn now(&self) -> DateTime {
        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_micros() as i64;

        let previous = self.last_micros.fetch_max(micros, Ordering::SeqCst);
        DateTime::from_micros(previous.max(micros))
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable - cannot mint tokens");
    }
}
