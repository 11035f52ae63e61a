//! Simulated environment: virtual clock and seeded RNG.
//!
//! Every call to `now()` moves the clock forward by one millisecond, so two
//! events recorded by the same run never share a timestamp. Tests move it
//! further with [`SimEnv::advance`].

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use greet_core::Environment;
use greet_proto::DateTime;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// 2000-01-01T00:00:00Z
const START_MICROS: i64 = 946_684_800_000_000;

/// Clock tick applied on every reading.
const TICK_MICROS: i64 = 1_000;

/// Deterministic environment for simulation.
///
/// Clones share the clock and the RNG, so a controller and the test driving
/// it observe the same time and consume the same random stream.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<AtomicI64>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a reproducible RNG stream.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: Arc::new(AtomicI64::new(START_MICROS)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        self.clock.fetch_add(micros, Ordering::SeqCst);
    }

    /// Current reading, without ticking.
    pub fn peek(&self) -> DateTime {
        DateTime::from_micros(self.clock.load(Ordering::SeqCst))
    }

    /// Independent RNG derived from the shared stream.
    ///
    /// Client-side code (nonces, SAS candidates) draws from it without
    /// holding the shared lock.
    pub fn fork_rng(&self) -> ChaCha20Rng {
        let mut seed = [0u8; 32];
        self.random_bytes(&mut seed);
        ChaCha20Rng::from_seed(seed)
    }
}

impl Environment for SimEnv {
    fn now(&self) -> DateTime {
        DateTime::from_micros(self.clock.fetch_add(TICK_MICROS, Ordering::SeqCst) + TICK_MICROS)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);
        assert_eq!(a.random_u128(), b.random_u128());
        assert_eq!(a.random_u128(), b.random_u128());

        let c = SimEnv::with_seed(43);
        assert_ne!(SimEnv::with_seed(42).random_u128(), c.random_u128());
    }

    #[test]
    fn clock_ticks_and_advances() {
        let env = SimEnv::new();
        let first = env.now();
        let second = env.now();
        assert!(second > first);

        env.advance(Duration::from_secs(60));
        let later = env.now();
        assert!(later.as_micros() - second.as_micros() >= 60_000_000);
        assert_eq!(env.peek(), later);
    }

    #[test]
    fn clones_share_state() {
        let env = SimEnv::with_seed(7);
        let clone = env.clone();
        let t = env.now();
        assert!(clone.now() > t);
        assert_ne!(env.random_u128(), clone.random_u128());
    }
}
