//! Environment abstraction for deterministic testing.
//!
//! Decouples invitation logic from system resources (time, randomness). The
//! simulation harness plugs a virtual clock and a seeded RNG; the server plugs
//! the system clock and the OS RNG.

use greet_proto::DateTime;

/// Abstract environment providing time and randomness.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    ///
    /// Recorded on invitations, attempts and step submissions, so it must be
    /// comparable across restarts.
    fn now(&self) -> DateTime;

    /// Fills the provided buffer with random bytes.
    ///
    /// Given the same seed, simulation environments produce the same sequence.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u128`.
    ///
    /// Used for invitation tokens and greeting attempt identifiers.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}
