//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling and
//! recovery. A failed commit never reaches the inner storage, so the wrapped
//! state stays consistent and can be checked after the run.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use greet_proto::{GreetingAttemptId, InvitationToken, OrganizationId};

use super::{Storage, StorageError, StorageWrite, StoredAttempt, StoredInvitation};

/// Seed used by [`ChaoticStorage::new`].
const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but randomly fails
/// operations based on a configured failure rate. Failures are
/// `StorageError::Io`, the transient kind.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
}

/// Linear congruential generator, reproducible from its seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    #[allow(clippy::cast_precision_loss)]
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// `failure_rate` is clamped to [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, DEFAULT_SEED)
    }

    /// Create with explicit seed for reproducible chaos
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    fn inject(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        let fail = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_fail(self.failure_rate);
        if fail { Err(StorageError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn load_invitation(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Option<StoredInvitation>, StorageError> {
        self.inject()?;
        self.inner.load_invitation(org, token)
    }

    fn list_invitations(&self, org: &OrganizationId) -> Result<Vec<StoredInvitation>, StorageError> {
        self.inject()?;
        self.inner.list_invitations(org)
    }

    fn load_attempt(
        &self,
        org: &OrganizationId,
        id: GreetingAttemptId,
    ) -> Result<Option<StoredAttempt>, StorageError> {
        self.inject()?;
        self.inner.load_attempt(org, id)
    }

    fn list_attempts(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Vec<StoredAttempt>, StorageError> {
        self.inject()?;
        self.inner.list_attempts(org, token)
    }

    fn commit(&self, org: &OrganizationId, writes: &[StorageWrite]) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.commit(org, writes)
    }
}
