#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use greet_proto::{GreetingAttemptId, InvitationToken, OrganizationId};

use super::{Storage, StorageError, StorageWrite, StoredAttempt, StoredInvitation, validate_batch};

/// In-memory storage implementation for testing and simulation
///
/// `BTreeMap`s keyed by `(organization, id)` so per-organization scans are
/// range queries. All state sits behind one `Arc<Mutex<>>`; a batch commit
/// holds the lock for validation and application, which makes it atomic.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    invitations: BTreeMap<(OrganizationId, InvitationToken), StoredInvitation>,
    attempts: BTreeMap<(OrganizationId, GreetingAttemptId), StoredAttempt>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Total number of invitations across all organizations.
    pub fn invitation_count(&self) -> usize {
        self.lock().invitations.len()
    }

    /// Total number of attempts across all organizations.
    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    /// A panicking writer never leaves a partially applied batch (application
    /// happens after validation and cannot fail), so poisoning is recoverable.
    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn load_invitation(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Option<StoredInvitation>, StorageError> {
        Ok(self.lock().invitations.get(&(org.clone(), token)).cloned())
    }

    fn list_invitations(&self, org: &OrganizationId) -> Result<Vec<StoredInvitation>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .invitations
            .iter()
            .filter(|((key_org, _), _)| key_org == org)
            .map(|(_, invitation)| invitation.clone())
            .collect())
    }

    fn load_attempt(
        &self,
        org: &OrganizationId,
        id: GreetingAttemptId,
    ) -> Result<Option<StoredAttempt>, StorageError> {
        Ok(self.lock().attempts.get(&(org.clone(), id)).cloned())
    }

    fn list_attempts(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Vec<StoredAttempt>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .attempts
            .iter()
            .filter(|((key_org, _), attempt)| key_org == org && attempt.token == token)
            .map(|(_, attempt)| attempt.clone())
            .collect())
    }

    fn commit(&self, org: &OrganizationId, writes: &[StorageWrite]) -> Result<(), StorageError> {
        let mut inner = self.lock();

        validate_batch(writes, |token| Ok(inner.invitations.get(&(org.clone(), token)).cloned()))?;

        for write in writes {
            match write {
                StorageWrite::Invitation(invitation) => {
                    inner.invitations.insert((org.clone(), invitation.token), invitation.clone());
                },
                StorageWrite::Attempt(attempt) => {
                    inner.attempts.insert((org.clone(), attempt.id), attempt.clone());
                },
            }
        }

        Ok(())
    }
}
