//! Keyed mutual exclusion.
//!
//! Operations serialise on the records they read-modify-write: an invitation
//! token, a greeting attempt, or a pending-uniqueness key. A guard may hold
//! several keys; they are taken all at once so two guards never wait on each
//! other half-acquired.
//!
//! Nested acquisitions follow one order: claimer key, then invitation, then
//! attempt.
//!
//! The table holds nothing but the set of held keys. A restarted process
//! starts with an empty table.

#![allow(clippy::disallowed_types, reason = "Short synchronous critical sections")]

use std::{
    collections::HashSet,
    sync::{Condvar, Mutex, PoisonError},
};

use greet_proto::{GreetingAttemptId, InvitationToken, OrganizationId};

use crate::storage::ClaimerKey;

/// Lockable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// An invitation's status and attempt set
    Invitation(OrganizationId, InvitationToken),
    /// One attempt's joins, cancellation and step logs
    Attempt(OrganizationId, GreetingAttemptId),
    /// Creation of a pending invitation for one claimer
    Claimer(OrganizationId, ClaimerKey),
}

/// Table of held keys.
#[derive(Default)]
pub struct LockTable {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl LockTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every key is free, then hold them all.
    ///
    /// Keys already held by the caller must not be requested again.
    pub fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> LockGuard<'_> {
        let mut wanted: Vec<LockKey> = keys.into_iter().collect();
        wanted.dedup();

        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while wanted.iter().any(|key| held.contains(key)) {
            held = self.released.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        held.extend(wanted.iter().cloned());

        LockGuard { table: self, keys: wanted }
    }

    /// Number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Keys held until drop.
#[must_use = "keys are released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    keys: Vec<LockKey>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.table.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.table.released.notify_all();
    }
}
