//! Point-in-time copy of one organization's invitations and attempts.
//!
//! Besides the current records, a snapshot remembers every distinct version
//! of each record seen since the first observation.

use std::collections::{BTreeMap, HashMap};

use greet_core::storage::{Storage, StorageError, StoredAttempt, StoredInvitation};
use greet_proto::{GreetingAttemptId, InvitationToken, OrganizationId};

/// Snapshot of one organization's invitation state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Invitations as currently stored.
    pub invitations: BTreeMap<InvitationToken, StoredInvitation>,
    /// Attempts as currently stored.
    pub attempts: BTreeMap<GreetingAttemptId, StoredAttempt>,
    /// Successive versions of each invitation, oldest first, current last.
    pub invitation_history: HashMap<InvitationToken, Vec<StoredInvitation>>,
    /// Successive versions of each attempt, oldest first, current last.
    pub attempt_history: HashMap<GreetingAttemptId, Vec<StoredAttempt>>,
}

impl SystemSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Refresh the current state from `storage`, appending changed records
    /// to their history.
    pub fn observe(&mut self, storage: &impl Storage, org: &OrganizationId) -> Result<(), StorageError> {
        self.invitations.clear();
        self.attempts.clear();

        for invitation in storage.list_invitations(org)? {
            for attempt in storage.list_attempts(org, invitation.token)? {
                push_changed(self.attempt_history.entry(attempt.id).or_default(), &attempt);
                self.attempts.insert(attempt.id, attempt);
            }
            push_changed(self.invitation_history.entry(invitation.token).or_default(), &invitation);
            self.invitations.insert(invitation.token, invitation);
        }
        Ok(())
    }

    /// Attempts of one invitation.
    pub fn attempts_of(&self, token: InvitationToken) -> impl Iterator<Item = &StoredAttempt> {
        self.attempts.values().filter(move |attempt| attempt.token == token)
    }
}

fn push_changed<T: Clone + PartialEq>(history: &mut Vec<T>, current: &T) {
    if history.last() != Some(current) {
        history.push(current.clone());
    }
}
