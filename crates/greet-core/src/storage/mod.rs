//! Storage abstraction for invitations and greeting attempts.
//!
//! The trait is synchronous and batch-oriented: every public operation reads
//! what it needs, then hands all of its writes to a single [`Storage::commit`]
//! call that the backend applies atomically. A crash therefore never leaves a
//! half-applied operation behind.

mod chaotic;
mod error;
mod memory;

use std::collections::HashMap;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
use greet_proto::{
    CancelledGreetingAttempt, DateTime, GreeterOrClaimer, GreetingAttemptId, InvitationCreatedBy,
    InvitationStatus, InvitationToken, InvitationType, OrganizationId, STEP_COUNT, UserId,
};
pub use memory::MemoryStorage;
use serde::{Deserialize, Serialize};

/// Type-specific part of an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationKind {
    /// New user, identified by the email it was invited with
    User {
        /// Email of the future user
        claimer_email: String,
    },
    /// New device for an existing user
    Device {
        /// User the device will belong to
        claimer_user_id: UserId,
    },
    /// Recovery of an existing user
    ShamirRecovery {
        /// User being recovered
        claimer_user_id: UserId,
        /// Identifies the shamir setup the invitation is bound to
        shamir_recovery_created_on: DateTime,
    },
}

impl InvitationKind {
    /// Wire invitation type.
    pub const fn invitation_type(&self) -> InvitationType {
        match self {
            Self::User { .. } => InvitationType::User,
            Self::Device { .. } => InvitationType::Device,
            Self::ShamirRecovery { .. } => InvitationType::ShamirRecovery,
        }
    }

    /// Key under which at most one invitation may be pending.
    pub fn claimer_key(&self) -> ClaimerKey {
        match self {
            Self::User { claimer_email } => ClaimerKey::Email(claimer_email.clone()),
            Self::Device { claimer_user_id } => ClaimerKey::Device(*claimer_user_id),
            Self::ShamirRecovery { claimer_user_id, .. } => ClaimerKey::Shamir(*claimer_user_id),
        }
    }

    /// Existing user targeted by the invitation (DEVICE and SHAMIR_RECOVERY).
    pub const fn claimer_user_id(&self) -> Option<UserId> {
        match self {
            Self::User { .. } => None,
            Self::Device { claimer_user_id } | Self::ShamirRecovery { claimer_user_id, .. } => {
                Some(*claimer_user_id)
            },
        }
    }
}

/// `(type, claimer identity)` part of the pending uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClaimerKey {
    /// USER invitation for this email
    Email(String),
    /// DEVICE invitation for this user
    Device(UserId),
    /// SHAMIR_RECOVERY invitation for this user
    Shamir(UserId),
}

/// Persisted invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInvitation {
    /// Capability token
    pub token: InvitationToken,
    /// Creation time
    pub created_on: DateTime,
    /// Creator
    pub created_by: InvitationCreatedBy,
    /// Type-specific data
    pub kind: InvitationKind,
    /// Lifecycle status
    pub status: InvitationStatus,
    /// Set when status became CANCELLED
    pub cancelled_on: Option<DateTime>,
    /// Set when status became COMPLETED
    pub completed_on: Option<DateTime>,
    /// Attempt whose exchange led to completion, if any
    pub completed_by_attempt: Option<GreetingAttemptId>,
}

impl StoredInvitation {
    /// Fresh pending invitation.
    pub fn pending(
        token: InvitationToken,
        created_on: DateTime,
        created_by: InvitationCreatedBy,
        kind: InvitationKind,
    ) -> Self {
        Self {
            token,
            created_on,
            created_by,
            kind,
            status: InvitationStatus::Pending,
            cancelled_on: None,
            completed_on: None,
            completed_by_attempt: None,
        }
    }

    /// Wire invitation type.
    pub const fn invitation_type(&self) -> InvitationType {
        self.kind.invitation_type()
    }

    /// Check that `next` is a legal successor of `self`.
    ///
    /// Terminal invitations are immutable and status only moves forward.
    /// Backends call this on every overwrite.
    pub fn check_overwrite(&self, next: &Self) -> Result<(), StorageError> {
        if self.status.is_terminal() && self != next {
            return Err(StorageError::Conflict {
                key: self.token.hex(),
                reason: format!("invitation is {:?} and immutable", self.status),
            });
        }
        if self.kind != next.kind || self.created_by != next.created_by {
            return Err(StorageError::Conflict {
                key: self.token.hex(),
                reason: "invitation identity changed".to_string(),
            });
        }
        Ok(())
    }
}

/// One submitted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Raw payload bytes, relayed untouched to the peer
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Submission time
    pub submitted_on: DateTime,
}

/// Persisted greeting attempt, step logs included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttempt {
    /// Attempt identifier
    pub id: GreetingAttemptId,
    /// Parent invitation
    pub token: InvitationToken,
    /// Greeter paired on this attempt
    pub greeter: UserId,
    /// Creation time
    pub created_on: DateTime,
    /// When the greeter joined
    pub greeter_joined: Option<DateTime>,
    /// When the claimer joined
    pub claimer_joined: Option<DateTime>,
    /// Final cancellation record
    pub cancelled: Option<CancelledGreetingAttempt>,
    /// Set when the parent invitation completed through this attempt
    pub completed_on: Option<DateTime>,
    /// Greeter submissions, index = step
    pub greeter_steps: Vec<StepRecord>,
    /// Claimer submissions, index = step
    pub claimer_steps: Vec<StepRecord>,
}

impl StoredAttempt {
    /// New attempt joined by `side` at `now`.
    pub fn joined_by(
        id: GreetingAttemptId,
        token: InvitationToken,
        greeter: UserId,
        side: GreeterOrClaimer,
        now: DateTime,
    ) -> Self {
        let mut attempt = Self {
            id,
            token,
            greeter,
            created_on: now,
            greeter_joined: None,
            claimer_joined: None,
            cancelled: None,
            completed_on: None,
            greeter_steps: Vec::new(),
            claimer_steps: Vec::new(),
        };
        attempt.join(side, now);
        attempt
    }

    /// Join time of `side`.
    pub const fn joined(&self, side: GreeterOrClaimer) -> Option<DateTime> {
        match side {
            GreeterOrClaimer::Greeter => self.greeter_joined,
            GreeterOrClaimer::Claimer => self.claimer_joined,
        }
    }

    /// Record `side` joining.
    pub fn join(&mut self, side: GreeterOrClaimer, now: DateTime) {
        match side {
            GreeterOrClaimer::Greeter => self.greeter_joined = Some(now),
            GreeterOrClaimer::Claimer => self.claimer_joined = Some(now),
        }
    }

    /// Step log of `side`.
    pub fn steps(&self, side: GreeterOrClaimer) -> &[StepRecord] {
        match side {
            GreeterOrClaimer::Greeter => &self.greeter_steps,
            GreeterOrClaimer::Claimer => &self.claimer_steps,
        }
    }

    /// Mutable step log of `side`.
    pub fn steps_mut(&mut self, side: GreeterOrClaimer) -> &mut Vec<StepRecord> {
        match side {
            GreeterOrClaimer::Greeter => &mut self.greeter_steps,
            GreeterOrClaimer::Claimer => &mut self.claimer_steps,
        }
    }

    /// Both sides exchanged the last step.
    pub fn is_finished(&self) -> bool {
        self.greeter_steps.len() == STEP_COUNT && self.claimer_steps.len() == STEP_COUNT
    }

    /// Neither cancelled, completed nor finished.
    pub fn is_active(&self) -> bool {
        self.cancelled.is_none() && self.completed_on.is_none() && !self.is_finished()
    }
}

/// One write of a batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageWrite {
    /// Insert or overwrite an invitation
    Invitation(StoredInvitation),
    /// Insert or overwrite an attempt
    Attempt(StoredAttempt),
}

/// Validate a batch before any of it is applied.
///
/// `load` reads the stored invitation for a token; later writes in the same
/// batch are checked against earlier ones. Shared by every backend so they
/// reject exactly the same batches.
pub fn validate_batch(
    writes: &[StorageWrite],
    mut load: impl FnMut(InvitationToken) -> Result<Option<StoredInvitation>, StorageError>,
) -> Result<(), StorageError> {
    let mut staged: HashMap<InvitationToken, &StoredInvitation> = HashMap::new();

    for write in writes {
        match write {
            StorageWrite::Invitation(next) => {
                let current = match staged.get(&next.token) {
                    Some(staged) => Some((*staged).clone()),
                    None => load(next.token)?,
                };
                if let Some(current) = current {
                    current.check_overwrite(next)?;
                }
                staged.insert(next.token, next);
            },
            StorageWrite::Attempt(attempt) => {
                if !staged.contains_key(&attempt.token) && load(attempt.token)?.is_none() {
                    return Err(StorageError::NotFound {
                        what: "invitation",
                        key: attempt.token.hex(),
                    });
                }
            },
        }
    }
    Ok(())
}

/// Storage abstraction for invitations and greeting attempts
///
/// Must be Clone (shared by every request handler), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations share
/// internal state via Arc, so clones access the same underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Load an invitation. `None` if unknown.
    fn load_invitation(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Option<StoredInvitation>, StorageError>;

    /// All invitations of an organization, any status, in no particular order.
    fn list_invitations(&self, org: &OrganizationId) -> Result<Vec<StoredInvitation>, StorageError>;

    /// Load an attempt. `None` if unknown.
    fn load_attempt(
        &self,
        org: &OrganizationId,
        id: GreetingAttemptId,
    ) -> Result<Option<StoredAttempt>, StorageError>;

    /// All attempts of an invitation, any state, in no particular order.
    fn list_attempts(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Vec<StoredAttempt>, StorageError>;

    /// Apply all `writes` atomically.
    ///
    /// # Invariants
    ///
    /// - Either every write is visible afterwards, or none is
    /// - Overwrites of invitations pass [`StoredInvitation::check_overwrite`]
    /// - Attempts reference an invitation that exists once the batch applies
    fn commit(&self, org: &OrganizationId, writes: &[StorageWrite]) -> Result<(), StorageError>;
}
