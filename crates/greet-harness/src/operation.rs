//! Operations for model-based testing.
//!
//! Operations are generated randomly by proptest (or decoded from fuzzer
//! bytes through [`Arbitrary`]) and applied to a [`SimWorld`] by an
//! [`OperationDriver`]. The driver keeps a reference model of invitation
//! statuses and compares it with what the server stores after each
//! operation; the world checks the standard invariants on its own.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use arbitrary::Arbitrary;
use greet_proto::{
    CancelledGreetingAttemptReason, InvitationStatus, InvitationToken,
    cmds::authenticated::{InviteCancelRep, InviteCompleteRep},
};

use crate::{Ceremony, HarnessError, SimUser, SimWorld};

/// User index, reduced modulo the number of users.
pub type UserIndex = u8;

/// Invitation index, reduced modulo the number of created invitations.
pub type InvitationIndex = u8;

/// Actions a simulated organization can take.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Invite a new user. Only a few distinct emails exist so that
    /// invitations collide.
    InviteUser {
        /// Author of the invitation.
        author: UserIndex,
        /// Email selector (0-3).
        email: u8,
    },

    /// Invite a new device for the author.
    InviteDevice {
        /// Author of the invitation.
        author: UserIndex,
    },

    /// Cancel an invitation.
    Cancel {
        /// Author of the cancellation.
        author: UserIndex,
        /// Target invitation.
        invitation: InvitationIndex,
    },

    /// Complete an invitation.
    Complete {
        /// Author of the completion.
        author: UserIndex,
        /// Target invitation.
        invitation: InvitationIndex,
    },

    /// Advance the ceremony between one greeter and the invitation's
    /// claimer by one step, starting it if needed.
    AdvanceCeremony {
        /// Greeter.
        greeter: UserIndex,
        /// Target invitation.
        invitation: InvitationIndex,
    },

    /// Restart a ceremony from step 0, superseding the current attempt.
    RestartCeremony {
        /// Greeter.
        greeter: UserIndex,
        /// Target invitation.
        invitation: InvitationIndex,
    },

    /// Cancel the ongoing attempt from one side.
    CancelAttempt {
        /// Greeter of the attempt.
        greeter: UserIndex,
        /// Target invitation.
        invitation: InvitationIndex,
        /// Cancel from the claimer side instead of the greeter side.
        by_claimer: bool,
    },

    /// Advance simulation time.
    AdvanceTime {
        /// Seconds to advance.
        secs: u16,
    },
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The server accepted the operation.
    Applied,
    /// The server refused the operation, or it targeted nothing.
    Refused,
}

/// Applies [`Operation`]s to a [`SimWorld`] and tracks a reference model.
pub struct OperationDriver {
    world: SimWorld,
    users: Vec<SimUser>,
    invitations: Vec<InvitationToken>,
    ceremonies: HashMap<(InvitationToken, usize), Ceremony>,
    model: BTreeMap<InvitationToken, InvitationStatus>,
}

impl OperationDriver {
    /// Driver over a fresh world with one admin and two standard users.
    pub fn new(seed: u64) -> Result<Self, HarnessError> {
        let world = SimWorld::new(seed)?;
        let users = vec![
            world.add_admin("alice@example.com", "Alice"),
            world.add_user("bob@example.com", "Bob", greet_core::directory::UserProfile::Standard),
            world.add_user("carol@example.com", "Carol", greet_core::directory::UserProfile::Standard),
        ];
        Ok(Self { world, users, invitations: Vec::new(), ceremonies: HashMap::new(), model: BTreeMap::new() })
    }

    /// Underlying world.
    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    /// Tokens created so far, in creation order.
    pub fn invitations(&self) -> &[InvitationToken] {
        &self.invitations
    }

    /// Apply one operation.
    ///
    /// Refusals by the server are part of normal operation and reported as
    /// [`OperationOutcome::Refused`]. Invariant violations, storage failures
    /// and a diverging model are errors.
    pub fn apply(&mut self, op: &Operation) -> Result<OperationOutcome, HarnessError> {
        let outcome = match *op {
            Operation::InviteUser { author, email } => {
                let author = self.user(author).clone();
                let email = format!("claimer{}@example.com", email % 4);
                let result = self.world.invite_user(&author, &email, false);
                self.record_creation(result)?
            },
            Operation::InviteDevice { author } => {
                let author = self.user(author).clone();
                let result = self.world.invite_device(&author, false);
                self.record_creation(result)?
            },
            Operation::Cancel { author, invitation } => {
                let Some(token) = self.invitation(invitation) else {
                    return Ok(OperationOutcome::Refused);
                };
                let author = self.user(author).clone();
                match refused_on_rejection(self.world.cancel(&author, token))? {
                    Some(InviteCancelRep::Ok) => {
                        self.model.insert(token, InvitationStatus::Cancelled);
                        OperationOutcome::Applied
                    },
                    _ => OperationOutcome::Refused,
                }
            },
            Operation::Complete { author, invitation } => {
                let Some(token) = self.invitation(invitation) else {
                    return Ok(OperationOutcome::Refused);
                };
                let author = self.user(author).clone();
                match refused_on_rejection(self.world.complete(&author, token))? {
                    Some(InviteCompleteRep::Ok) => {
                        self.model.insert(token, InvitationStatus::Completed);
                        OperationOutcome::Applied
                    },
                    _ => OperationOutcome::Refused,
                }
            },
            Operation::AdvanceCeremony { greeter, invitation } => self.advance(greeter, invitation, false)?,
            Operation::RestartCeremony { greeter, invitation } => self.advance(greeter, invitation, true)?,
            Operation::CancelAttempt { greeter, invitation, by_claimer } => {
                self.cancel_attempt(greeter, invitation, by_claimer)?
            },
            Operation::AdvanceTime { secs } => {
                self.world.env().advance(Duration::from_secs(u64::from(secs)));
                OperationOutcome::Applied
            },
        };

        self.check_model()?;
        Ok(outcome)
    }

    /// Compare the model's invitation statuses with storage.
    pub fn check_model(&self) -> Result<(), HarnessError> {
        let stored = &self.world.snapshot().invitations;
        for (token, expected) in &self.model {
            let actual = stored.get(token).map(|inv| inv.status);
            if actual != Some(*expected) {
                return Err(HarnessError::unexpected("model status", &(token, expected, actual)));
            }
        }
        if stored.len() != self.model.len() {
            return Err(HarnessError::unexpected("model invitation count", &(self.model.len(), stored.len())));
        }
        Ok(())
    }

    fn user(&self, index: UserIndex) -> &SimUser {
        &self.users[usize::from(index) % self.users.len()]
    }

    fn invitation(&self, index: InvitationIndex) -> Option<InvitationToken> {
        if self.invitations.is_empty() {
            return None;
        }
        Some(self.invitations[usize::from(index) % self.invitations.len()])
    }

    fn record_creation(
        &mut self,
        result: Result<crate::Created, HarnessError>,
    ) -> Result<OperationOutcome, HarnessError> {
        let Some(created) = refused_on_rejection(result)? else {
            return Ok(OperationOutcome::Refused);
        };
        if !self.invitations.contains(&created.token) {
            self.invitations.push(created.token);
        }
        self.model.insert(created.token, InvitationStatus::Pending);
        Ok(OperationOutcome::Applied)
    }

    fn advance(
        &mut self,
        greeter: UserIndex,
        invitation: InvitationIndex,
        restart: bool,
    ) -> Result<OperationOutcome, HarnessError> {
        let Some(token) = self.invitation(invitation) else {
            return Ok(OperationOutcome::Refused);
        };
        let greeter_index = usize::from(greeter) % self.users.len();
        let key = (token, greeter_index);

        if restart {
            self.ceremonies.remove(&key);
        }
        let mut ceremony = match self.ceremonies.remove(&key) {
            Some(ceremony) => ceremony,
            None => Ceremony::new(&self.world, &self.users[greeter_index], token),
        };

        let step = if ceremony.attempt().is_none() {
            ceremony.start(&mut self.world).map(|_| ())
        } else if ceremony.next_index() > greet_proto::LAST_STEP_INDEX {
            self.ceremonies.insert(key, ceremony);
            return Ok(OperationOutcome::Refused);
        } else {
            ceremony.exchange(&mut self.world)
        };

        match refused_on_rejection(step)? {
            Some(()) => {
                self.ceremonies.insert(key, ceremony);
                Ok(OperationOutcome::Applied)
            },
            None => Ok(OperationOutcome::Refused),
        }
    }

    fn cancel_attempt(
        &mut self,
        greeter: UserIndex,
        invitation: InvitationIndex,
        by_claimer: bool,
    ) -> Result<OperationOutcome, HarnessError> {
        let Some(token) = self.invitation(invitation) else {
            return Ok(OperationOutcome::Refused);
        };
        let greeter_index = usize::from(greeter) % self.users.len();
        let Some(attempt) = self.ceremonies.remove(&(token, greeter_index)).and_then(|c| c.attempt()) else {
            return Ok(OperationOutcome::Refused);
        };

        let reason = CancelledGreetingAttemptReason::ManuallyCancelled;
        let applied = if by_claimer {
            let rep = refused_on_rejection(self.world.claimer_cancel(token, attempt, reason))?;
            matches!(rep, Some(greet_proto::cmds::invited::InviteClaimerCancelGreetingAttemptRep::Ok))
        } else {
            let greeter = self.users[greeter_index].clone();
            let rep = refused_on_rejection(self.world.greeter_cancel(&greeter, attempt, reason))?;
            matches!(rep, Some(greet_proto::cmds::authenticated::InviteGreeterCancelGreetingAttemptRep::Ok))
        };
        Ok(if applied { OperationOutcome::Applied } else { OperationOutcome::Refused })
    }
}

/// `None` when the server refused, `Err` when the harness itself failed.
fn refused_on_rejection<T>(result: Result<T, HarnessError>) -> Result<Option<T>, HarnessError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(
            HarnessError::Rejected(_)
            | HarnessError::Unexpected { .. }
            | HarnessError::SasMismatch
            | HarnessError::NonceMismatch,
        ) => Ok(None),
        Err(error) => Err(error),
    }
}
