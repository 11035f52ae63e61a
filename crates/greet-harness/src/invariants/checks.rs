//! Checks over stored invitations, attempts and their step logs.
//!
//! Uniqueness checks look at the current records; finality checks walk each
//! record's history in the snapshot.

use std::collections::{HashMap, HashSet};

use greet_core::storage::StepRecord;
use greet_proto::InvitationStatus;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// At most one PENDING invitation per `(type, claimer)`.
pub struct PendingUniqueness;

impl Invariant for PendingUniqueness {
    fn name(&self) -> &'static str {
        "pending_uniqueness"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut seen = HashMap::new();
        for invitation in state.invitations.values() {
            if invitation.status != InvitationStatus::Pending {
                continue;
            }
            if let Some(other) = seen.insert(invitation.kind.claimer_key(), invitation.token) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "invitations {} and {} are both pending for {:?}",
                        other,
                        invitation.token,
                        invitation.kind.claimer_key()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Terminal invitations never change again.
///
/// Once CANCELLED or COMPLETED, every later version of the record is equal
/// to the first terminal one.
pub struct TerminalImmutability;

impl Invariant for TerminalImmutability {
    fn name(&self) -> &'static str {
        "terminal_immutability"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (token, history) in &state.invitation_history {
            let Some(first_terminal) = history.iter().position(|inv| inv.status.is_terminal()) else {
                continue;
            };
            if history.len() > first_terminal + 1 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "invitation {token} changed after reaching {:?}: now {:?}",
                        history[first_terminal].status,
                        history.last().map(|inv| inv.status)
                    ),
                });
            }
        }
        Ok(())
    }
}

/// At most one active attempt per `(invitation, greeter)`.
pub struct SingleActiveAttempt;

impl Invariant for SingleActiveAttempt {
    fn name(&self) -> &'static str {
        "single_active_attempt"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut active = HashSet::new();
        for attempt in state.attempts.values().filter(|a| a.is_active()) {
            if !active.insert((attempt.token, attempt.greeter)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "invitation {} has several active attempts for greeter {}",
                        attempt.token, attempt.greeter
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Every attempt belongs to a stored invitation.
pub struct AttemptsHaveInvitation;

impl Invariant for AttemptsHaveInvitation {
    fn name(&self) -> &'static str {
        "attempts_have_invitation"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for attempt in state.attempts.values() {
            if !state.invitations.contains_key(&attempt.token) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("attempt {} references unknown invitation {}", attempt.id, attempt.token),
                });
            }
        }
        Ok(())
    }
}

/// A cancellation, once recorded, is final and keeps its triple.
///
/// Step logs are frozen along with it.
pub struct CancellationIsFinal;

impl Invariant for CancellationIsFinal {
    fn name(&self) -> &'static str {
        "cancellation_is_final"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (id, history) in &state.attempt_history {
            let Some(first) = history.iter().position(|a| a.cancelled.is_some()) else {
                continue;
            };
            let cancelled = &history[first];
            for later in &history[first + 1..] {
                if later.cancelled != cancelled.cancelled
                    || later.greeter_steps != cancelled.greeter_steps
                    || later.claimer_steps != cancelled.claimer_steps
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "attempt {id} changed after cancellation {:?}: now {:?}",
                            cancelled.cancelled, later.cancelled
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Step logs only grow, and a submitted step never changes.
pub struct StepLogAppendOnly;

impl Invariant for StepLogAppendOnly {
    fn name(&self) -> &'static str {
        "step_log_append_only"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (id, history) in &state.attempt_history {
            for window in history.windows(2) {
                let (before, after) = (&window[0], &window[1]);
                for (side, old, new) in [
                    ("greeter", &before.greeter_steps, &after.greeter_steps),
                    ("claimer", &before.claimer_steps, &after.claimer_steps),
                ] {
                    if !is_prefix(old, new) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "attempt {id}: {side} steps rewritten ({} -> {} entries)",
                                old.len(),
                                new.len()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_prefix(old: &[StepRecord], new: &[StepRecord]) -> bool {
    new.len() >= old.len() && new[..old.len()] == *old
}

#[cfg(test)]
mod tests {
    use greet_core::storage::{InvitationKind, StoredAttempt, StoredInvitation};
    use greet_proto::{
        CancelledGreetingAttempt, CancelledGreetingAttemptReason, DateTime, GreeterOrClaimer, GreetingAttemptId,
        HumanHandle, InvitationCreatedBy, InvitationToken, UserId,
    };

    use super::*;

    fn invitation(token: u128, email: &str) -> StoredInvitation {
        StoredInvitation::pending(
            InvitationToken::from(token),
            DateTime::from_secs(1),
            InvitationCreatedBy::User {
                user_id: UserId::from(1u128),
                human_handle: HumanHandle::new("alice@example.com", "Alice"),
            },
            InvitationKind::User { claimer_email: email.to_string() },
        )
    }

    fn attempt(id: u128, token: u128) -> StoredAttempt {
        StoredAttempt::joined_by(
            GreetingAttemptId::from(id),
            InvitationToken::from(token),
            UserId::from(1u128),
            GreeterOrClaimer::Greeter,
            DateTime::from_secs(2),
        )
    }

    fn with_invitations(invitations: Vec<StoredInvitation>) -> SystemSnapshot {
        let mut state = SystemSnapshot::empty();
        for inv in invitations {
            state.invitation_history.entry(inv.token).or_default().push(inv.clone());
            state.invitations.insert(inv.token, inv);
        }
        state
    }

    #[test]
    fn two_pending_for_same_email_is_violation() {
        let state = with_invitations(vec![invitation(1, "bob@example.com"), invitation(2, "bob@example.com")]);
        assert!(PendingUniqueness.check(&state).is_err());

        let mut cancelled = invitation(2, "bob@example.com");
        cancelled.status = InvitationStatus::Cancelled;
        let state = with_invitations(vec![invitation(1, "bob@example.com"), cancelled]);
        assert!(PendingUniqueness.check(&state).is_ok());
    }

    #[test]
    fn reopened_invitation_is_violation() {
        let mut cancelled = invitation(1, "bob@example.com");
        cancelled.status = InvitationStatus::Cancelled;
        cancelled.cancelled_on = Some(DateTime::from_secs(3));

        let mut state = SystemSnapshot::empty();
        state.invitation_history.insert(
            InvitationToken::from(1u128),
            vec![invitation(1, "bob@example.com"), cancelled, invitation(1, "bob@example.com")],
        );
        assert!(TerminalImmutability.check(&state).is_err());
    }

    #[test]
    fn two_active_attempts_for_one_greeter_is_violation() {
        let mut state = with_invitations(vec![invitation(1, "bob@example.com")]);
        state.attempts.insert(GreetingAttemptId::from(10u128), attempt(10, 1));
        state.attempts.insert(GreetingAttemptId::from(11u128), attempt(11, 1));
        assert!(SingleActiveAttempt.check(&state).is_err());
        assert!(AttemptsHaveInvitation.check(&state).is_ok());

        state.attempts.insert(GreetingAttemptId::from(12u128), attempt(12, 99));
        assert!(AttemptsHaveInvitation.check(&state).is_err());
    }

    #[test]
    fn uncancelled_attempt_is_violation() {
        let mut cancelled = attempt(10, 1);
        cancelled.cancelled = Some(CancelledGreetingAttempt {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::ManuallyCancelled,
            timestamp: DateTime::from_secs(3),
        });

        let mut state = SystemSnapshot::empty();
        state.attempt_history.insert(GreetingAttemptId::from(10u128), vec![cancelled, attempt(10, 1)]);
        assert!(CancellationIsFinal.check(&state).is_err());
    }

    #[test]
    fn rewritten_step_is_violation() {
        let record = |payload: &[u8]| StepRecord { payload: payload.to_vec(), submitted_on: DateTime::from_secs(4) };
        let mut before = attempt(10, 1);
        before.greeter_steps.push(record(b"key"));
        let mut after = attempt(10, 1);
        after.greeter_steps.push(record(b"other key"));

        let mut state = SystemSnapshot::empty();
        state.attempt_history.insert(GreetingAttemptId::from(10u128), vec![before.clone(), after]);
        assert!(StepLogAppendOnly.check(&state).is_err());

        let mut grown = before.clone();
        grown.greeter_steps.push(record(b""));
        state.attempt_history.insert(GreetingAttemptId::from(10u128), vec![before, grown]);
        assert!(StepLogAppendOnly.check(&state).is_ok());
    }
}
