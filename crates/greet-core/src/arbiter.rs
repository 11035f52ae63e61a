//! Greeting attempt arbiter.
//!
//! Pairs one greeter with the claimer of an invitation. For a given
//! invitation and greeter there is at most one active attempt; starting
//! again either rejoins it or supersedes it.
//!
//! Start rules, from the point of view of the calling side:
//!
//! - No active attempt: create one, joined by the caller
//! - Active attempt the caller never joined: join it
//! - Active attempt both sides joined: return it unchanged
//! - Active attempt only the caller joined: the caller lost it (crash,
//!   restart), so cancel it as `AUTOMATICALLY_CANCELLED` and create a fresh one
//!
//! A claimer starting with a greeter also cancels, as `START_MISMATCH`, every
//! active attempt it joined with another greeter.

use greet_proto::{
    CancelledGreetingAttempt, CancelledGreetingAttemptReason, DateTime, GreeterOrClaimer, GreetingAttemptId,
    InvitationStatus, InvitationToken, OrganizationId, UserId,
};

use crate::{
    access::{AttemptDenied, AuthorContext, Backend, InvitedContext},
    directory::CertificateStore,
    env::Environment,
    error::{CancelAttemptError, ClaimerStartError, ContextError, GreeterStartError},
    storage::{Storage, StorageWrite, StoredAttempt, StoredInvitation},
};

/// Creates, joins and cancels greeting attempts.
#[derive(Clone)]
pub struct GreetingArbiter<E, S, D> {
    backend: Backend<E, S, D>,
}

impl<E, S, D> GreetingArbiter<E, S, D>
where
    E: Environment,
    S: Storage,
    D: CertificateStore,
{
    /// Arbiter over a shared backend.
    pub fn new(backend: Backend<E, S, D>) -> Self {
        Self { backend }
    }

    /// Start or rejoin an attempt as the greeter.
    pub fn greeter_start(
        &self,
        author: &AuthorContext,
        token: InvitationToken,
    ) -> Result<GreetingAttemptId, GreeterStartError> {
        let org = &author.organization_id;
        let locked = self.backend.lock_invitation(org, token)?;

        let invitation = locked.invitation.as_ref().ok_or(GreeterStartError::InvitationNotFound)?;
        match invitation.status {
            InvitationStatus::Completed => return Err(GreeterStartError::InvitationCompleted),
            InvitationStatus::Cancelled => return Err(GreeterStartError::InvitationCancelled),
            InvitationStatus::Pending => {},
        }
        if self.backend.shamir_setup_deleted(org, invitation)? {
            return Err(GreeterStartError::InvitationCancelled);
        }
        if !self.backend.greeter_allowed(org, invitation, &author.user)? {
            return Err(GreeterStartError::AuthorNotAllowed);
        }

        let now = self.backend.env.now();
        let (attempt_id, writes) =
            self.join_or_supersede(&locked.attempts, token, author.user.user_id, GreeterOrClaimer::Greeter, now);
        self.commit(org, &writes)?;

        Ok(attempt_id)
    }

    /// Start or rejoin an attempt as the claimer, with the chosen greeter.
    pub fn claimer_start(
        &self,
        invited: &InvitedContext,
        greeter: UserId,
    ) -> Result<GreetingAttemptId, ClaimerStartError> {
        let org = &invited.organization_id;
        let token = invited.invitation.token;

        let greeter_user = self.backend.directory.user(org, greeter)?.ok_or(ClaimerStartError::GreeterNotFound)?;
        if !greeter_user.is_active() {
            return Err(ClaimerStartError::GreeterRevoked);
        }

        let locked = self.backend.lock_invitation(org, token)?;
        let invitation = locked
            .invitation
            .as_ref()
            .filter(|invitation| invitation.status == InvitationStatus::Pending)
            .ok_or(ContextError::InvitationDeleted)?;
        if self.backend.shamir_setup_deleted(org, invitation)? {
            return Err(ContextError::InvitationDeleted.into());
        }
        if !self.backend.greeter_allowed(org, invitation, &greeter_user)? {
            return Err(ClaimerStartError::GreeterNotAllowed);
        }

        let now = self.backend.env.now();
        let mut writes: Vec<StorageWrite> = locked
            .attempts
            .iter()
            .filter(|a| a.greeter != greeter && a.is_active() && a.claimer_joined.is_some())
            .map(|a| {
                let mut mismatched = a.clone();
                cancel(&mut mismatched, GreeterOrClaimer::Claimer, CancelledGreetingAttemptReason::StartMismatch, now);
                StorageWrite::Attempt(mismatched)
            })
            .collect();

        let (attempt_id, joins) =
            self.join_or_supersede(&locked.attempts, token, greeter, GreeterOrClaimer::Claimer, now);
        writes.extend(joins);
        self.commit(org, &writes)?;

        Ok(attempt_id)
    }

    /// Cancel an attempt as its greeter.
    pub fn greeter_cancel(
        &self,
        author: &AuthorContext,
        attempt_id: GreetingAttemptId,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<(), CancelAttemptError> {
        self.cancel_as(&author.organization_id, attempt_id, GreeterOrClaimer::Greeter, reason, |attempt, invitation| {
            self.backend.check_greeter_access(author, attempt, invitation)
        })
    }

    /// Cancel an attempt as the claimer.
    pub fn claimer_cancel(
        &self,
        invited: &InvitedContext,
        attempt_id: GreetingAttemptId,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<(), CancelAttemptError> {
        self.cancel_as(&invited.organization_id, attempt_id, GreeterOrClaimer::Claimer, reason, |attempt, invitation| {
            self.backend.check_claimer_access(invited, attempt, invitation)
        })
    }

    fn cancel_as(
        &self,
        org: &OrganizationId,
        attempt_id: GreetingAttemptId,
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        check: impl FnOnce(&StoredAttempt, &StoredInvitation) -> Result<(), AttemptDenied>,
    ) -> Result<(), CancelAttemptError> {
        let _guard = self.backend.lock_attempt(org, attempt_id);

        let (mut attempt, invitation) = self.backend.load_attempt(org, attempt_id)?;
        check(&attempt, &invitation)?;

        if let Some(cancelled) = attempt.cancelled {
            return Err(CancelAttemptError::GreetingAttemptAlreadyCancelled(cancelled));
        }
        if attempt.joined(origin).is_none() {
            return Err(CancelAttemptError::GreetingAttemptNotJoined);
        }

        cancel(&mut attempt, origin, reason, self.backend.env.now());
        self.commit(org, &[StorageWrite::Attempt(attempt)])?;
        Ok(())
    }

    /// Writes that make `side` join an active attempt of `(token, greeter)`.
    fn join_or_supersede(
        &self,
        attempts: &[StoredAttempt],
        token: InvitationToken,
        greeter: UserId,
        side: GreeterOrClaimer,
        now: DateTime,
    ) -> (GreetingAttemptId, Vec<StorageWrite>) {
        let active = attempts.iter().find(|a| a.greeter == greeter && a.is_active());

        let mut writes = Vec::new();
        match active {
            Some(attempt) if attempt.joined(side).is_none() => {
                let mut joined = attempt.clone();
                joined.join(side, now);
                writes.push(StorageWrite::Attempt(joined));
                return (attempt.id, writes);
            },
            Some(attempt) if attempt.joined(side.peer()).is_some() => return (attempt.id, writes),
            Some(attempt) => {
                let mut stale = attempt.clone();
                cancel(&mut stale, side, CancelledGreetingAttemptReason::AutomaticallyCancelled, now);
                writes.push(StorageWrite::Attempt(stale));
            },
            None => {},
        }

        let id = GreetingAttemptId::from(self.backend.env.random_u128());
        writes.push(StorageWrite::Attempt(StoredAttempt::joined_by(id, token, greeter, side, now)));
        (id, writes)
    }

    fn commit(&self, org: &OrganizationId, writes: &[StorageWrite]) -> Result<(), ContextError> {
        if writes.is_empty() {
            return Ok(());
        }
        self.backend.storage.commit(org, writes)?;

        for write in writes {
            let StorageWrite::Attempt(attempt) = write else { continue };
            match attempt.cancelled {
                Some(cancelled) => tracing::info!(
                    organization_id = %org,
                    token = %attempt.token,
                    attempt_id = %attempt.id,
                    origin = %cancelled.origin,
                    reason = %cancelled.reason,
                    "greeting attempt cancelled"
                ),
                None => tracing::info!(
                    organization_id = %org,
                    token = %attempt.token,
                    attempt_id = %attempt.id,
                    greeter = %attempt.greeter,
                    greeter_joined = attempt.greeter_joined.is_some(),
                    claimer_joined = attempt.claimer_joined.is_some(),
                    "greeting attempt joined"
                ),
            }
        }
        Ok(())
    }
}

fn cancel(
    attempt: &mut StoredAttempt,
    origin: GreeterOrClaimer,
    reason: CancelledGreetingAttemptReason,
    now: DateTime,
) {
    attempt.cancelled = Some(CancelledGreetingAttempt { origin, reason, timestamp: now });
}
