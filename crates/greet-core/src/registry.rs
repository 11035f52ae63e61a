//! Invitation registry.
//!
//! Owns invitation records: creation, listing, claimer-side details,
//! cancellation and completion. Each operation commits its writes in one
//! batch; emails and directory writes happen outside the storage batch.

use greet_proto::{
    DateTime, InvitationCreatedBy, InvitationEmailSentStatus, InvitationInfo, InvitationStatus, InvitationToken,
    InviteListItem, OrganizationId, RevealToken, ShamirRecoveryRecipient, UserGreetingAdministrator, UserId,
};

use crate::{
    access::{AuthorContext, Backend, InvitedContext},
    config::InviteConfig,
    directory::{CertificateStore, Enrollment, EnrollmentTarget},
    env::Environment,
    error::{
        CancelInvitationError, CompleteError, ContextError, NewDeviceError, NewShamirRecoveryError, NewUserError,
        RevealError,
    },
    locks::LockKey,
    mailer::{EmailGreeter, Mailer, send_invite_email},
    storage::{InvitationKind, StepRecord, Storage, StorageError, StorageWrite, StoredAttempt, StoredInvitation},
};

/// Step carrying the claimer enrollment request.
const CLAIMER_PAYLOAD_INDEX: usize = 6;

/// Step carrying the greeter enrollment response.
const GREETER_PAYLOAD_INDEX: usize = 7;

/// Created (or already pending) invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewInvitation {
    /// Invitation token
    pub token: InvitationToken,
    /// Outcome of the invitation email
    pub email_sent_status: InvitationEmailSentStatus,
}

/// Invitation records and their lifecycle.
#[derive(Clone)]
pub struct InvitationRegistry<E, S, D, M> {
    backend: Backend<E, S, D>,
    mailer: M,
    config: InviteConfig,
}

impl<E, S, D, M> InvitationRegistry<E, S, D, M>
where
    E: Environment,
    S: Storage,
    D: CertificateStore,
    M: Mailer,
{
    /// Registry over a shared backend.
    pub fn new(backend: Backend<E, S, D>, mailer: M, config: InviteConfig) -> Self {
        Self { backend, mailer, config }
    }

    /// Invite a new user by email.
    ///
    /// Only administrators may do this. An invitation already pending for
    /// the email is returned as-is; `send_email` re-sends it. The email ends
    /// up in mail headers, so whitespace and control characters are refused.
    pub fn create_user(
        &self,
        author: &AuthorContext,
        claimer_email: &str,
        send_email: bool,
    ) -> Result<NewInvitation, NewUserError> {
        let org = &author.organization_id;
        if !is_plain_email(claimer_email) {
            tracing::warn!(organization_id = %org, author = %author.user.user_id, "malformed claimer email refused");
            return Err(ContextError::InvalidRequest(format!("malformed claimer email {claimer_email:?}")).into());
        }
        if !author.user.is_active_admin() {
            return Err(NewUserError::AuthorNotAllowed);
        }
        if self.backend.directory.user_by_email(org, claimer_email)?.is_some() {
            return Err(NewUserError::ClaimerEmailAlreadyEnrolled);
        }

        let kind = InvitationKind::User { claimer_email: claimer_email.to_string() };
        let invitation = self.create_or_reuse(author, kind)?;

        let greeter = &author.user.human_handle;
        let email_sent_status = self.maybe_send(
            send_email,
            org,
            &invitation,
            claimer_email,
            Some(EmailGreeter { label: &greeter.label, email: &greeter.email }),
        );
        Ok(NewInvitation { token: invitation.token, email_sent_status })
    }

    /// Invite a new device for the author's own user.
    ///
    /// The email goes to the author itself.
    pub fn create_device(&self, author: &AuthorContext, send_email: bool) -> Result<NewInvitation, NewDeviceError> {
        let org = &author.organization_id;
        let kind = InvitationKind::Device { claimer_user_id: author.user.user_id };
        let invitation = self.create_or_reuse(author, kind)?;

        let email_sent_status =
            self.maybe_send(send_email, org, &invitation, &author.user.human_handle.email, None);
        Ok(NewInvitation { token: invitation.token, email_sent_status })
    }

    /// Invite a user to recover its account through its shamir setup.
    ///
    /// The author must be a recipient of the claimer's live setup. A pending
    /// invitation bound to an older setup is cancelled and replaced.
    pub fn create_shamir_recovery(
        &self,
        author: &AuthorContext,
        claimer_user_id: UserId,
        send_email: bool,
    ) -> Result<NewInvitation, NewShamirRecoveryError> {
        let org = &author.organization_id;
        let claimer = self
            .backend
            .directory
            .user(org, claimer_user_id)?
            .ok_or(NewShamirRecoveryError::UserNotFound)?;
        let setup = self
            .backend
            .directory
            .shamir_setup(org, claimer_user_id)?
            .filter(|setup| setup.is_recipient(author.user.user_id))
            .ok_or(NewShamirRecoveryError::AuthorNotAllowed)?;

        let kind = InvitationKind::ShamirRecovery { claimer_user_id, shamir_recovery_created_on: setup.created_on };
        let invitation = self.create_or_reuse(author, kind)?;

        let greeter = &author.user.human_handle;
        let email_sent_status = self.maybe_send(
            send_email,
            org,
            &invitation,
            &claimer.human_handle.email,
            Some(EmailGreeter { label: &greeter.label, email: &greeter.email }),
        );
        Ok(NewInvitation { token: invitation.token, email_sent_status })
    }

    /// Pending invitation for `kind`'s claimer, created if there is none.
    ///
    /// The claimer key is held first, then the invitation being superseded.
    fn create_or_reuse(&self, author: &AuthorContext, kind: InvitationKind) -> Result<StoredInvitation, ContextError> {
        let org = &author.organization_id;
        let key = kind.claimer_key();
        let _guard = self.backend.locks.acquire([LockKey::Claimer(org.clone(), key.clone())]);

        let pending = self
            .backend
            .storage
            .list_invitations(org)?
            .into_iter()
            .find(|inv| inv.status == InvitationStatus::Pending && inv.kind.claimer_key() == key);

        let mut writes = Vec::new();
        let _superseded_guard = match pending {
            Some(existing) if existing.kind == kind => {
                tracing::debug!(organization_id = %org, token = %existing.token, "invitation already pending");
                return Ok(existing);
            },
            Some(stale) => {
                let locked = self.backend.lock_invitation(org, stale.token)?;
                // Completed or cancelled meanwhile: nothing left to supersede
                if let Some(mut superseded) =
                    locked.invitation.clone().filter(|inv| inv.status == InvitationStatus::Pending)
                {
                    superseded.status = InvitationStatus::Cancelled;
                    superseded.cancelled_on = Some(self.backend.env.now());
                    tracing::info!(organization_id = %org, token = %superseded.token, "stale invitation cancelled");
                    writes.push(StorageWrite::Invitation(superseded));
                }
                Some(locked)
            },
            None => None,
        };

        let now = self.backend.env.now();

        let created_by = InvitationCreatedBy::User {
            user_id: author.user.user_id,
            human_handle: author.user.human_handle.clone(),
        };
        let token = InvitationToken::from(self.backend.env.random_u128());
        let invitation = StoredInvitation::pending(token, now, created_by, kind);
        writes.push(StorageWrite::Invitation(invitation.clone()));
        self.backend.storage.commit(org, &writes)?;

        tracing::info!(
            organization_id = %org,
            token = %token,
            invitation_type = %invitation.invitation_type(),
            created_by = %author.user.user_id,
            "invitation created"
        );
        Ok(invitation)
    }

    fn maybe_send(
        &self,
        send_email: bool,
        org: &OrganizationId,
        invitation: &StoredInvitation,
        to: &str,
        greeter: Option<EmailGreeter<'_>>,
    ) -> InvitationEmailSentStatus {
        if !send_email {
            return InvitationEmailSentStatus::Success;
        }
        send_invite_email(&self.mailer, &self.config, org, invitation.invitation_type(), invitation.token, to, greeter)
    }

    /// Invitations the author may greet, oldest first.
    pub fn list(&self, author: &AuthorContext) -> Result<Vec<InviteListItem>, ContextError> {
        let org = &author.organization_id;
        let mut invitations = self.backend.storage.list_invitations(org)?;
        invitations.sort_by_key(|inv| (inv.created_on, inv.token));

        let mut items = Vec::new();
        for invitation in invitations {
            if !self.backend.greeter_allowed(org, &invitation, &author.user)? {
                continue;
            }
            if let Some(item) = self.list_item(org, invitation)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn list_item(
        &self,
        org: &OrganizationId,
        invitation: StoredInvitation,
    ) -> Result<Option<InviteListItem>, ContextError> {
        let StoredInvitation { token, created_on, created_by, kind, status, .. } = invitation;
        Ok(Some(match kind {
            InvitationKind::User { claimer_email } => {
                InviteListItem::User { token, created_on, created_by, claimer_email, status }
            },
            InvitationKind::Device { .. } => InviteListItem::Device { token, created_on, created_by, status },
            InvitationKind::ShamirRecovery { claimer_user_id, shamir_recovery_created_on } => {
                let Some(setup) =
                    self.backend.directory.shamir_setup_created_on(org, claimer_user_id, shamir_recovery_created_on)?
                else {
                    return Ok(None);
                };
                InviteListItem::ShamirRecovery {
                    token,
                    created_on,
                    created_by,
                    claimer_user_id,
                    shamir_recovery_created_on,
                    shamir_recovery_deleted_on: setup.deleted_on,
                    status,
                }
            },
        }))
    }

    /// Invitation details for the claimer.
    ///
    /// Greeter lists and presence are resolved on every call.
    pub fn info_as_invited(&self, invited: &InvitedContext) -> Result<InvitationInfo, ContextError> {
        let org = &invited.organization_id;
        let invitation = &invited.invitation;
        let directory = &self.backend.directory;

        Ok(match &invitation.kind {
            InvitationKind::User { claimer_email } => {
                let attempts = self.backend.storage.list_attempts(org, invitation.token)?;
                let mut administrators = Vec::new();
                for admin in directory.administrators(org)? {
                    administrators.push(UserGreetingAdministrator {
                        online_status: directory.online_status(org, admin.user_id)?,
                        last_greeting_attempt_joined_on: last_joined(&attempts, admin.user_id),
                        user_id: admin.user_id,
                        human_handle: admin.human_handle,
                    });
                }
                InvitationInfo::User {
                    claimer_email: claimer_email.clone(),
                    created_by: invitation.created_by.clone(),
                    administrators,
                }
            },
            InvitationKind::Device { claimer_user_id } => {
                let claimer = directory.user(org, *claimer_user_id)?.ok_or(ContextError::InvitationDeleted)?;
                InvitationInfo::Device {
                    claimer_user_id: *claimer_user_id,
                    claimer_human_handle: claimer.human_handle,
                    created_by: invitation.created_by.clone(),
                }
            },
            InvitationKind::ShamirRecovery { claimer_user_id, shamir_recovery_created_on } => {
                let claimer = directory.user(org, *claimer_user_id)?.ok_or(ContextError::InvitationDeleted)?;
                let setup = directory
                    .shamir_setup_created_on(org, *claimer_user_id, *shamir_recovery_created_on)?
                    .ok_or(ContextError::InvitationDeleted)?;

                let mut recipients = Vec::new();
                for share in &setup.recipients {
                    let Some(recipient) = directory.user(org, share.user_id)? else { continue };
                    recipients.push(ShamirRecoveryRecipient {
                        user_id: recipient.user_id,
                        human_handle: recipient.human_handle,
                        shares: share.shares,
                        revoked_on: recipient.revoked_on,
                        online_status: directory.online_status(org, share.user_id)?,
                    });
                }
                InvitationInfo::ShamirRecovery {
                    claimer_user_id: *claimer_user_id,
                    claimer_human_handle: claimer.human_handle,
                    created_by: invitation.created_by.clone(),
                    threshold: setup.threshold,
                    recipients,
                }
            },
        })
    }

    /// Cancel a pending invitation.
    ///
    /// Allowed for its creator, administrators and anyone allowed to greet it.
    pub fn cancel(&self, author: &AuthorContext, token: InvitationToken) -> Result<(), CancelInvitationError> {
        let org = &author.organization_id;
        let locked = self.backend.lock_invitation(org, token)?;
        let mut invitation = locked.invitation.clone().ok_or(CancelInvitationError::InvitationNotFound)?;

        let allowed = invitation.created_by.user_id() == Some(author.user.user_id)
            || author.user.is_active_admin()
            || self.backend.greeter_allowed(org, &invitation, &author.user)?;
        if !allowed {
            return Err(CancelInvitationError::AuthorNotAllowed);
        }
        match invitation.status {
            InvitationStatus::Completed => return Err(CancelInvitationError::InvitationCompleted),
            InvitationStatus::Cancelled => return Err(CancelInvitationError::InvitationAlreadyCancelled),
            InvitationStatus::Pending => {},
        }

        invitation.status = InvitationStatus::Cancelled;
        invitation.cancelled_on = Some(self.backend.env.now());
        self.backend.storage.commit(org, &[StorageWrite::Invitation(invitation)])?;

        tracing::info!(organization_id = %org, token = %token, author = %author.user.user_id, "invitation cancelled");
        Ok(())
    }

    /// Mark an invitation completed.
    ///
    /// The author must be allowed to greet the invitation, or be its claimer.
    /// If one of its attempts exchanged all nine steps, the enrollment it
    /// carries (USER and DEVICE) is persisted first; if that fails the
    /// invitation stays pending and the call can be retried.
    pub fn complete(&self, author: &AuthorContext, token: InvitationToken) -> Result<(), CompleteError> {
        let org = &author.organization_id;
        let locked = self.backend.lock_invitation(org, token)?;
        let mut invitation = locked.invitation.clone().ok_or(CompleteError::InvitationNotFound)?;

        match invitation.status {
            InvitationStatus::Cancelled => return Err(CompleteError::InvitationCancelled),
            InvitationStatus::Completed => return Err(CompleteError::InvitationAlreadyCompleted),
            InvitationStatus::Pending => {},
        }
        if !self.backend.greeter_allowed(org, &invitation, &author.user)? && !is_claimer(&invitation, author) {
            return Err(CompleteError::AuthorNotAllowed);
        }

        let now = self.backend.env.now();
        let mut writes = Vec::new();

        let finished = locked
            .attempts
            .iter()
            .filter(|a| a.cancelled.is_none() && a.is_finished())
            .max_by_key(|a| a.created_on);
        if let Some(attempt) = finished {
            // Persisted under the invitation lock: an enrollment exists only
            // for an invitation that ends up completed
            if let Some(enrollment) = enrollment(&invitation, attempt, now)? {
                self.backend.directory.persist_enrollment(org, &enrollment)?;
                tracing::info!(organization_id = %org, token = %token, attempt_id = %attempt.id, "enrollment persisted");
            }
            let mut completed = attempt.clone();
            completed.completed_on = Some(now);
            invitation.completed_by_attempt = Some(attempt.id);
            writes.push(StorageWrite::Attempt(completed));
        }

        invitation.status = InvitationStatus::Completed;
        invitation.completed_on = Some(now);
        writes.insert(0, StorageWrite::Invitation(invitation));
        self.backend.storage.commit(org, &writes)?;

        tracing::info!(organization_id = %org, token = %token, author = %author.user.user_id, "invitation completed");
        Ok(())
    }

    /// Ciphered data of the shamir setup the invitation is bound to.
    pub fn shamir_recovery_reveal(
        &self,
        invited: &InvitedContext,
        reveal_token: RevealToken,
    ) -> Result<Vec<u8>, RevealError> {
        let InvitationKind::ShamirRecovery { claimer_user_id, shamir_recovery_created_on } = &invited.invitation.kind
        else {
            return Err(RevealError::BadInvitationType);
        };

        let setup = self
            .backend
            .directory
            .shamir_setup_created_on(&invited.organization_id, *claimer_user_id, *shamir_recovery_created_on)?
            .filter(|setup| setup.deleted_on.is_none() && setup.reveal_token == reveal_token)
            .ok_or(RevealError::BadRevealToken)?;

        Ok(setup.ciphered_data)
    }
}

fn last_joined(attempts: &[StoredAttempt], greeter: UserId) -> Option<DateTime> {
    attempts.iter().filter(|a| a.greeter == greeter).filter_map(|a| a.greeter_joined).max()
}

/// Single `local@domain` token without whitespace or control characters.
fn is_plain_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && !domain.is_empty() && !email.chars().any(|c| c.is_control() || c.is_whitespace())
}

fn is_claimer(invitation: &StoredInvitation, author: &AuthorContext) -> bool {
    match &invitation.kind {
        InvitationKind::User { claimer_email } => *claimer_email == author.user.human_handle.email,
        InvitationKind::Device { claimer_user_id } | InvitationKind::ShamirRecovery { claimer_user_id, .. } => {
            *claimer_user_id == author.user.user_id
        },
    }
}

/// Enrollment carried by a finished attempt. `None` for shamir recoveries,
/// which enroll nothing new.
fn enrollment(
    invitation: &StoredInvitation,
    attempt: &StoredAttempt,
    now: DateTime,
) -> Result<Option<Enrollment>, StorageError> {
    let target = match &invitation.kind {
        InvitationKind::User { claimer_email } => EnrollmentTarget::User { claimer_email: claimer_email.clone() },
        InvitationKind::Device { claimer_user_id } => EnrollmentTarget::Device { user_id: *claimer_user_id },
        InvitationKind::ShamirRecovery { .. } => return Ok(None),
    };

    let payload = |steps: &[StepRecord], index: usize| {
        steps.get(index).map(|record| record.payload.clone()).ok_or_else(|| StorageError::Conflict {
            key: attempt.id.hex(),
            reason: format!("finished attempt lacks step {index}"),
        })
    };

    Ok(Some(Enrollment {
        token: invitation.token,
        target,
        greeter: attempt.greeter,
        claimer_payload: payload(&attempt.claimer_steps, CLAIMER_PAYLOAD_INDEX)?,
        greeter_payload: payload(&attempt.greeter_steps, GREETER_PAYLOAD_INDEX)?,
        timestamp: now,
    }))
}
