//! Call context resolution and greeter authorization.
//!
//! Every command starts here: authenticated commands resolve `(organization,
//! author device)` into an [`AuthorContext`], invited commands resolve
//! `(organization, token)` into an [`InvitedContext`]. Failures are
//! [`ContextError`]s and abort the command before any domain rule runs.

use std::sync::Arc;

use greet_proto::{DeviceId, GreetingAttemptId, InvitationStatus, InvitationToken, OrganizationId};

use crate::{
    directory::{CertificateStore, DirectoryError, UserInfo},
    env::Environment,
    error::{CancelAttemptError, ContextError, StepError},
    locks::{LockGuard, LockKey, LockTable},
    storage::{InvitationKind, Storage, StorageError, StoredAttempt, StoredInvitation},
};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorContext {
    /// Organization of the author
    pub organization_id: OrganizationId,
    /// Device that issued the command
    pub device_id: DeviceId,
    /// Active user owning the device
    pub user: UserInfo,
}

/// Bearer of a usable invitation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitedContext {
    /// Organization the invitation belongs to
    pub organization_id: OrganizationId,
    /// Pending invitation
    pub invitation: StoredInvitation,
}

/// Why a caller may not act on a greeting attempt.
///
/// Shared by step submission and attempt cancellation, which check the same
/// preconditions in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptDenied {
    NotFound,
    InvitationCompleted,
    InvitationCancelled,
    AuthorNotAllowed,
    GreeterRevoked,
    GreeterNotAllowed,
    Context(ContextError),
}

impl From<DirectoryError> for AttemptDenied {
    fn from(err: DirectoryError) -> Self {
        Self::Context(ContextError::Directory(err))
    }
}

impl From<StorageError> for AttemptDenied {
    fn from(err: StorageError) -> Self {
        Self::Context(ContextError::Storage(err))
    }
}

impl From<AttemptDenied> for StepError {
    fn from(denied: AttemptDenied) -> Self {
        match denied {
            AttemptDenied::NotFound => Self::GreetingAttemptNotFound,
            AttemptDenied::InvitationCompleted => Self::InvitationCompleted,
            AttemptDenied::InvitationCancelled => Self::InvitationCancelled,
            AttemptDenied::AuthorNotAllowed => Self::AuthorNotAllowed,
            AttemptDenied::GreeterRevoked => Self::GreeterRevoked,
            AttemptDenied::GreeterNotAllowed => Self::GreeterNotAllowed,
            AttemptDenied::Context(e) => Self::Context(e),
        }
    }
}

impl From<AttemptDenied> for CancelAttemptError {
    fn from(denied: AttemptDenied) -> Self {
        match denied {
            AttemptDenied::NotFound => Self::GreetingAttemptNotFound,
            AttemptDenied::InvitationCompleted => Self::InvitationCompleted,
            AttemptDenied::InvitationCancelled => Self::InvitationCancelled,
            AttemptDenied::AuthorNotAllowed => Self::AuthorNotAllowed,
            AttemptDenied::GreeterRevoked => Self::GreeterRevoked,
            AttemptDenied::GreeterNotAllowed => Self::GreeterNotAllowed,
            AttemptDenied::Context(e) => Self::Context(e),
        }
    }
}

/// Collaborators shared by the registry, the arbiter and the exchanger.
///
/// Clones share the same storage, directory and lock table.
#[derive(Clone)]
pub struct Backend<E, S, D> {
    pub(crate) env: E,
    pub(crate) storage: S,
    pub(crate) directory: D,
    pub(crate) locks: Arc<LockTable>,
}

/// An invitation with every one of its attempts, all locked.
pub(crate) struct LockedInvitation<'a> {
    pub(crate) invitation: Option<StoredInvitation>,
    pub(crate) attempts: Vec<StoredAttempt>,
    _token: LockGuard<'a>,
    _attempts: LockGuard<'a>,
}

impl<E, S, D> Backend<E, S, D>
where
    E: Environment,
    S: Storage,
    D: CertificateStore,
{
    /// Bundle the collaborators with a fresh lock table.
    pub fn new(env: E, storage: S, directory: D) -> Self {
        Self { env, storage, directory, locks: Arc::new(LockTable::new()) }
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Invitation and attempt storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Certificate directory.
    pub fn directory(&self) -> &D {
        &self.directory
    }

    fn check_organization(&self, org: &OrganizationId) -> Result<(), ContextError> {
        match self.directory.organization(org)? {
            None => Err(ContextError::OrganizationNotFound),
            Some(info) if info.is_expired => Err(ContextError::OrganizationExpired),
            Some(_) => Ok(()),
        }
    }

    /// Resolve an authenticated caller.
    pub fn authenticate(&self, org: &OrganizationId, device: DeviceId) -> Result<AuthorContext, ContextError> {
        self.check_organization(org)?;

        let user_id = self.directory.device_owner(org, device)?.ok_or(ContextError::AuthorNotFound)?;
        let user = self.directory.user(org, user_id)?.ok_or(ContextError::AuthorNotFound)?;
        if !user.is_active() {
            return Err(ContextError::AuthorRevoked);
        }

        Ok(AuthorContext { organization_id: org.clone(), device_id: device, user })
    }

    /// Resolve an invitation token bearer.
    ///
    /// Only pending invitations grant a context; a shamir recovery whose
    /// setup has been deleted counts as deleted.
    pub fn invited(&self, org: &OrganizationId, token: InvitationToken) -> Result<InvitedContext, ContextError> {
        self.check_organization(org)?;

        let invitation = self.storage.load_invitation(org, token)?.ok_or(ContextError::InvitationNotFound)?;
        if invitation.status != InvitationStatus::Pending || self.shamir_setup_deleted(org, &invitation)? {
            return Err(ContextError::InvitationDeleted);
        }

        Ok(InvitedContext { organization_id: org.clone(), invitation })
    }

    /// Whether `greeter` may greet `invitation`.
    ///
    /// - USER: active administrators
    /// - DEVICE: the user the device is for
    /// - SHAMIR_RECOVERY: recipients of the setup the invitation is bound to
    pub fn greeter_allowed(
        &self,
        org: &OrganizationId,
        invitation: &StoredInvitation,
        greeter: &UserInfo,
    ) -> Result<bool, DirectoryError> {
        Ok(match &invitation.kind {
            InvitationKind::User { .. } => greeter.is_active_admin(),
            InvitationKind::Device { claimer_user_id } => greeter.user_id == *claimer_user_id,
            InvitationKind::ShamirRecovery { claimer_user_id, shamir_recovery_created_on } => self
                .directory
                .shamir_setup_created_on(org, *claimer_user_id, *shamir_recovery_created_on)?
                .is_some_and(|setup| setup.is_recipient(greeter.user_id)),
        })
    }

    /// Whether the shamir setup a recovery invitation is bound to is gone.
    ///
    /// Always `false` for other invitation types.
    pub fn shamir_setup_deleted(
        &self,
        org: &OrganizationId,
        invitation: &StoredInvitation,
    ) -> Result<bool, DirectoryError> {
        let InvitationKind::ShamirRecovery { claimer_user_id, shamir_recovery_created_on } = &invitation.kind
        else {
            return Ok(false);
        };
        let setup = self.directory.shamir_setup_created_on(org, *claimer_user_id, *shamir_recovery_created_on)?;
        Ok(setup.is_none_or(|setup| setup.deleted_on.is_some()))
    }

    /// Load an attempt together with its invitation.
    pub(crate) fn load_attempt(
        &self,
        org: &OrganizationId,
        id: GreetingAttemptId,
    ) -> Result<(StoredAttempt, StoredInvitation), AttemptDenied> {
        let attempt = self.storage.load_attempt(org, id)?.ok_or(AttemptDenied::NotFound)?;
        let invitation = self.storage.load_invitation(org, attempt.token)?.ok_or(AttemptDenied::NotFound)?;
        Ok((attempt, invitation))
    }

    /// Greeter-side preconditions on an attempt, in reporting order.
    pub(crate) fn check_greeter_access(
        &self,
        author: &AuthorContext,
        attempt: &StoredAttempt,
        invitation: &StoredInvitation,
    ) -> Result<(), AttemptDenied> {
        let org = &author.organization_id;
        if attempt.greeter != author.user.user_id {
            return Err(AttemptDenied::NotFound);
        }
        match invitation.status {
            InvitationStatus::Completed => return Err(AttemptDenied::InvitationCompleted),
            InvitationStatus::Cancelled => return Err(AttemptDenied::InvitationCancelled),
            InvitationStatus::Pending => {},
        }
        if self.shamir_setup_deleted(org, invitation)? {
            return Err(AttemptDenied::InvitationCancelled);
        }
        if !self.greeter_allowed(org, invitation, &author.user)? {
            return Err(AttemptDenied::AuthorNotAllowed);
        }
        Ok(())
    }

    /// Claimer-side preconditions on an attempt, in reporting order.
    ///
    /// The invitation is reloaded under the attempt lock, so it may have left
    /// PENDING since the context was resolved.
    pub(crate) fn check_claimer_access(
        &self,
        invited: &InvitedContext,
        attempt: &StoredAttempt,
        invitation: &StoredInvitation,
    ) -> Result<(), AttemptDenied> {
        let org = &invited.organization_id;
        if attempt.token != invited.invitation.token {
            return Err(AttemptDenied::NotFound);
        }
        if invitation.status != InvitationStatus::Pending || self.shamir_setup_deleted(org, invitation)? {
            return Err(AttemptDenied::Context(ContextError::InvitationDeleted));
        }
        let greeter = match self.directory.user(org, attempt.greeter)? {
            Some(greeter) if greeter.is_active() => greeter,
            _ => return Err(AttemptDenied::GreeterRevoked),
        };
        if !self.greeter_allowed(org, invitation, &greeter)? {
            return Err(AttemptDenied::GreeterNotAllowed);
        }
        Ok(())
    }

    /// Lock one attempt.
    pub(crate) fn lock_attempt(&self, org: &OrganizationId, id: GreetingAttemptId) -> LockGuard<'_> {
        self.locks.acquire([LockKey::Attempt(org.clone(), id)])
    }

    /// Lock an invitation, then every attempt it has, and load them.
    ///
    /// New attempts are only created under the invitation lock, so the
    /// attempt list cannot grow while the guard is held.
    pub(crate) fn lock_invitation(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<LockedInvitation<'_>, StorageError> {
        let token_guard = self.locks.acquire([LockKey::Invitation(org.clone(), token)]);
        let ids: Vec<_> = self.storage.list_attempts(org, token)?.into_iter().map(|a| a.id).collect();
        let attempts_guard = self.locks.acquire(ids.into_iter().map(|id| LockKey::Attempt(org.clone(), id)));

        let invitation = self.storage.load_invitation(org, token)?;
        let attempts = self.storage.list_attempts(org, token)?;

        Ok(LockedInvitation { invitation, attempts, _token: token_guard, _attempts: attempts_guard })
    }
}

#[cfg(test)]
mod tests {
    use greet_proto::{
        DateTime, HumanHandle, InvitationCreatedBy, RevealToken, UserId,
    };

    use super::*;
    use crate::{
        directory::{MemoryDirectory, ShamirSetup, ShamirShare, UserProfile},
        storage::{MemoryStorage, StorageWrite},
    };

    #[derive(Clone)]
    struct FixedEnv;

    impl Environment for FixedEnv {
        fn now(&self) -> DateTime {
            DateTime::from_secs(100)
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(7);
        }
    }

    const ALICE: u128 = 1;
    const BOB: u128 = 2;

    fn org() -> OrganizationId {
        OrganizationId::new("CoolOrg").unwrap()
    }

    fn backend() -> Backend<FixedEnv, MemoryStorage, MemoryDirectory> {
        let dir = MemoryDirectory::new();
        dir.add_user(
            &org(),
            UserId::from(ALICE),
            DeviceId::from(11u128),
            HumanHandle::new("alice@example.com", "Alice"),
            UserProfile::Admin,
        );
        dir.add_user(
            &org(),
            UserId::from(BOB),
            DeviceId::from(21u128),
            HumanHandle::new("bob@example.com", "Bob"),
            UserProfile::Standard,
        );
        Backend::new(FixedEnv, MemoryStorage::new(), dir)
    }

    fn invitation(kind: InvitationKind) -> StoredInvitation {
        StoredInvitation::pending(
            InvitationToken::from(5u128),
            DateTime::from_secs(1),
            InvitationCreatedBy::User {
                user_id: UserId::from(ALICE),
                human_handle: HumanHandle::new("alice@example.com", "Alice"),
            },
            kind,
        )
    }

    #[test]
    fn authenticate_resolves_device_owner() {
        let backend = backend();
        let ctx = backend.authenticate(&org(), DeviceId::from(11u128)).unwrap();
        assert_eq!(ctx.user.user_id, UserId::from(ALICE));
    }

    #[test]
    fn authenticate_rejects_unknown_revoked_and_expired() {
        let backend = backend();
        assert_eq!(
            backend.authenticate(&org(), DeviceId::from(99u128)),
            Err(ContextError::AuthorNotFound)
        );

        backend.directory.revoke_user(&org(), UserId::from(BOB), DateTime::from_secs(3));
        assert_eq!(
            backend.authenticate(&org(), DeviceId::from(21u128)),
            Err(ContextError::AuthorRevoked)
        );

        let other = OrganizationId::new("Other").unwrap();
        assert_eq!(
            backend.authenticate(&other, DeviceId::from(11u128)),
            Err(ContextError::OrganizationNotFound)
        );

        backend.directory.expire_organization(&org());
        assert_eq!(
            backend.authenticate(&org(), DeviceId::from(11u128)),
            Err(ContextError::OrganizationExpired)
        );
    }

    #[test]
    fn invited_requires_pending_invitation() {
        let backend = backend();
        let token = InvitationToken::from(5u128);
        assert_eq!(backend.invited(&org(), token).unwrap_err(), ContextError::InvitationNotFound);

        let mut inv = invitation(InvitationKind::User { claimer_email: "zack@example.com".into() });
        backend.storage.commit(&org(), &[StorageWrite::Invitation(inv.clone())]).unwrap();
        assert!(backend.invited(&org(), token).is_ok());

        inv.status = InvitationStatus::Cancelled;
        inv.cancelled_on = Some(DateTime::from_secs(2));
        backend.storage.commit(&org(), &[StorageWrite::Invitation(inv)]).unwrap();
        assert_eq!(backend.invited(&org(), token).unwrap_err(), ContextError::InvitationDeleted);
    }

    #[test]
    fn greeter_rules_per_invitation_type() {
        let backend = backend();
        let alice = backend.directory.user(&org(), UserId::from(ALICE)).unwrap().unwrap();
        let bob = backend.directory.user(&org(), UserId::from(BOB)).unwrap().unwrap();

        let user = invitation(InvitationKind::User { claimer_email: "zack@example.com".into() });
        assert!(backend.greeter_allowed(&org(), &user, &alice).unwrap());
        assert!(!backend.greeter_allowed(&org(), &user, &bob).unwrap());

        let device = invitation(InvitationKind::Device { claimer_user_id: UserId::from(BOB) });
        assert!(!backend.greeter_allowed(&org(), &device, &alice).unwrap());
        assert!(backend.greeter_allowed(&org(), &device, &bob).unwrap());
    }

    #[test]
    fn shamir_greeters_are_recipients_of_bound_setup() {
        let backend = backend();
        let created_on = DateTime::from_secs(10);
        backend.directory.add_shamir_setup(&org(), ShamirSetup {
            user_id: UserId::from(BOB),
            created_on,
            deleted_on: None,
            threshold: 1,
            recipients: vec![ShamirShare { user_id: UserId::from(ALICE), shares: 1 }],
            reveal_token: RevealToken::from(3u128),
            ciphered_data: vec![0xaa],
        });
        let shamir = invitation(InvitationKind::ShamirRecovery {
            claimer_user_id: UserId::from(BOB),
            shamir_recovery_created_on: created_on,
        });
        let alice = backend.directory.user(&org(), UserId::from(ALICE)).unwrap().unwrap();

        assert!(backend.greeter_allowed(&org(), &shamir, &alice).unwrap());
        assert!(!backend.shamir_setup_deleted(&org(), &shamir).unwrap());

        backend.directory.delete_shamir_setup(&org(), UserId::from(BOB), DateTime::from_secs(11));
        assert!(backend.greeter_allowed(&org(), &shamir, &alice).unwrap());
        assert!(backend.shamir_setup_deleted(&org(), &shamir).unwrap());
    }
}
