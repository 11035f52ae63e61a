//! Certificate directory: users, devices and shamir setups of organizations.
//!
//! The invitation subsystem does not own these records. It reads them to
//! authorize calls and resolve greeters, and writes exactly one thing back:
//! the enrollment produced by a finished greeting.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use greet_proto::{
    DateTime, DeviceId, HumanHandle, InvitationToken, OrganizationId, RevealToken, UserId,
    UserOnlineStatus,
};
use thiserror::Error;

/// Errors from the certificate directory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Backend could not be reached
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the write
    #[error("directory rejected write: {0}")]
    Rejected(String),
}

impl DirectoryError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Organization state relevant to invitations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrganizationInfo {
    /// Expired organizations reject every command
    pub is_expired: bool,
}

/// Role of a user in its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserProfile {
    /// May invite and greet new users
    Admin,
    /// Regular member
    Standard,
    /// Restricted member
    Outsider,
}

/// User record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// User identifier
    pub user_id: UserId,
    /// Identity
    pub human_handle: HumanHandle,
    /// Role
    pub profile: UserProfile,
    /// Revocation time, if revoked
    pub revoked_on: Option<DateTime>,
}

impl UserInfo {
    /// Not revoked.
    pub fn is_active(&self) -> bool {
        self.revoked_on.is_none()
    }

    /// Active administrator.
    pub fn is_active_admin(&self) -> bool {
        self.is_active() && self.profile == UserProfile::Admin
    }
}

/// Recipient entry of a shamir setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShamirShare {
    /// Recipient user
    pub user_id: UserId,
    /// Shares held by the recipient
    pub shares: u8,
}

/// Shamir recovery setup of a user.
///
/// A user has at most one live (not deleted) setup; deleted setups stay
/// readable by creation time so that invitations bound to them can be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShamirSetup {
    /// User the setup protects
    pub user_id: UserId,
    /// Creation time, identifies the setup
    pub created_on: DateTime,
    /// Deletion time, if deleted
    pub deleted_on: Option<DateTime>,
    /// Shares needed to recover
    pub threshold: u8,
    /// Share holders
    pub recipients: Vec<ShamirShare>,
    /// Secret the claimer must present to fetch `ciphered_data`
    pub reveal_token: RevealToken,
    /// Opaque blob handed to the claimer on reveal
    pub ciphered_data: Vec<u8>,
}

impl ShamirSetup {
    /// Whether `user` holds shares of this setup.
    pub fn is_recipient(&self, user: UserId) -> bool {
        self.recipients.iter().any(|r| r.user_id == user)
    }
}

/// Principal created by a finished greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentTarget {
    /// New user invited by email
    User {
        /// Email from the invitation
        claimer_email: String,
    },
    /// New device of an existing user
    Device {
        /// Owner of the new device
        user_id: UserId,
    },
}

/// Data persisted when an invitation completes.
///
/// Payloads are the raw step 6 (claimer) and step 7 (greeter) bytes. They are
/// end-to-end encrypted between the parties; the directory stores them as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    /// Invitation being completed
    pub token: InvitationToken,
    /// What gets created
    pub target: EnrollmentTarget,
    /// Greeter who vouched for the claimer
    pub greeter: UserId,
    /// Claimer enrollment request
    pub claimer_payload: Vec<u8>,
    /// Greeter response
    pub greeter_payload: Vec<u8>,
    /// Completion time
    pub timestamp: DateTime,
}

/// Read/write access to an organization's certificates.
///
/// Synchronous, `Clone + Send + Sync`; clones share the same backend.
pub trait CertificateStore: Clone + Send + Sync + 'static {
    /// Organization state. `None` if it does not exist.
    fn organization(&self, org: &OrganizationId) -> Result<Option<OrganizationInfo>, DirectoryError>;

    /// User owning `device`. `None` if the device is unknown.
    fn device_owner(&self, org: &OrganizationId, device: DeviceId) -> Result<Option<UserId>, DirectoryError>;

    /// User record, revoked users included.
    fn user(&self, org: &OrganizationId, user: UserId) -> Result<Option<UserInfo>, DirectoryError>;

    /// Active user using `email`, if any.
    fn user_by_email(&self, org: &OrganizationId, email: &str) -> Result<Option<UserInfo>, DirectoryError>;

    /// Active administrators.
    fn administrators(&self, org: &OrganizationId) -> Result<Vec<UserInfo>, DirectoryError>;

    /// Live shamir setup of `user`.
    fn shamir_setup(&self, org: &OrganizationId, user: UserId) -> Result<Option<ShamirSetup>, DirectoryError>;

    /// Shamir setup of `user` created at `created_on`, deleted or not.
    fn shamir_setup_created_on(
        &self,
        org: &OrganizationId,
        user: UserId,
        created_on: DateTime,
    ) -> Result<Option<ShamirSetup>, DirectoryError>;

    /// Presence hint. Backends without presence tracking answer `Unknown`.
    fn online_status(&self, _org: &OrganizationId, _user: UserId) -> Result<UserOnlineStatus, DirectoryError> {
        Ok(UserOnlineStatus::Unknown)
    }

    /// Persist the principal created by a finished greeting.
    fn persist_enrollment(&self, org: &OrganizationId, enrollment: &Enrollment) -> Result<(), DirectoryError>;
}

/// In-memory certificate store for simulation and single-node deployments.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<HashMap<OrganizationId, OrganizationRecords>>>,
}

#[derive(Default)]
struct OrganizationRecords {
    is_expired: bool,
    users: HashMap<UserId, UserInfo>,
    devices: HashMap<DeviceId, UserId>,
    shamir_setups: Vec<ShamirSetup>,
    online: HashMap<UserId, UserOnlineStatus>,
    enrollments: Vec<Enrollment>,
}

impl MemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OrganizationId, OrganizationRecords>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_org<T>(&self, org: &OrganizationId, f: impl FnOnce(&OrganizationRecords) -> T) -> Option<T> {
        self.lock().get(org).map(f)
    }

    /// Create an organization (no-op if it exists).
    pub fn add_organization(&self, org: &OrganizationId) {
        self.lock().entry(org.clone()).or_default();
    }

    /// Mark an organization expired.
    pub fn expire_organization(&self, org: &OrganizationId) {
        self.lock().entry(org.clone()).or_default().is_expired = true;
    }

    /// Add a user with one device.
    pub fn add_user(
        &self,
        org: &OrganizationId,
        user_id: UserId,
        device_id: DeviceId,
        human_handle: HumanHandle,
        profile: UserProfile,
    ) {
        let mut orgs = self.lock();
        let records = orgs.entry(org.clone()).or_default();
        records.users.insert(user_id, UserInfo { user_id, human_handle, profile, revoked_on: None });
        records.devices.insert(device_id, user_id);
    }

    /// Add a device to an existing user.
    pub fn add_device(&self, org: &OrganizationId, device_id: DeviceId, user_id: UserId) {
        self.lock().entry(org.clone()).or_default().devices.insert(device_id, user_id);
    }

    /// Revoke a user.
    pub fn revoke_user(&self, org: &OrganizationId, user_id: UserId, at: DateTime) {
        if let Some(user) = self.lock().get_mut(org).and_then(|r| r.users.get_mut(&user_id)) {
            user.revoked_on = Some(at);
        }
    }

    /// Set the presence hint of a user.
    pub fn set_online_status(&self, org: &OrganizationId, user_id: UserId, status: UserOnlineStatus) {
        self.lock().entry(org.clone()).or_default().online.insert(user_id, status);
    }

    /// Install a shamir setup, deleting the user's previous live one.
    pub fn add_shamir_setup(&self, org: &OrganizationId, setup: ShamirSetup) {
        let mut orgs = self.lock();
        let records = orgs.entry(org.clone()).or_default();
        for previous in &mut records.shamir_setups {
            if previous.user_id == setup.user_id && previous.deleted_on.is_none() {
                previous.deleted_on = Some(setup.created_on);
            }
        }
        records.shamir_setups.push(setup);
    }

    /// Delete the live shamir setup of a user.
    pub fn delete_shamir_setup(&self, org: &OrganizationId, user_id: UserId, at: DateTime) {
        if let Some(records) = self.lock().get_mut(org) {
            for setup in &mut records.shamir_setups {
                if setup.user_id == user_id && setup.deleted_on.is_none() {
                    setup.deleted_on = Some(at);
                }
            }
        }
    }

    /// Enrollments persisted so far, oldest first.
    pub fn enrollments(&self, org: &OrganizationId) -> Vec<Enrollment> {
        self.with_org(org, |r| r.enrollments.clone()).unwrap_or_default()
    }
}

impl CertificateStore for MemoryDirectory {
    fn organization(&self, org: &OrganizationId) -> Result<Option<OrganizationInfo>, DirectoryError> {
        Ok(self.with_org(org, |r| OrganizationInfo { is_expired: r.is_expired }))
    }

    fn device_owner(&self, org: &OrganizationId, device: DeviceId) -> Result<Option<UserId>, DirectoryError> {
        Ok(self.with_org(org, |r| r.devices.get(&device).copied()).flatten())
    }

    fn user(&self, org: &OrganizationId, user: UserId) -> Result<Option<UserInfo>, DirectoryError> {
        Ok(self.with_org(org, |r| r.users.get(&user).cloned()).flatten())
    }

    fn user_by_email(&self, org: &OrganizationId, email: &str) -> Result<Option<UserInfo>, DirectoryError> {
        Ok(self
            .with_org(org, |r| {
                r.users.values().find(|u| u.is_active() && u.human_handle.email == email).cloned()
            })
            .flatten())
    }

    fn administrators(&self, org: &OrganizationId) -> Result<Vec<UserInfo>, DirectoryError> {
        Ok(self
            .with_org(org, |r| {
                let mut admins: Vec<_> = r.users.values().filter(|u| u.is_active_admin()).cloned().collect();
                admins.sort_by_key(|u| u.user_id);
                admins
            })
            .unwrap_or_default())
    }

    fn shamir_setup(&self, org: &OrganizationId, user: UserId) -> Result<Option<ShamirSetup>, DirectoryError> {
        Ok(self
            .with_org(org, |r| {
                r.shamir_setups.iter().find(|s| s.user_id == user && s.deleted_on.is_none()).cloned()
            })
            .flatten())
    }

    fn shamir_setup_created_on(
        &self,
        org: &OrganizationId,
        user: UserId,
        created_on: DateTime,
    ) -> Result<Option<ShamirSetup>, DirectoryError> {
        Ok(self
            .with_org(org, |r| {
                r.shamir_setups.iter().find(|s| s.user_id == user && s.created_on == created_on).cloned()
            })
            .flatten())
    }

    fn online_status(&self, org: &OrganizationId, user: UserId) -> Result<UserOnlineStatus, DirectoryError> {
        Ok(self
            .with_org(org, |r| r.online.get(&user).copied())
            .flatten()
            .unwrap_or(UserOnlineStatus::Unknown))
    }

    /// New users get a user id and device id derived from the invitation
    /// token, with the invitation email as both email and label. Persisting
    /// the same invitation twice is a no-op.
    fn persist_enrollment(&self, org: &OrganizationId, enrollment: &Enrollment) -> Result<(), DirectoryError> {
        let mut orgs = self.lock();
        let records = orgs
            .get_mut(org)
            .ok_or_else(|| DirectoryError::Rejected(format!("unknown organization {org}")))?;
        if records.enrollments.iter().any(|e| e.token == enrollment.token) {
            return Ok(());
        }

        let device_id = DeviceId::from(*enrollment.token.as_bytes());
        match &enrollment.target {
            EnrollmentTarget::User { claimer_email } => {
                if records.users.values().any(|u| u.is_active() && &u.human_handle.email == claimer_email) {
                    return Err(DirectoryError::Rejected(format!("{claimer_email} is already enrolled")));
                }
                let user_id = UserId::from(*enrollment.token.as_bytes());
                records.users.insert(user_id, UserInfo {
                    user_id,
                    human_handle: HumanHandle::new(claimer_email.clone(), claimer_email.clone()),
                    profile: UserProfile::Standard,
                    revoked_on: None,
                });
                records.devices.insert(device_id, user_id);
            },
            EnrollmentTarget::Device { user_id } => {
                if !records.users.contains_key(user_id) {
                    return Err(DirectoryError::Rejected(format!("unknown user {user_id}")));
                }
                records.devices.insert(device_id, *user_id);
            },
        }

        records.enrollments.push(enrollment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> OrganizationId {
        OrganizationId::new("CoolOrg").unwrap()
    }

    fn directory() -> MemoryDirectory {
        let dir = MemoryDirectory::new();
        dir.add_user(
            &org(),
            UserId::from(1u128),
            DeviceId::from(11u128),
            HumanHandle::new("alice@example.com", "Alice"),
            UserProfile::Admin,
        );
        dir.add_user(
            &org(),
            UserId::from(2u128),
            DeviceId::from(21u128),
            HumanHandle::new("mallory@example.com", "Mallory"),
            UserProfile::Standard,
        );
        dir
    }

    #[test]
    fn resolves_devices_and_admins() {
        let dir = directory();
        assert_eq!(dir.device_owner(&org(), DeviceId::from(11u128)).unwrap(), Some(UserId::from(1u128)));
        assert_eq!(dir.device_owner(&org(), DeviceId::from(99u128)).unwrap(), None);

        let admins = dir.administrators(&org()).unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].human_handle.label, "Alice");
    }

    #[test]
    fn revoked_user_is_not_found_by_email() {
        let dir = directory();
        dir.revoke_user(&org(), UserId::from(1u128), DateTime::from_secs(5));
        assert!(dir.user_by_email(&org(), "alice@example.com").unwrap().is_none());
        assert!(dir.administrators(&org()).unwrap().is_empty());
        assert!(dir.user(&org(), UserId::from(1u128)).unwrap().is_some());
    }

    #[test]
    fn new_shamir_setup_replaces_live_one() {
        let dir = directory();
        let setup = |at: i64| ShamirSetup {
            user_id: UserId::from(2u128),
            created_on: DateTime::from_secs(at),
            deleted_on: None,
            threshold: 1,
            recipients: vec![ShamirShare { user_id: UserId::from(1u128), shares: 1 }],
            reveal_token: RevealToken::from(7u128),
            ciphered_data: vec![1, 2, 3],
        };
        dir.add_shamir_setup(&org(), setup(1));
        dir.add_shamir_setup(&org(), setup(2));

        let live = dir.shamir_setup(&org(), UserId::from(2u128)).unwrap().unwrap();
        assert_eq!(live.created_on, DateTime::from_secs(2));
        let old = dir
            .shamir_setup_created_on(&org(), UserId::from(2u128), DateTime::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(old.deleted_on, Some(DateTime::from_secs(2)));
    }

    #[test]
    fn user_enrollment_creates_user() {
        let dir = directory();
        let enrollment = Enrollment {
            token: InvitationToken::from(5u128),
            target: EnrollmentTarget::User { claimer_email: "bob@example.com".to_string() },
            greeter: UserId::from(1u128),
            claimer_payload: vec![1],
            greeter_payload: vec![2],
            timestamp: DateTime::from_secs(9),
        };
        dir.persist_enrollment(&org(), &enrollment).unwrap();

        assert!(dir.user_by_email(&org(), "bob@example.com").unwrap().is_some());
        assert_eq!(dir.enrollments(&org()), vec![enrollment.clone()]);

        dir.persist_enrollment(&org(), &enrollment).unwrap();
        assert_eq!(dir.enrollments(&org()).len(), 1);

        let duplicate = Enrollment { token: InvitationToken::from(6u128), ..enrollment };
        assert!(matches!(dir.persist_enrollment(&org(), &duplicate), Err(DirectoryError::Rejected(_))));
    }

    #[test]
    fn presence_defaults_to_unknown() {
        let dir = directory();
        assert_eq!(dir.online_status(&org(), UserId::from(1u128)).unwrap(), UserOnlineStatus::Unknown);
        dir.set_online_status(&org(), UserId::from(1u128), UserOnlineStatus::Online);
        assert_eq!(dir.online_status(&org(), UserId::from(1u128)).unwrap(), UserOnlineStatus::Online);
    }
}
