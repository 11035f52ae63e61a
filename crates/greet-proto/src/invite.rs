//! Invitation and greeting attempt value types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    ids::{HumanHandle, InvitationToken, UserId},
    time::DateTime,
};

/// Kind of principal an invitation enrolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationType {
    /// A new human user
    User,
    /// A new device for an existing user
    Device,
    /// Recovery of an existing user through its shamir setup
    ShamirRecovery,
}

impl InvitationType {
    /// Action name used in invitation URLs (`claim_user`, ...).
    pub const fn claim_action(&self) -> &'static str {
        match self {
            Self::User => "claim_user",
            Self::Device => "claim_device",
            Self::ShamirRecovery => "claim_shamir_recovery",
        }
    }

    /// Reverse of [`InvitationType::claim_action`].
    pub fn from_claim_action(action: &str) -> Option<Self> {
        match action {
            "claim_user" => Some(Self::User),
            "claim_device" => Some(Self::Device),
            "claim_shamir_recovery" => Some(Self::ShamirRecovery),
            _ => None,
        }
    }
}

impl fmt::Display for InvitationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "USER",
            Self::Device => "DEVICE",
            Self::ShamirRecovery => "SHAMIR_RECOVERY",
        })
    }
}

/// Lifecycle status of an invitation.
///
/// `Completed` and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    /// Usable for greeting
    Pending,
    /// Enrollment done
    Completed,
    /// Revoked before completion
    Cancelled,
}

impl InvitationStatus {
    /// Whether the status can no longer change.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Side of a greeting attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GreeterOrClaimer {
    /// Authenticated enrolled device
    Greeter,
    /// Invitation token bearer
    Claimer,
}

impl GreeterOrClaimer {
    /// The other side.
    pub const fn peer(&self) -> Self {
        match self {
            Self::Greeter => Self::Claimer,
            Self::Claimer => Self::Greeter,
        }
    }
}

impl fmt::Display for GreeterOrClaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Greeter => "GREETER",
            Self::Claimer => "CLAIMER",
        })
    }
}

/// Why a greeting attempt was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelledGreetingAttemptReason {
    /// Human chose to abort
    ManuallyCancelled,
    /// Claimer nonce does not match the committed hash
    InvalidNonceHash,
    /// Human rejected the displayed SAS code
    InvalidSasCode,
    /// Peer payload could not be decrypted
    UndecipherablePayload,
    /// Peer payload could not be deserialized
    UndeserializablePayload,
    /// Peer payload is not consistent with what was exchanged before
    InconsistentPayload,
    /// Superseded by a new start from the same side
    AutomaticallyCancelled,
    /// Claimer started an attempt with another greeter
    StartMismatch,
}

impl fmt::Display for CancelledGreetingAttemptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ManuallyCancelled => "MANUALLY_CANCELLED",
            Self::InvalidNonceHash => "INVALID_NONCE_HASH",
            Self::InvalidSasCode => "INVALID_SAS_CODE",
            Self::UndecipherablePayload => "UNDECIPHERABLE_PAYLOAD",
            Self::UndeserializablePayload => "UNDESERIALIZABLE_PAYLOAD",
            Self::InconsistentPayload => "INCONSISTENT_PAYLOAD",
            Self::AutomaticallyCancelled => "AUTOMATICALLY_CANCELLED",
            Self::StartMismatch => "START_MISMATCH",
        })
    }
}

/// Final record of a cancelled greeting attempt.
///
/// Returned to whichever side touches the attempt afterwards, so both
/// parties learn who cancelled and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledGreetingAttempt {
    /// Side whose call cancelled the attempt
    pub origin: GreeterOrClaimer,
    /// Cancellation reason
    pub reason: CancelledGreetingAttemptReason,
    /// When the cancellation was recorded
    pub timestamp: DateTime,
}

/// Who issued an invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationCreatedBy {
    /// An authenticated user of the organization
    User {
        /// Creator user
        user_id: UserId,
        /// Creator identity at creation time
        human_handle: HumanHandle,
    },
    /// An external service acting on behalf of the organization
    ExternalService {
        /// Service name shown to claimers
        service_label: String,
    },
}

impl InvitationCreatedBy {
    /// Creator user, if created by a user.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User { user_id, .. } => Some(*user_id),
            Self::ExternalService { .. } => None,
        }
    }
}

/// Presence hint for a greeter, as known by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserOnlineStatus {
    /// Currently connected
    Online,
    /// Known to be disconnected
    Offline,
    /// Presence is not tracked
    Unknown,
}

/// Outcome of the optional invitation email.
///
/// Embedded in successful creation replies; a failed send never fails the
/// invitation creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationEmailSentStatus {
    /// Email handed to the mail server, or no email requested
    Success,
    /// Mail server unreachable
    ServerUnavailable,
    /// Mail server refused the recipient
    RecipientRefused,
    /// Mail delivery is not configured
    BadSmtpConfig,
}

/// Invitation as listed to an authenticated greeter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteListItem {
    /// Invitation for a new user
    User {
        /// Invitation token
        token: InvitationToken,
        /// Creation time
        created_on: DateTime,
        /// Creator
        created_by: InvitationCreatedBy,
        /// Email the invitation was issued for
        claimer_email: String,
        /// Current status
        status: InvitationStatus,
    },
    /// Invitation for a new device
    Device {
        /// Invitation token
        token: InvitationToken,
        /// Creation time
        created_on: DateTime,
        /// Creator
        created_by: InvitationCreatedBy,
        /// Current status
        status: InvitationStatus,
    },
    /// Invitation for a shamir recovery
    ShamirRecovery {
        /// Invitation token
        token: InvitationToken,
        /// Creation time
        created_on: DateTime,
        /// Creator
        created_by: InvitationCreatedBy,
        /// User being recovered
        claimer_user_id: UserId,
        /// Creation time of the shamir setup the invitation is bound to
        shamir_recovery_created_on: DateTime,
        /// Deletion time of that setup, if deleted
        shamir_recovery_deleted_on: Option<DateTime>,
        /// Current status
        status: InvitationStatus,
    },
}

impl InviteListItem {
    /// Invitation token.
    pub fn token(&self) -> InvitationToken {
        match self {
            Self::User { token, .. } | Self::Device { token, .. } => *token,
            Self::ShamirRecovery { token, .. } => *token,
        }
    }

    /// Current status.
    pub fn status(&self) -> InvitationStatus {
        match self {
            Self::User { status, .. } | Self::Device { status, .. } => *status,
            Self::ShamirRecovery { status, .. } => *status,
        }
    }

    /// Creation time.
    pub fn created_on(&self) -> DateTime {
        match self {
            Self::User { created_on, .. } | Self::Device { created_on, .. } => *created_on,
            Self::ShamirRecovery { created_on, .. } => *created_on,
        }
    }
}

/// Administrator able to greet a user invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGreetingAdministrator {
    /// Administrator user
    pub user_id: UserId,
    /// Administrator identity
    pub human_handle: HumanHandle,
    /// Presence hint
    pub online_status: UserOnlineStatus,
    /// Last time this administrator joined an attempt for the invitation
    pub last_greeting_attempt_joined_on: Option<DateTime>,
}

/// Recipient of a shamir recovery setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirRecoveryRecipient {
    /// Recipient user
    pub user_id: UserId,
    /// Recipient identity
    pub human_handle: HumanHandle,
    /// Number of shares held
    pub shares: u8,
    /// Revocation time, if revoked
    pub revoked_on: Option<DateTime>,
    /// Presence hint
    pub online_status: UserOnlineStatus,
}

/// Invitation details as seen by the claimer.
///
/// Greeter lists and presence are resolved on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationInfo {
    /// New user enrollment
    User {
        /// Email the invitation was issued for
        claimer_email: String,
        /// Creator
        created_by: InvitationCreatedBy,
        /// Administrators able to greet
        administrators: Vec<UserGreetingAdministrator>,
    },
    /// New device enrollment
    Device {
        /// User the device will belong to
        claimer_user_id: UserId,
        /// Identity of that user
        claimer_human_handle: HumanHandle,
        /// Creator
        created_by: InvitationCreatedBy,
    },
    /// Shamir recovery
    ShamirRecovery {
        /// User being recovered
        claimer_user_id: UserId,
        /// Identity of that user
        claimer_human_handle: HumanHandle,
        /// Creator
        created_by: InvitationCreatedBy,
        /// Shares needed to recover
        threshold: u8,
        /// Recipients able to greet
        recipients: Vec<ShamirRecoveryRecipient>,
    },
}
