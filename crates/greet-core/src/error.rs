//! Error types of the invitation subsystem.
//!
//! Two layers:
//!
//! - [`ContextError`]: the call could not be attributed (unknown or expired
//!   organization, unknown or revoked author, unusable invitation token), its
//!   arguments are malformed, or a backend failed. Reported to the caller as an envelope-level
//!   [`ErrorPayload`], never as a command reply.
//! - One enum per command listing the domain outcomes clients branch on. Each
//!   maps one-to-one onto a variant of the command's wire reply.

use greet_proto::{CancelledGreetingAttempt, ErrorPayload};
use thiserror::Error;

use crate::{directory::DirectoryError, storage::StorageError};

/// Call context could not be established, or a backend failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// Organization does not exist
    #[error("organization not found")]
    OrganizationNotFound,

    /// Organization has expired
    #[error("organization expired")]
    OrganizationExpired,

    /// Author device or user does not exist
    #[error("author not found")]
    AuthorNotFound,

    /// Author user is revoked
    #[error("author revoked")]
    AuthorRevoked,

    /// Invitation token is unknown
    #[error("invitation not found")]
    InvitationNotFound,

    /// Invitation is no longer usable (completed, cancelled, or its shamir
    /// setup was deleted)
    #[error("invitation deleted")]
    InvitationDeleted,

    /// Request argument is malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Certificate directory failure
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
}

impl ContextError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Directory(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<&ContextError> for ErrorPayload {
    fn from(err: &ContextError) -> Self {
        let code = match err {
            ContextError::OrganizationNotFound => Self::ORGANIZATION_NOT_FOUND,
            ContextError::OrganizationExpired => Self::ORGANIZATION_EXPIRED,
            ContextError::AuthorNotFound => Self::AUTHOR_NOT_FOUND,
            ContextError::AuthorRevoked => Self::AUTHOR_REVOKED,
            ContextError::InvitationNotFound => Self::INVITATION_NOT_FOUND,
            ContextError::InvitationDeleted => Self::INVITATION_DELETED,
            ContextError::InvalidRequest(_) => Self::INVALID_REQUEST,
            ContextError::Storage(_) | ContextError::Directory(_) => Self::INTERNAL,
        };
        Self::new(code, err.to_string())
    }
}

/// Let `?` lift backend errors into any command error through its
/// `Context` variant.
macro_rules! context_errors {
    ($($name:ident),* $(,)?) => {
        $(
            impl From<StorageError> for $name {
                fn from(err: StorageError) -> Self {
                    Self::Context(ContextError::Storage(err))
                }
            }

            impl From<DirectoryError> for $name {
                fn from(err: DirectoryError) -> Self {
                    Self::Context(ContextError::Directory(err))
                }
            }
        )*
    };
}

/// `invite_new_user` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NewUserError {
    /// Author is not an administrator
    #[error("author not allowed")]
    AuthorNotAllowed,
    /// An active user already uses the email
    #[error("claimer email already enrolled")]
    ClaimerEmailAlreadyEnrolled,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_new_device` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NewDeviceError {
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_new_shamir_recovery` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NewShamirRecoveryError {
    /// Claimer has no live shamir setup, or author is not a recipient
    #[error("author not allowed")]
    AuthorNotAllowed,
    /// Claimer user does not exist
    #[error("user not found")]
    UserNotFound,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_cancel` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancelInvitationError {
    /// Unknown token
    #[error("invitation not found")]
    InvitationNotFound,
    /// Already completed
    #[error("invitation completed")]
    InvitationCompleted,
    /// Already cancelled
    #[error("invitation already cancelled")]
    InvitationAlreadyCancelled,
    /// Author may not cancel this invitation
    #[error("author not allowed")]
    AuthorNotAllowed,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_complete` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompleteError {
    /// Unknown token
    #[error("invitation not found")]
    InvitationNotFound,
    /// Invitation was cancelled
    #[error("invitation cancelled")]
    InvitationCancelled,
    /// Already completed
    #[error("invitation already completed")]
    InvitationAlreadyCompleted,
    /// Author is neither an allowed greeter nor the claimer
    #[error("author not allowed")]
    AuthorNotAllowed,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_greeter_start_greeting_attempt` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GreeterStartError {
    /// Unknown token
    #[error("invitation not found")]
    InvitationNotFound,
    /// Invitation was cancelled
    #[error("invitation cancelled")]
    InvitationCancelled,
    /// Invitation is completed
    #[error("invitation completed")]
    InvitationCompleted,
    /// Author may not greet this invitation
    #[error("author not allowed")]
    AuthorNotAllowed,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_claimer_start_greeting_attempt` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimerStartError {
    /// Unknown greeter
    #[error("greeter not found")]
    GreeterNotFound,
    /// Greeter is revoked
    #[error("greeter revoked")]
    GreeterRevoked,
    /// Greeter may not greet this invitation
    #[error("greeter not allowed")]
    GreeterNotAllowed,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_{greeter,claimer}_cancel_greeting_attempt` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancelAttemptError {
    /// Unknown attempt, or attempt of another greeter/invitation
    #[error("greeting attempt not found")]
    GreetingAttemptNotFound,
    /// Caller never joined the attempt
    #[error("greeting attempt not joined")]
    GreetingAttemptNotJoined,
    /// Attempt was already cancelled
    #[error("greeting attempt already cancelled by {} ({})", .0.origin, .0.reason)]
    GreetingAttemptAlreadyCancelled(CancelledGreetingAttempt),
    /// Invitation was cancelled
    #[error("invitation cancelled")]
    InvitationCancelled,
    /// Invitation is completed
    #[error("invitation completed")]
    InvitationCompleted,
    /// Author may not greet this invitation
    #[error("author not allowed")]
    AuthorNotAllowed,
    /// Greeter of the attempt is revoked (claimer side)
    #[error("greeter revoked")]
    GreeterRevoked,
    /// Greeter of the attempt may no longer greet (claimer side)
    #[error("greeter not allowed")]
    GreeterNotAllowed,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_{greeter,claimer}_step` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Unknown attempt, or attempt of another greeter/invitation
    #[error("greeting attempt not found")]
    GreetingAttemptNotFound,
    /// Caller never joined the attempt
    #[error("greeting attempt not joined")]
    GreetingAttemptNotJoined,
    /// Attempt is cancelled
    #[error("greeting attempt cancelled by {} ({})", .0.origin, .0.reason)]
    GreetingAttemptCancelled(CancelledGreetingAttempt),
    /// Caller skipped a step or exceeded the last one
    #[error("step too advanced")]
    StepTooAdvanced,
    /// Replay with different bytes, or failed nonce check
    #[error("step mismatch")]
    StepMismatch,
    /// Invitation is completed
    #[error("invitation completed")]
    InvitationCompleted,
    /// Invitation was cancelled
    #[error("invitation cancelled")]
    InvitationCancelled,
    /// Author may not greet this invitation
    #[error("author not allowed")]
    AuthorNotAllowed,
    /// Greeter of the attempt is revoked (claimer side)
    #[error("greeter revoked")]
    GreeterRevoked,
    /// Greeter of the attempt may no longer greet (claimer side)
    #[error("greeter not allowed")]
    GreeterNotAllowed,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `invite_shamir_recovery_reveal` outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevealError {
    /// Invitation is not a shamir recovery
    #[error("bad invitation type")]
    BadInvitationType,
    /// Reveal token does not match the live setup
    #[error("bad reveal token")]
    BadRevealToken,
    /// See [`ContextError`]
    #[error(transparent)]
    Context(#[from] ContextError),
}

context_errors!(
    NewUserError,
    NewDeviceError,
    NewShamirRecoveryError,
    CancelInvitationError,
    CompleteError,
    GreeterStartError,
    ClaimerStartError,
    CancelAttemptError,
    StepError,
    RevealError,
);

#[cfg(test)]
mod tests {
    use greet_proto::{CancelledGreetingAttemptReason, DateTime, GreeterOrClaimer};

    use super::*;

    #[test]
    fn context_errors_map_to_payload_codes() {
        let payload = ErrorPayload::from(&ContextError::InvitationDeleted);
        assert_eq!(payload.code, ErrorPayload::INVITATION_DELETED);

        let payload = ErrorPayload::from(&ContextError::Storage(StorageError::Io("disk".into())));
        assert_eq!(payload.code, ErrorPayload::INTERNAL);

        let payload = ErrorPayload::from(&ContextError::InvalidRequest("claimer email".into()));
        assert_eq!(payload.code, ErrorPayload::INVALID_REQUEST);
    }

    #[test]
    fn backend_errors_lift_through_question_mark() {
        fn fails() -> Result<(), StepError> {
            Err(StorageError::Io("disk".into()))?
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, StepError::Context(ContextError::Storage(_))));
    }

    #[test]
    fn cancelled_outcome_display() {
        let err = StepError::GreetingAttemptCancelled(CancelledGreetingAttempt {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::ManuallyCancelled,
            timestamp: DateTime::EPOCH,
        });
        assert_eq!(err.to_string(), "greeting attempt cancelled by CLAIMER (MANUALLY_CANCELLED)");
    }

    #[test]
    fn only_io_is_transient() {
        assert!(ContextError::Storage(StorageError::Io("x".into())).is_transient());
        assert!(!ContextError::Storage(StorageError::Serialization("x".into())).is_transient());
        assert!(!ContextError::AuthorRevoked.is_transient());
    }
}
