//! Commands issued by an authenticated device.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{GreetingAttemptId, InvitationToken, UserId},
    invite::{
        CancelledGreetingAttemptReason, GreeterOrClaimer, InvitationEmailSentStatus,
        InviteListItem,
    },
    steps::{ClaimerStep, GreeterStep},
    time::DateTime,
};

/// Request from an authenticated greeter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AuthenticatedReq {
    /// Invite a new user by email (administrators only)
    InviteNewUser {
        /// Email of the future user
        claimer_email: String,
        /// Whether to email the invitation link
        send_email: bool,
    },
    /// Invite a new device for the author's own user
    InviteNewDevice {
        /// Whether to email the invitation link
        send_email: bool,
    },
    /// Invite a user to recover its account through its shamir setup
    InviteNewShamirRecovery {
        /// User being recovered
        claimer_user_id: UserId,
        /// Whether to email the invitation link
        send_email: bool,
    },
    /// List invitations the author may greet
    InviteList,
    /// Cancel a pending invitation
    InviteCancel {
        /// Invitation to cancel
        token: InvitationToken,
    },
    /// Mark an invitation completed
    InviteComplete {
        /// Invitation to complete
        token: InvitationToken,
    },
    /// Start or rejoin a greeting attempt as greeter
    InviteGreeterStartGreetingAttempt {
        /// Invitation to greet
        token: InvitationToken,
    },
    /// Cancel a greeting attempt as greeter
    InviteGreeterCancelGreetingAttempt {
        /// Attempt to cancel
        greeting_attempt: GreetingAttemptId,
        /// Why
        reason: CancelledGreetingAttemptReason,
    },
    /// Submit a greeter step
    InviteGreeterStep {
        /// Attempt the step belongs to
        greeting_attempt: GreetingAttemptId,
        /// Step to submit
        greeter_step: GreeterStep,
    },
}

/// Reply to [`AuthenticatedReq::InviteNewUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteNewUserRep {
    /// Invitation created or already pending
    Ok {
        /// Invitation token
        token: InvitationToken,
        /// Email outcome
        email_sent_status: InvitationEmailSentStatus,
    },
    /// Author is not an administrator
    AuthorNotAllowed,
    /// An active user already uses this email
    ClaimerEmailAlreadyEnrolled,
}

/// Reply to [`AuthenticatedReq::InviteNewDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteNewDeviceRep {
    /// Invitation created or already pending
    Ok {
        /// Invitation token
        token: InvitationToken,
        /// Email outcome
        email_sent_status: InvitationEmailSentStatus,
    },
}

/// Reply to [`AuthenticatedReq::InviteNewShamirRecovery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteNewShamirRecoveryRep {
    /// Invitation created or already pending
    Ok {
        /// Invitation token
        token: InvitationToken,
        /// Email outcome
        email_sent_status: InvitationEmailSentStatus,
    },
    /// Author is not a recipient of the claimer's live shamir setup
    AuthorNotAllowed,
    /// Claimer user does not exist
    UserNotFound,
}

/// Reply to [`AuthenticatedReq::InviteList`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteListRep {
    /// Invitations the author may greet, oldest first
    Ok {
        /// Invitations
        invitations: Vec<InviteListItem>,
    },
}

/// Reply to [`AuthenticatedReq::InviteCancel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteCancelRep {
    /// Invitation cancelled
    Ok,
    /// Unknown token
    InvitationNotFound,
    /// Invitation already completed
    InvitationCompleted,
    /// Invitation already cancelled
    InvitationAlreadyCancelled,
    /// Author may not cancel this invitation
    AuthorNotAllowed,
}

/// Reply to [`AuthenticatedReq::InviteComplete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteCompleteRep {
    /// Invitation completed
    Ok,
    /// Unknown token
    InvitationNotFound,
    /// Invitation was cancelled
    InvitationCancelled,
    /// Invitation already completed
    InvitationAlreadyCompleted,
    /// Author is neither an allowed greeter nor the claimer
    AuthorNotAllowed,
}

/// Reply to [`AuthenticatedReq::InviteGreeterStartGreetingAttempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteGreeterStartGreetingAttemptRep {
    /// Attempt joined
    Ok {
        /// Attempt identifier
        greeting_attempt: GreetingAttemptId,
    },
    /// Unknown token
    InvitationNotFound,
    /// Invitation was cancelled
    InvitationCancelled,
    /// Invitation already completed
    InvitationCompleted,
    /// Author may not greet this invitation
    AuthorNotAllowed,
}

/// Reply to [`AuthenticatedReq::InviteGreeterCancelGreetingAttempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteGreeterCancelGreetingAttemptRep {
    /// Attempt cancelled
    Ok,
    /// Unknown attempt, or attempt of another greeter
    GreetingAttemptNotFound,
    /// Greeter never joined the attempt
    GreetingAttemptNotJoined,
    /// Attempt was already cancelled
    GreetingAttemptAlreadyCancelled {
        /// Side that cancelled
        origin: GreeterOrClaimer,
        /// Why
        reason: CancelledGreetingAttemptReason,
        /// When
        timestamp: DateTime,
    },
    /// Invitation was cancelled
    InvitationCancelled,
    /// Invitation already completed
    InvitationCompleted,
    /// Author may not greet this invitation
    AuthorNotAllowed,
}

/// Reply to [`AuthenticatedReq::InviteGreeterStep`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteGreeterStepRep {
    /// Both sides submitted this step; here is the claimer's
    Ok {
        /// Claimer step at the same index
        claimer_step: ClaimerStep,
    },
    /// Claimer has not submitted this step yet, retry later
    NotReady,
    /// Attempt is cancelled
    GreetingAttemptCancelled {
        /// Side that cancelled
        origin: GreeterOrClaimer,
        /// Why
        reason: CancelledGreetingAttemptReason,
        /// When
        timestamp: DateTime,
    },
    /// Unknown attempt, or attempt of another greeter
    GreetingAttemptNotFound,
    /// Greeter never joined the attempt
    GreetingAttemptNotJoined,
    /// Previous steps are missing, or the index is past the last step
    StepTooAdvanced,
    /// Replay with different bytes or failed cross-step check
    StepMismatch,
    /// Invitation already completed
    InvitationCompleted,
    /// Invitation was cancelled
    InvitationCancelled,
    /// Author may not greet this invitation
    AuthorNotAllowed,
}

/// Reply to any [`AuthenticatedReq`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "rep", rename_all = "snake_case")]
pub enum AuthenticatedRep {
    /// See [`InviteNewUserRep`]
    InviteNewUser(InviteNewUserRep),
    /// See [`InviteNewDeviceRep`]
    InviteNewDevice(InviteNewDeviceRep),
    /// See [`InviteNewShamirRecoveryRep`]
    InviteNewShamirRecovery(InviteNewShamirRecoveryRep),
    /// See [`InviteListRep`]
    InviteList(InviteListRep),
    /// See [`InviteCancelRep`]
    InviteCancel(InviteCancelRep),
    /// See [`InviteCompleteRep`]
    InviteComplete(InviteCompleteRep),
    /// See [`InviteGreeterStartGreetingAttemptRep`]
    InviteGreeterStartGreetingAttempt(InviteGreeterStartGreetingAttemptRep),
    /// See [`InviteGreeterCancelGreetingAttemptRep`]
    InviteGreeterCancelGreetingAttempt(InviteGreeterCancelGreetingAttemptRep),
    /// See [`InviteGreeterStepRep`]
    InviteGreeterStep(InviteGreeterStepRep),
}
