//! Commands issued by the bearer of an invitation token.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{GreetingAttemptId, RevealToken, UserId},
    invite::{CancelledGreetingAttemptReason, GreeterOrClaimer, InvitationInfo},
    steps::{ClaimerStep, GreeterStep},
    time::DateTime,
};

/// Request from the claimer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum InvitedReq {
    /// Fetch invitation details
    InviteInfo,
    /// Start or rejoin a greeting attempt with the chosen greeter
    InviteClaimerStartGreetingAttempt {
        /// Greeter to pair with
        greeter: UserId,
    },
    /// Cancel a greeting attempt as claimer
    InviteClaimerCancelGreetingAttempt {
        /// Attempt to cancel
        greeting_attempt: GreetingAttemptId,
        /// Why
        reason: CancelledGreetingAttemptReason,
    },
    /// Submit a claimer step
    InviteClaimerStep {
        /// Attempt the step belongs to
        greeting_attempt: GreetingAttemptId,
        /// Step to submit
        claimer_step: ClaimerStep,
    },
    /// Fetch the ciphered shamir recovery data
    InviteShamirRecoveryReveal {
        /// Secret learned from the recipients
        reveal_token: RevealToken,
    },
}

/// Reply to [`InvitedReq::InviteInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteInfoRep {
    /// Invitation details
    Ok {
        /// Details
        info: InvitationInfo,
    },
}

/// Reply to [`InvitedReq::InviteClaimerStartGreetingAttempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteClaimerStartGreetingAttemptRep {
    /// Attempt joined
    Ok {
        /// Attempt identifier
        greeting_attempt: GreetingAttemptId,
    },
    /// Unknown greeter
    GreeterNotFound,
    /// Greeter is revoked
    GreeterRevoked,
    /// Greeter may not greet this invitation
    GreeterNotAllowed,
}

/// Reply to [`InvitedReq::InviteClaimerCancelGreetingAttempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteClaimerCancelGreetingAttemptRep {
    /// Attempt cancelled
    Ok,
    /// Unknown attempt, or attempt of another invitation
    GreetingAttemptNotFound,
    /// Claimer never joined the attempt
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
    /// Greeter of the attempt has been revoked
    GreeterRevoked,
    /// Greeter of the attempt may no longer greet this invitation
    GreeterNotAllowed,
}

/// Reply to [`InvitedReq::InviteClaimerStep`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteClaimerStepRep {
    /// Both sides submitted this step; here is the greeter's
    Ok {
        /// Greeter step at the same index
        greeter_step: GreeterStep,
    },
    /// Greeter has not submitted this step yet, retry later
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
    /// Unknown attempt, or attempt of another invitation
    GreetingAttemptNotFound,
    /// Claimer never joined the attempt
    GreetingAttemptNotJoined,
    /// Previous steps are missing, or the index is past the last step
    StepTooAdvanced,
    /// Replay with different bytes or failed cross-step check
    StepMismatch,
    /// Greeter of the attempt has been revoked
    GreeterRevoked,
    /// Greeter of the attempt may no longer greet this invitation
    GreeterNotAllowed,
}

/// Reply to [`InvitedReq::InviteShamirRecoveryReveal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InviteShamirRecoveryRevealRep {
    /// Ciphered data, byte for byte as stored
    Ok {
        /// Ciphered shamir recovery data
        #[serde(with = "serde_bytes")]
        ciphered_data: Vec<u8>,
    },
    /// Invitation is not a shamir recovery
    BadInvitationType,
    /// Reveal token does not match, or the setup is deleted
    BadRevealToken,
}

/// Reply to any [`InvitedReq`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "rep", rename_all = "snake_case")]
pub enum InvitedRep {
    /// See [`InviteInfoRep`]
    InviteInfo(InviteInfoRep),
    /// See [`InviteClaimerStartGreetingAttemptRep`]
    InviteClaimerStartGreetingAttempt(InviteClaimerStartGreetingAttemptRep),
    /// See [`InviteClaimerCancelGreetingAttemptRep`]
    InviteClaimerCancelGreetingAttempt(InviteClaimerCancelGreetingAttemptRep),
    /// See [`InviteClaimerStepRep`]
    InviteClaimerStep(InviteClaimerStepRep),
    /// See [`InviteShamirRecoveryRevealRep`]
    InviteShamirRecoveryReveal(InviteShamirRecoveryRevealRep),
}
