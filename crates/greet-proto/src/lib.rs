//! Wire protocol of the invitation and greeting subsystem.
//!
//! Value types shared by the server, clients and the simulation harness:
//! identifiers, invitation metadata, the nine-step greeting ceremony, the
//! authenticated and invited command families, and the CBOR envelope used on
//! the stream.
//!
//! # Invariants
//!
//! - Step variants are closed: every `(side, index)` pair has exactly one
//!   variant, and its payload shape is checked on decode.
//! - Greeter and claimer steps share one wire form (`RawStep`), so the server
//!   can relay the peer's stored bytes as-is.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod addr;
pub mod cmds;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod invite;
pub mod steps;
pub mod time;

pub use addr::{InvitationAddr, ServerAddr};
pub use envelope::{ErrorPayload, Request, Response};
pub use errors::{ProtocolError, Result};
pub use ids::{
    DeviceId, GreetingAttemptId, HumanHandle, InvitationToken, OrganizationId, RevealToken, UserId,
};
pub use invite::{
    CancelledGreetingAttempt, CancelledGreetingAttemptReason, GreeterOrClaimer, InvitationCreatedBy,
    InvitationEmailSentStatus, InvitationInfo, InvitationStatus, InvitationType, InviteListItem,
    ShamirRecoveryRecipient, UserGreetingAdministrator, UserOnlineStatus,
};
pub use steps::{ClaimerStep, GreeterStep, LAST_STEP_INDEX, PayloadShape, RawStep, STEP_COUNT};
pub use time::DateTime;
