//! Command request/reply pairs.
//!
//! Two families: [`authenticated`] commands carry an `(organization, author
//! device)` context established by the transport, [`invited`] commands carry
//! an `(organization, invitation token)` context. Every reply is a tagged
//! union whose variants are the expected outcomes of the command; misuse and
//! revocation are reported out-of-band through
//! [`ErrorPayload`](crate::envelope::ErrorPayload).

pub mod authenticated;
pub mod invited;
