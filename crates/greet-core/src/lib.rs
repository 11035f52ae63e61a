//! Invitation and greeting logic.
//!
//! Sans-IO core of the invitation subsystem: the [`InvitationRegistry`]
//! owns invitations, the [`GreetingArbiter`] pairs greeters with claimers,
//! the [`StepExchanger`] relays the nine ceremony steps, and the
//! [`InvitationController`] exposes all of it as request/response commands.
//!
//! Time and randomness come from an [`Environment`], records from a
//! [`Storage`], users and shamir setups from a [`CertificateStore`], and
//! email delivery goes through a [`Mailer`]. The server and the simulation
//! harness plug different implementations of each.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod arbiter;
pub mod config;
pub mod controller;
pub mod directory;
pub mod env;
pub mod error;
pub mod exchanger;
pub mod locks;
pub mod mailer;
pub mod registry;
pub mod storage;

pub use access::{AuthorContext, Backend, InvitedContext};
pub use arbiter::GreetingArbiter;
pub use config::InviteConfig;
pub use controller::InvitationController;
pub use directory::{CertificateStore, DirectoryError, MemoryDirectory};
pub use env::Environment;
pub use error::ContextError;
pub use exchanger::{ExchangeOutcome, StepExchanger, StepOutcome, exchange};
pub use mailer::{InvitationEmail, Mailer, SendEmailError};
pub use registry::{InvitationRegistry, NewInvitation};
pub use storage::{ChaoticStorage, MemoryStorage, Storage, StorageError};
