//! Deterministic simulation harness for the invitation subsystem.
//!
//! A [`SimWorld`] is one organization served by an in-memory controller,
//! with a virtual clock ([`SimEnv`]) and a recording mailer ([`SimMailer`]).
//! Requests go through the same dispatch as requests from the network.
//!
//! # Ceremonies
//!
//! The `ceremony` module implements both greeting clients: X25519 key
//! agreement, the nonce commitment, SAS derivation and payload sealing. A
//! [`Ceremony`] runs the nine steps against a world.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties of the stored state
//! after every request: uniqueness of pending invitations, immutability of
//! terminal records, one active attempt per greeter, and append-only step
//! logs. Use [`InvariantRegistry::standard()`] for all of them.
//!
//! # Model-Based Testing
//!
//! [`OperationDriver`] applies randomly generated [`Operation`]s and compares
//! invitation statuses with a reference model.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ceremony;
pub mod error;
pub mod invariants;
pub mod operation;
pub mod sim_env;
pub mod sim_mailer;
pub mod sim_world;

pub use ceremony::{Ceremony, ClaimerClient, GreeterClient};
pub use error::HarnessError;
pub use invariants::{Invariant, InvariantRegistry, InvariantResult, SystemSnapshot, Violation};
pub use operation::{Operation, OperationDriver, OperationOutcome};
pub use sim_env::SimEnv;
pub use sim_mailer::SimMailer;
pub use sim_world::{Created, ORGANIZATION, SimController, SimUser, SimWorld, rejection_code};
