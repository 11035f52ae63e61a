//! Storage backends available to the server.
//!
//! The server runs on redb when given a database path and on
//! [`MemoryStorage`] otherwise. [`ServerStorage`] lets the rest of the server
//! stay monomorphic over that choice.

mod redb;

pub use greet_core::storage::{ChaoticStorage, MemoryStorage, Storage, StorageError};
use greet_core::storage::{StorageWrite, StoredAttempt, StoredInvitation};
use greet_proto::{GreetingAttemptId, InvitationToken, OrganizationId};

pub use self::redb::RedbStorage;

/// Storage selected at startup.
#[derive(Clone)]
pub enum ServerStorage {
    /// Volatile, lost on restart
    Memory(MemoryStorage),
    /// Durable redb database
    Redb(RedbStorage),
}

impl Storage for ServerStorage {
    fn load_invitation(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Option<StoredInvitation>, StorageError> {
        match self {
            Self::Memory(s) => s.load_invitation(org, token),
            Self::Redb(s) => s.load_invitation(org, token),
        }
    }

    fn list_invitations(&self, org: &OrganizationId) -> Result<Vec<StoredInvitation>, StorageError> {
        match self {
            Self::Memory(s) => s.list_invitations(org),
            Self::Redb(s) => s.list_invitations(org),
        }
    }

    fn load_attempt(
        &self,
        org: &OrganizationId,
        id: GreetingAttemptId,
    ) -> Result<Option<StoredAttempt>, StorageError> {
        match self {
            Self::Memory(s) => s.load_attempt(org, id),
            Self::Redb(s) => s.load_attempt(org, id),
        }
    }

    fn list_attempts(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Vec<StoredAttempt>, StorageError> {
        match self {
            Self::Memory(s) => s.list_attempts(org, token),
            Self::Redb(s) => s.list_attempts(org, token),
        }
    }

    fn commit(&self, org: &OrganizationId, writes: &[StorageWrite]) -> Result<(), StorageError> {
        match self {
            Self::Memory(s) => s.commit(org, writes),
            Self::Redb(s) => s.commit(org, writes),
        }
    }
}
