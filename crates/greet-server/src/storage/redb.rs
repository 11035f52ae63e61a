//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A batch
//! commit is one write transaction: it is validated and applied inside the
//! transaction, so a rejected or interrupted batch leaves nothing behind.

use std::{path::Path, sync::Arc};

use greet_core::storage::{Storage, StorageError, StorageWrite, StoredAttempt, StoredInvitation, validate_batch};
use greet_proto::{GreetingAttemptId, InvitationToken, OrganizationId};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

/// Table: invitations
/// Key: org id bytes, 0x00, token [16 bytes]
/// Value: CBOR-encoded `StoredInvitation`
const INVITATIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("invitations");

/// Table: attempts
/// Key: org id bytes, 0x00, attempt id [16 bytes]
/// Value: CBOR-encoded `StoredAttempt`
const ATTEMPTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("attempts");

/// Table: invitation_attempts
/// Key: org id bytes, 0x00, token [16 bytes], attempt id [16 bytes]
/// Value: empty (index of attempts by invitation)
const INVITATION_ATTEMPTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("invitation_attempts");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(INVITATIONS).map_err(io)?;
            let _ = txn.open_table(ATTEMPTS).map_err(io)?;
            let _ = txn.open_table(INVITATION_ATTEMPTS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn load_invitation(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Option<StoredInvitation>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(INVITATIONS).map_err(io)?;
        get(&table, &record_key(org, token.as_bytes()))
    }

    fn list_invitations(&self, org: &OrganizationId) -> Result<Vec<StoredInvitation>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(INVITATIONS).map_err(io)?;

        let (start, end) = org_range(org);
        let mut invitations = Vec::new();
        for result in table.range(start.as_slice()..end.as_slice()).map_err(io)? {
            let (_, value) = result.map_err(io)?;
            invitations.push(decode(value.value())?);
        }
        Ok(invitations)
    }

    fn load_attempt(
        &self,
        org: &OrganizationId,
        id: GreetingAttemptId,
    ) -> Result<Option<StoredAttempt>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(ATTEMPTS).map_err(io)?;
        get(&table, &record_key(org, id.as_bytes()))
    }

    fn list_attempts(
        &self,
        org: &OrganizationId,
        token: InvitationToken,
    ) -> Result<Vec<StoredAttempt>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let index = txn.open_table(INVITATION_ATTEMPTS).map_err(io)?;
        let attempts = txn.open_table(ATTEMPTS).map_err(io)?;

        let start = index_key(org, token, &[0; 16]);
        let end = index_key(org, token, &[0xff; 16]);

        let mut found = Vec::new();
        for result in index.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (key, _) = result.map_err(io)?;
            let id = attempt_id_of_index_key(key.value())?;
            let attempt = get(&attempts, &record_key(org, &id))?.ok_or_else(|| StorageError::NotFound {
                what: "attempt",
                key: GreetingAttemptId::from(id).hex(),
            })?;
            found.push(attempt);
        }
        Ok(found)
    }

    fn commit(&self, org: &OrganizationId, writes: &[StorageWrite]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut invitations = txn.open_table(INVITATIONS).map_err(io)?;
            let mut attempts = txn.open_table(ATTEMPTS).map_err(io)?;
            let mut index = txn.open_table(INVITATION_ATTEMPTS).map_err(io)?;

            // Dropping the transaction on error aborts it
            validate_batch(writes, |token| get(&invitations, &record_key(org, token.as_bytes())))?;

            for write in writes {
                match write {
                    StorageWrite::Invitation(invitation) => {
                        let key = record_key(org, invitation.token.as_bytes());
                        invitations.insert(key.as_slice(), encode(invitation)?.as_slice()).map_err(io)?;
                    },
                    StorageWrite::Attempt(attempt) => {
                        let key = record_key(org, attempt.id.as_bytes());
                        attempts.insert(key.as_slice(), encode(attempt)?.as_slice()).map_err(io)?;

                        let key = index_key(org, attempt.token, attempt.id.as_bytes());
                        let empty: &[u8] = &[];
                        index.insert(key.as_slice(), empty).map_err(io)?;
                    },
                }
            }
        }
        txn.commit().map_err(io)?;

        Ok(())
    }
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn get<T, Table>(table: &Table, key: &[u8]) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    Table: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(key).map_err(io)? {
        Some(value) => Ok(Some(decode(value.value())?)),
        None => Ok(None),
    }
}

/// Encode `(org, id)` as `org 0x00 id`.
///
/// Organization ids never contain 0x00, so every key of an organization
/// sorts between `org 0x00` and `org 0x01`.
fn record_key(org: &OrganizationId, id: &[u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(org.as_str().len() + 1 + 16);
    key.extend_from_slice(org.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(id);
    key
}

/// Encode `(org, token, attempt)` as `org 0x00 token attempt`.
fn index_key(org: &OrganizationId, token: InvitationToken, attempt: &[u8; 16]) -> Vec<u8> {
    let mut key = record_key(org, token.as_bytes());
    key.extend_from_slice(attempt);
    key
}

fn attempt_id_of_index_key(key: &[u8]) -> Result<[u8; 16], StorageError> {
    key.len()
        .checked_sub(16)
        .and_then(|start| key[start..].try_into().ok())
        .ok_or_else(|| StorageError::Serialization("index key too short".to_string()))
}

/// Half-open key range covering one organization.
fn org_range(org: &OrganizationId) -> (Vec<u8>, Vec<u8>) {
    let mut start = org.as_str().as_bytes().to_vec();
    let mut end = start.clone();
    start.push(0);
    end.push(1);
    (start, end)
}
