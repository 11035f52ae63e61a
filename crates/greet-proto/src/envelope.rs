//! Request/response envelopes and stream framing.
//!
//! An envelope is CBOR-encoded and prefixed on the stream by its length as a
//! big-endian `u32`. The envelope carries the caller context, which the
//! transport is trusted to have authenticated.

use serde::{Deserialize, Serialize};

use crate::{
    cmds::{
        authenticated::{AuthenticatedRep, AuthenticatedReq},
        invited::{InvitedRep, InvitedReq},
    },
    errors::{ProtocolError, Result},
    ids::{DeviceId, InvitationToken, OrganizationId},
};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest accepted envelope (1 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 1 << 20;

/// Request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Request {
    /// Command from an enrolled device
    Authenticated {
        /// Organization of the author
        organization_id: OrganizationId,
        /// Author device
        author: DeviceId,
        /// Command
        req: AuthenticatedReq,
    },
    /// Command from an invitation token bearer
    Invited {
        /// Organization the invitation belongs to
        organization_id: OrganizationId,
        /// Invitation token
        token: InvitationToken,
        /// Command
        req: InvitedReq,
    },
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", content = "body", rename_all = "snake_case")]
pub enum Response {
    /// Reply to an authenticated command
    Authenticated(AuthenticatedRep),
    /// Reply to an invited command
    Invited(InvitedRep),
    /// Context error, the command was not executed
    Error(ErrorPayload),
}

/// Error reported instead of a command reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Organization does not exist.
    pub const ORGANIZATION_NOT_FOUND: u16 = 0x0001;
    /// Organization is expired.
    pub const ORGANIZATION_EXPIRED: u16 = 0x0002;
    /// Author device or user does not exist.
    pub const AUTHOR_NOT_FOUND: u16 = 0x0003;
    /// Author user is revoked.
    pub const AUTHOR_REVOKED: u16 = 0x0004;
    /// Invitation token is unknown.
    pub const INVITATION_NOT_FOUND: u16 = 0x0005;
    /// Invitation is no longer pending.
    pub const INVITATION_DELETED: u16 = 0x0006;
    /// Request could not be decoded.
    pub const INVALID_REQUEST: u16 = 0x0007;
    /// Server-side failure (storage, certificate store).
    pub const INTERNAL: u16 = 0x0008;

    /// Create an error payload.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Create an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, reason)
    }

    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, reason)
    }
}

impl Request {
    /// Encode to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_cbor(bytes)
    }

    /// Organization targeted by the request.
    pub fn organization_id(&self) -> &OrganizationId {
        match self {
            Self::Authenticated { organization_id, .. } | Self::Invited { organization_id, .. } => {
                organization_id
            },
        }
    }
}

impl Response {
    /// Encode to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_cbor(bytes)
    }
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

/// Prefix an encoded envelope with its length.
pub fn frame(envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::EnvelopeTooLarge {
            size: envelope.len(),
            max: MAX_ENVELOPE_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + envelope.len());
    buf.extend_from_slice(&(envelope.len() as u32).to_be_bytes());
    buf.extend_from_slice(envelope);
    Ok(buf)
}

/// Envelope length announced by a prefix, rejecting oversized envelopes.
pub fn envelope_len(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    let size = u32::from_be_bytes(prefix) as usize;
    if size > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::EnvelopeTooLarge { size, max: MAX_ENVELOPE_SIZE });
    }
    Ok(size)
}
