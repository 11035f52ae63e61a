//! Opaque identifiers.
//!
//! Every 128-bit identifier is a thin newtype over `[u8; 16]`. Equality,
//! ordering and hashing are byte-wise and construction from a 16-byte array
//! is total. Identifiers display as 32 lowercase hex characters.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

macro_rules! impl_byte_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name([u8; 16]);

        impl $name {
            /// Wrap raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Build from a slice, which must be exactly 16 bytes long.
            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                let array: [u8; 16] = bytes.try_into().map_err(|_| {
                    ProtocolError::InvalidLength { expected: 16, got: bytes.len() }
                })?;
                Ok(Self(array))
            }

            /// Raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Value as a big-endian integer.
            pub const fn as_u128(&self) -> u128 {
                u128::from_be_bytes(self.0)
            }

            /// Lowercase hex representation.
            pub fn hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }
        }

        impl From<u128> for $name {
            fn from(value: u128) -> Self {
                Self(value.to_be_bytes())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self> {
                let bytes = hex::decode(s).map_err(|e| ProtocolError::InvalidHex(e.to_string()))?;
                Self::from_slice(&bytes)
            }
        }
    };
}

impl_byte_id!(
    /// Capability token of an invitation. Whoever holds it can act as the
    /// claimer.
    InvitationToken
);

impl_byte_id!(
    /// Identifier of one greeting attempt between a greeter and the claimer.
    GreetingAttemptId
);

impl_byte_id!(
    /// Identifier of an enrolled user.
    UserId
);

impl_byte_id!(
    /// Identifier of an enrolled device.
    DeviceId
);

impl_byte_id!(
    /// Secret gating access to the ciphered data of a shamir recovery setup.
    RevealToken
);

/// Maximum length of an organization identifier.
pub const ORGANIZATION_ID_MAX_LEN: usize = 32;

/// Organization identifier.
///
/// 1 to 32 characters from `[A-Za-z0-9_-]`. Validation happens on every
/// construction path, including deserialization.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationId(String);

impl OrganizationId {
    /// Validate and wrap an organization identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= ORGANIZATION_ID_MAX_LEN
            && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

        if valid { Ok(Self(id)) } else { Err(ProtocolError::InvalidOrganizationId(id)) }
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrganizationId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OrganizationId> for String {
    fn from(value: OrganizationId) -> Self {
        value.0
    }
}

impl FromStr for OrganizationId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for OrganizationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrganizationId({})", self.0)
    }
}

/// Human-facing identity of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HumanHandle {
    /// Email address, unique among active users of an organization
    pub email: String,
    /// Display name
    pub label: String,
}

impl HumanHandle {
    /// Create a human handle.
    pub fn new(email: impl Into<String>, label: impl Into<String>) -> Self {
        Self { email: email.into(), label: label.into() }
    }
}

impl fmt::Display for HumanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.label, self.email)
    }
}
