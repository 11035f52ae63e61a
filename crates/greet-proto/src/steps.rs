//! Greeting ceremony steps.
//!
//! The ceremony is nine ordered steps. At each index both sides submit a
//! step; at most one side (both at index 0) carries bytes, the other submits
//! an empty payload. Each side's steps are a closed sum type so that a
//! mismatched shape cannot be expressed.
//!
//! On the wire a step is `{ step: <index>, payload: <bytes> }`. The encoding
//! is the same for both sides, which lets the server relay the peer's stored
//! payload without understanding it.
//!
//! | Idx | Greeter sends   | Claimer sends        |
//! |-----|-----------------|----------------------|
//! | 0   | public key      | public key           |
//! | 1   |                 | hashed claimer nonce |
//! | 2   | greeter nonce   |                      |
//! | 3   |                 | claimer nonce        |
//! | 4   | (trust signal)  |                      |
//! | 5   |                 | (trust signal)       |
//! | 6   |                 | claimer payload      |
//! | 7   | greeter payload |                      |
//! | 8   |                 | (acknowledgement)    |

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    invite::GreeterOrClaimer,
};

/// Index of the last step.
pub const LAST_STEP_INDEX: u8 = 8;

/// Number of steps in a ceremony.
pub const STEP_COUNT: usize = LAST_STEP_INDEX as usize + 1;

/// Size of an X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the hashed claimer nonce.
pub const HASHED_NONCE_SIZE: usize = 32;

/// Shape a payload must have at a given index for a given side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// No bytes
    Empty,
    /// Exactly this many bytes
    Fixed(usize),
    /// At least one byte
    NonEmpty,
}

impl PayloadShape {
    /// Whether `payload` fits this shape.
    pub fn accepts(&self, payload: &[u8]) -> bool {
        match self {
            Self::Empty => payload.is_empty(),
            Self::Fixed(len) => payload.len() == *len,
            Self::NonEmpty => !payload.is_empty(),
        }
    }
}

/// Payload shape expected from `origin` at `index`, `None` past the last step.
pub const fn payload_shape(origin: GreeterOrClaimer, index: u8) -> Option<PayloadShape> {
    use GreeterOrClaimer::{Claimer, Greeter};
    use PayloadShape::{Empty, Fixed, NonEmpty};

    let shape = match (origin, index) {
        (_, 0) => Fixed(PUBLIC_KEY_SIZE),
        (Claimer, 1) => Fixed(HASHED_NONCE_SIZE),
        (Greeter, 2) | (Claimer, 3) | (Claimer, 6) | (Greeter, 7) => NonEmpty,
        (_, 1..=LAST_STEP_INDEX) => Empty,
        _ => return None,
    };
    Some(shape)
}

/// Side-agnostic wire form of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStep {
    /// Step index
    pub step: u8,
    /// Step payload, empty for non-bearing steps
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

fn check_shape(origin: GreeterOrClaimer, raw: &RawStep) -> Result<()> {
    let Some(shape) = payload_shape(origin, raw.step) else {
        return Err(ProtocolError::InvalidStep { index: raw.step, reason: "unknown step index" });
    };
    if shape.accepts(&raw.payload) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidStep { index: raw.step, reason: "unexpected payload size" })
    }
}

fn to_array<const N: usize>(index: u8, payload: &[u8]) -> Result<[u8; N]> {
    payload
        .try_into()
        .map_err(|_| ProtocolError::InvalidStep { index, reason: "unexpected payload size" })
}

/// Step submitted by the greeter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawStep", try_from = "RawStep")]
pub enum GreeterStep {
    /// 0: send ephemeral public key
    Number0WaitPeer {
        /// Greeter ephemeral public key
        public_key: [u8; PUBLIC_KEY_SIZE],
    },
    /// 1: receive the claimer's hashed nonce
    Number1GetHashedNonce,
    /// 2: reveal the greeter nonce
    Number2SendNonce {
        /// Greeter nonce
        greeter_nonce: Vec<u8>,
    },
    /// 3: receive the claimer nonce
    Number3GetNonce,
    /// 4: signal the claimer's SAS was confirmed by the greeter human
    Number4SignifyTrust,
    /// 5: wait for the claimer to trust the greeter SAS
    Number5WaitPeerTrust,
    /// 6: receive the claimer enrollment request
    Number6GetPayload,
    /// 7: send the enrollment response
    Number7SendPayload {
        /// Greeter payload
        greeter_payload: Vec<u8>,
    },
    /// 8: wait for the claimer acknowledgement
    Number8WaitPeerAcknowledgment,
}

impl GreeterStep {
    /// Step index.
    pub const fn index(&self) -> u8 {
        match self {
            Self::Number0WaitPeer { .. } => 0,
            Self::Number1GetHashedNonce => 1,
            Self::Number2SendNonce { .. } => 2,
            Self::Number3GetNonce => 3,
            Self::Number4SignifyTrust => 4,
            Self::Number5WaitPeerTrust => 5,
            Self::Number6GetPayload => 6,
            Self::Number7SendPayload { .. } => 7,
            Self::Number8WaitPeerAcknowledgment => 8,
        }
    }

    /// Payload bytes, empty for non-bearing steps.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Number0WaitPeer { public_key } => public_key,
            Self::Number2SendNonce { greeter_nonce } => greeter_nonce,
            Self::Number7SendPayload { greeter_payload } => greeter_payload,
            _ => &[],
        }
    }

    /// Rebuild a step from its wire form.
    pub fn from_raw(raw: RawStep) -> Result<Self> {
        check_shape(GreeterOrClaimer::Greeter, &raw)?;
        let RawStep { step, payload } = raw;
        Ok(match step {
            0 => Self::Number0WaitPeer { public_key: to_array(step, &payload)? },
            1 => Self::Number1GetHashedNonce,
            2 => Self::Number2SendNonce { greeter_nonce: payload },
            3 => Self::Number3GetNonce,
            4 => Self::Number4SignifyTrust,
            5 => Self::Number5WaitPeerTrust,
            6 => Self::Number6GetPayload,
            7 => Self::Number7SendPayload { greeter_payload: payload },
            _ => Self::Number8WaitPeerAcknowledgment,
        })
    }
}

impl From<GreeterStep> for RawStep {
    fn from(step: GreeterStep) -> Self {
        Self { step: step.index(), payload: step.payload().to_vec() }
    }
}

impl TryFrom<RawStep> for GreeterStep {
    type Error = ProtocolError;

    fn try_from(raw: RawStep) -> Result<Self> {
        Self::from_raw(raw)
    }
}

/// Step submitted by the claimer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawStep", try_from = "RawStep")]
pub enum ClaimerStep {
    /// 0: send ephemeral public key
    Number0WaitPeer {
        /// Claimer ephemeral public key
        public_key: [u8; PUBLIC_KEY_SIZE],
    },
    /// 1: commit to the claimer nonce
    Number1SendHashedNonce {
        /// Hash digest of the claimer nonce
        hashed_nonce: [u8; HASHED_NONCE_SIZE],
    },
    /// 2: receive the greeter nonce
    Number2GetNonce,
    /// 3: reveal the claimer nonce
    Number3SendNonce {
        /// Claimer nonce, must hash to the step 1 commitment
        claimer_nonce: Vec<u8>,
    },
    /// 4: wait for the greeter to trust the claimer SAS
    Number4WaitPeerTrust,
    /// 5: signal the greeter's SAS was confirmed by the claimer human
    Number5SignifyTrust,
    /// 6: send the enrollment request
    Number6SendPayload {
        /// Claimer payload
        claimer_payload: Vec<u8>,
    },
    /// 7: receive the enrollment response
    Number7GetPayload,
    /// 8: acknowledge the response
    Number8Acknowledge,
}

impl ClaimerStep {
    /// Step index.
    pub const fn index(&self) -> u8 {
        match self {
            Self::Number0WaitPeer { .. } => 0,
            Self::Number1SendHashedNonce { .. } => 1,
            Self::Number2GetNonce => 2,
            Self::Number3SendNonce { .. } => 3,
            Self::Number4WaitPeerTrust => 4,
            Self::Number5SignifyTrust => 5,
            Self::Number6SendPayload { .. } => 6,
            Self::Number7GetPayload => 7,
            Self::Number8Acknowledge => 8,
        }
    }

    /// Payload bytes, empty for non-bearing steps.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Number0WaitPeer { public_key } => public_key,
            Self::Number1SendHashedNonce { hashed_nonce } => hashed_nonce,
            Self::Number3SendNonce { claimer_nonce } => claimer_nonce,
            Self::Number6SendPayload { claimer_payload } => claimer_payload,
            _ => &[],
        }
    }

    /// Rebuild a step from its wire form.
    pub fn from_raw(raw: RawStep) -> Result<Self> {
        check_shape(GreeterOrClaimer::Claimer, &raw)?;
        let RawStep { step, payload } = raw;
        Ok(match step {
            0 => Self::Number0WaitPeer { public_key: to_array(step, &payload)? },
            1 => Self::Number1SendHashedNonce { hashed_nonce: to_array(step, &payload)? },
            2 => Self::Number2GetNonce,
            3 => Self::Number3SendNonce { claimer_nonce: payload },
            4 => Self::Number4WaitPeerTrust,
            5 => Self::Number5SignifyTrust,
            6 => Self::Number6SendPayload { claimer_payload: payload },
            7 => Self::Number7GetPayload,
            _ => Self::Number8Acknowledge,
        })
    }
}

impl From<ClaimerStep> for RawStep {
    fn from(step: ClaimerStep) -> Self {
        Self { step: step.index(), payload: step.payload().to_vec() }
    }
}

impl TryFrom<RawStep> for ClaimerStep {
    type Error = ProtocolError;

    fn try_from(raw: RawStep) -> Result<Self> {
        Self::from_raw(raw)
    }
}
