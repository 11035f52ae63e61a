//! Client side of the greeting ceremony.
//!
//! [`GreeterClient`] and [`ClaimerClient`] hold what a real client keeps in
//! memory during a greeting: the ephemeral key pair, nonces, the derived
//! shared key and the SAS codes. [`Ceremony`] drives both through a
//! [`SimWorld`], one step index at a time.
//!
//! At each index both sides submit, greeter first. The greeter usually sees
//! `NotReady`, the claimer then gets the greeter's step, and the greeter
//! replays its identical step to get the claimer's.

use greet_crypto::{HashDigest, NONCE_SIZE, PrivateKey, PublicKey, SasCode, SecretKey};
use greet_proto::{
    CancelledGreetingAttemptReason, ClaimerStep, GreeterStep, GreetingAttemptId, InvitationToken, LAST_STEP_INDEX,
    cmds::{
        authenticated::{InviteGreeterStartGreetingAttemptRep, InviteGreeterStepRep},
        invited::{InviteClaimerStartGreetingAttemptRep, InviteClaimerStepRep},
    },
};
use rand::RngCore;
use rand_chacha::ChaCha20Rng;

use crate::{HarnessError, SimUser, SimWorld};

/// Size of the nonces exchanged at steps 2 and 3.
pub const GREETING_NONCE_SIZE: usize = 64;

/// Number of SAS candidates shown to a human.
pub const SAS_CANDIDATES: usize = 4;

fn random_nonce(rng: &mut ChaCha20Rng) -> Vec<u8> {
    let mut nonce = vec![0u8; GREETING_NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    nonce
}

fn seal(key: Option<&SecretKey>, rng: &mut ChaCha20Rng, index: u8, plaintext: &[u8]) -> Result<Vec<u8>, HarnessError> {
    let key = key.ok_or(HarnessError::MissingPeerData(index))?;
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    Ok(key.encrypt(nonce, plaintext)?)
}

/// Greeter client state.
pub struct GreeterClient {
    rng: ChaCha20Rng,
    private_key: PrivateKey,
    nonce: Vec<u8>,
    payload: Vec<u8>,
    shared_key: Option<SecretKey>,
    claimer_hashed_nonce: Option<HashDigest>,
    sas: Option<(SasCode, SasCode)>,
    received: Option<Vec<u8>>,
}

impl GreeterClient {
    /// Fresh client that will answer the claimer with `payload`.
    pub fn new(mut rng: ChaCha20Rng, payload: Vec<u8>) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        let nonce = random_nonce(&mut rng);
        Self {
            rng,
            private_key: PrivateKey::from_bytes(key),
            nonce,
            payload,
            shared_key: None,
            claimer_hashed_nonce: None,
            sas: None,
            received: None,
        }
    }

    /// Ephemeral public key.
    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Step to submit at `index`.
    pub fn step(&mut self, index: u8) -> Result<GreeterStep, HarnessError> {
        Ok(match index {
            0 => GreeterStep::Number0WaitPeer { public_key: *self.public_key().as_bytes() },
            1 => GreeterStep::Number1GetHashedNonce,
            2 => GreeterStep::Number2SendNonce { greeter_nonce: self.nonce.clone() },
            3 => GreeterStep::Number3GetNonce,
            4 => GreeterStep::Number4SignifyTrust,
            5 => GreeterStep::Number5WaitPeerTrust,
            6 => GreeterStep::Number6GetPayload,
            7 => {
                let greeter_payload = seal(self.shared_key.as_ref(), &mut self.rng, index, &self.payload)?;
                GreeterStep::Number7SendPayload { greeter_payload }
            },
            _ => GreeterStep::Number8WaitPeerAcknowledgment,
        })
    }

    /// Process the claimer's step.
    pub fn receive(&mut self, step: &ClaimerStep) -> Result<(), HarnessError> {
        match step {
            ClaimerStep::Number0WaitPeer { public_key } => {
                let peer = PublicKey::from_bytes(*public_key);
                self.shared_key = Some(self.private_key.generate_shared_secret_key(&peer));
            },
            ClaimerStep::Number1SendHashedNonce { hashed_nonce } => {
                self.claimer_hashed_nonce = Some(HashDigest::from_bytes(*hashed_nonce));
            },
            ClaimerStep::Number3SendNonce { claimer_nonce } => {
                let commitment = self.claimer_hashed_nonce.ok_or(HarnessError::MissingPeerData(3))?;
                if !commitment.matches(claimer_nonce) {
                    return Err(HarnessError::NonceMismatch);
                }
                let key = self.shared_key.as_ref().ok_or(HarnessError::MissingPeerData(3))?;
                self.sas = Some(SasCode::generate_sas_codes(claimer_nonce, &self.nonce, key));
            },
            ClaimerStep::Number6SendPayload { claimer_payload } => {
                let key = self.shared_key.as_ref().ok_or(HarnessError::MissingPeerData(6))?;
                self.received = Some(key.decrypt(claimer_payload)?);
            },
            _ => {},
        }
        Ok(())
    }

    /// `(claimer_sas, greeter_sas)` once step 3 is done.
    pub fn sas(&self) -> Option<&(SasCode, SasCode)> {
        self.sas.as_ref()
    }

    /// SAS candidates offered to the greeter human, the claimer's among them.
    pub fn claimer_sas_candidates(&mut self) -> Result<Vec<SasCode>, HarnessError> {
        let (claimer_sas, _) = self.sas.as_ref().ok_or(HarnessError::MissingPeerData(4))?;
        Ok(SasCode::generate_sas_code_candidates(claimer_sas, SAS_CANDIDATES, &mut self.rng))
    }

    /// Decrypted claimer payload, once step 6 is done.
    pub fn received_payload(&self) -> Option<&[u8]> {
        self.received.as_deref()
    }
}

/// Claimer client state.
pub struct ClaimerClient {
    rng: ChaCha20Rng,
    private_key: PrivateKey,
    nonce: Vec<u8>,
    payload: Vec<u8>,
    shared_key: Option<SecretKey>,
    sas: Option<(SasCode, SasCode)>,
    received: Option<Vec<u8>>,
}

impl ClaimerClient {
    /// Fresh client that will request enrollment with `payload`.
    pub fn new(mut rng: ChaCha20Rng, payload: Vec<u8>) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        let nonce = random_nonce(&mut rng);
        Self {
            rng,
            private_key: PrivateKey::from_bytes(key),
            nonce,
            payload,
            shared_key: None,
            sas: None,
            received: None,
        }
    }

    /// Ephemeral public key.
    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }

    /// Nonce the claimer commits to at step 1.
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Swap the nonce, as a claimer that lies about its commitment would.
    pub fn replace_nonce(&mut self, nonce: Vec<u8>) {
        self.nonce = nonce;
    }

    /// Step to submit at `index`.
    pub fn step(&mut self, index: u8) -> Result<ClaimerStep, HarnessError> {
        Ok(match index {
            0 => ClaimerStep::Number0WaitPeer { public_key: *self.public_key().as_bytes() },
            1 => ClaimerStep::Number1SendHashedNonce { hashed_nonce: *HashDigest::from_data(&self.nonce).as_bytes() },
            2 => ClaimerStep::Number2GetNonce,
            3 => ClaimerStep::Number3SendNonce { claimer_nonce: self.nonce.clone() },
            4 => ClaimerStep::Number4WaitPeerTrust,
            5 => ClaimerStep::Number5SignifyTrust,
            6 => {
                let claimer_payload = seal(self.shared_key.as_ref(), &mut self.rng, index, &self.payload)?;
                ClaimerStep::Number6SendPayload { claimer_payload }
            },
            7 => ClaimerStep::Number7GetPayload,
            _ => ClaimerStep::Number8Acknowledge,
        })
    }

    /// Process the greeter's step.
    pub fn receive(&mut self, step: &GreeterStep) -> Result<(), HarnessError> {
        match step {
            GreeterStep::Number0WaitPeer { public_key } => {
                let peer = PublicKey::from_bytes(*public_key);
                self.shared_key = Some(self.private_key.generate_shared_secret_key(&peer));
            },
            GreeterStep::Number2SendNonce { greeter_nonce } => {
                let key = self.shared_key.as_ref().ok_or(HarnessError::MissingPeerData(2))?;
                self.sas = Some(SasCode::generate_sas_codes(&self.nonce, greeter_nonce, key));
            },
            GreeterStep::Number7SendPayload { greeter_payload } => {
                let key = self.shared_key.as_ref().ok_or(HarnessError::MissingPeerData(7))?;
                self.received = Some(key.decrypt(greeter_payload)?);
            },
            _ => {},
        }
        Ok(())
    }

    /// `(claimer_sas, greeter_sas)` once step 2 is done.
    pub fn sas(&self) -> Option<&(SasCode, SasCode)> {
        self.sas.as_ref()
    }

    /// Decrypted greeter payload, once step 7 is done.
    pub fn received_payload(&self) -> Option<&[u8]> {
        self.received.as_deref()
    }
}

/// Greeter and claimer running one greeting through a [`SimWorld`].
pub struct Ceremony {
    greeter_user: SimUser,
    token: InvitationToken,
    greeter: GreeterClient,
    claimer: ClaimerClient,
    attempt: Option<GreetingAttemptId>,
    next_index: u8,
    greeter_trusts_sas: bool,
}

impl Ceremony {
    /// Ceremony for invitation `token` greeted by `greeter_user`.
    pub fn new(world: &SimWorld, greeter_user: &SimUser, token: InvitationToken) -> Self {
        Self::with_payloads(
            world,
            greeter_user,
            token,
            b"claimer enrollment request".to_vec(),
            b"greeter enrollment response".to_vec(),
        )
    }

    /// Ceremony with explicit enrollment payloads.
    pub fn with_payloads(
        world: &SimWorld,
        greeter_user: &SimUser,
        token: InvitationToken,
        claimer_payload: Vec<u8>,
        greeter_payload: Vec<u8>,
    ) -> Self {
        Self {
            greeter_user: greeter_user.clone(),
            token,
            greeter: GreeterClient::new(world.env().fork_rng(), greeter_payload),
            claimer: ClaimerClient::new(world.env().fork_rng(), claimer_payload),
            attempt: None,
            next_index: 0,
            greeter_trusts_sas: true,
        }
    }

    /// Make the greeter human pick a wrong SAS candidate at step 4.
    pub fn distrust_sas(mut self) -> Self {
        self.greeter_trusts_sas = false;
        self
    }

    /// Attempt joined by both sides, once started.
    pub fn attempt(&self) -> Option<GreetingAttemptId> {
        self.attempt
    }

    /// Index of the next step to exchange.
    pub fn next_index(&self) -> u8 {
        self.next_index
    }

    /// Greeter client.
    pub fn greeter(&self) -> &GreeterClient {
        &self.greeter
    }

    /// Claimer client.
    pub fn claimer(&self) -> &ClaimerClient {
        &self.claimer
    }

    /// Mutable claimer client, to tamper with its steps.
    pub fn claimer_mut(&mut self) -> &mut ClaimerClient {
        &mut self.claimer
    }

    /// Join the same attempt from both sides.
    pub fn start(&mut self, world: &mut SimWorld) -> Result<GreetingAttemptId, HarnessError> {
        let greeter_attempt = match world.greeter_start(&self.greeter_user, self.token)? {
            InviteGreeterStartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
            other => return Err(HarnessError::unexpected("greeter start ok", &other)),
        };
        let claimer_attempt = match world.claimer_start(self.token, self.greeter_user.user_id)? {
            InviteClaimerStartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
            other => return Err(HarnessError::unexpected("claimer start ok", &other)),
        };
        if greeter_attempt != claimer_attempt {
            return Err(HarnessError::unexpected("both sides on one attempt", &(greeter_attempt, claimer_attempt)));
        }

        tracing::debug!(attempt = %greeter_attempt, token = %self.token, "ceremony started");
        self.attempt = Some(greeter_attempt);
        self.next_index = 0;
        Ok(greeter_attempt)
    }

    /// Exchange the step at the next index.
    pub fn exchange(&mut self, world: &mut SimWorld) -> Result<(), HarnessError> {
        let index = self.next_index;
        let attempt = self.attempt.ok_or(HarnessError::MissingPeerData(index))?;

        if index == 4 {
            self.confirm_sas(world, attempt)?;
        }

        let greeter_step = self.greeter.step(index)?;
        let claimer_step = self.claimer.step(index)?;

        let first = world.greeter_step(&self.greeter_user, attempt, greeter_step.clone())?;
        let from_greeter = match world.claimer_step(self.token, attempt, claimer_step)? {
            InviteClaimerStepRep::Ok { greeter_step } => greeter_step,
            other => return Err(HarnessError::unexpected("claimer step ok", &other)),
        };
        let from_claimer = match first {
            InviteGreeterStepRep::Ok { claimer_step } => claimer_step,
            InviteGreeterStepRep::NotReady => match world.greeter_step(&self.greeter_user, attempt, greeter_step)? {
                InviteGreeterStepRep::Ok { claimer_step } => claimer_step,
                other => return Err(HarnessError::unexpected("greeter replay ok", &other)),
            },
            other => return Err(HarnessError::unexpected("greeter step ok or not ready", &other)),
        };

        self.claimer.receive(&from_greeter)?;
        if let Err(error) = self.greeter.receive(&from_claimer) {
            if matches!(error, HarnessError::NonceMismatch) {
                world.greeter_cancel(&self.greeter_user, attempt, CancelledGreetingAttemptReason::InvalidNonceHash)?;
            }
            return Err(error);
        }

        tracing::trace!(%attempt, index, "step exchanged");
        self.next_index += 1;
        Ok(())
    }

    /// Exchange steps up to and including `last_index`.
    pub fn run_to(&mut self, world: &mut SimWorld, last_index: u8) -> Result<(), HarnessError> {
        if self.attempt.is_none() {
            self.start(world)?;
        }
        while self.next_index <= last_index.min(LAST_STEP_INDEX) {
            self.exchange(world)?;
        }
        Ok(())
    }

    /// Run all nine steps.
    pub fn run(&mut self, world: &mut SimWorld) -> Result<(), HarnessError> {
        self.run_to(world, LAST_STEP_INDEX)
    }

    fn confirm_sas(&mut self, world: &mut SimWorld, attempt: GreetingAttemptId) -> Result<(), HarnessError> {
        let displayed =
            self.claimer.sas().map(|(claimer_sas, _)| claimer_sas.clone()).ok_or(HarnessError::MissingPeerData(4))?;
        let candidates = self.greeter.claimer_sas_candidates()?;
        let picked = if self.greeter_trusts_sas {
            candidates.into_iter().find(|c| *c == displayed)
        } else {
            candidates.into_iter().find(|c| *c != displayed)
        };

        if picked.as_ref() == Some(&displayed) {
            return Ok(());
        }
        tracing::debug!(%attempt, "greeter rejected the claimer SAS");
        world.greeter_cancel(&self.greeter_user, attempt, CancelledGreetingAttemptReason::InvalidSasCode)?;
        Err(HarnessError::SasMismatch)
    }
}
