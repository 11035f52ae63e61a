//! Step exchanger: the per-attempt rendezvous.
//!
//! Each side appends its steps to its own log on the attempt. A call at index
//! `i` returns the peer's payload at `i` once it exists and `NotReady`
//! before. Nothing ever blocks waiting for the peer; clients poll.
//!
//! # Invariants
//!
//! - A caller may only submit the step right after its last one, or replay
//!   one it already submitted
//! - Replays with identical bytes are idempotent; replays with different
//!   bytes cancel the attempt
//! - The claimer nonce revealed at step 3 must hash to the step 1 commitment
//! - Once cancelled, every call returns the same cancellation record

use greet_crypto::HashDigest;
use greet_proto::{
    CancelledGreetingAttempt, CancelledGreetingAttemptReason, ClaimerStep, DateTime, GreeterOrClaimer,
    GreeterStep, GreetingAttemptId, LAST_STEP_INDEX, OrganizationId, RawStep,
};

use crate::{
    access::{AttemptDenied, AuthorContext, Backend, InvitedContext},
    directory::CertificateStore,
    env::Environment,
    error::{ContextError, StepError},
    storage::{Storage, StorageError, StorageWrite, StepRecord, StoredAttempt, StoredInvitation},
};

/// Step at which the claimer commits to its nonce.
const NONCE_COMMIT_INDEX: usize = 1;

/// Step at which the claimer reveals its nonce.
const NONCE_REVEAL_INDEX: usize = 3;

/// Result of one exchange on an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Peer payload at the same index
    Ready(Vec<u8>),
    /// Peer has not reached this index yet
    NotReady,
    /// Attempt is cancelled
    Cancelled(CancelledGreetingAttempt),
    /// Caller never joined the attempt
    NotJoined,
    /// Caller skipped a step, or the index is past the last step
    TooAdvanced,
    /// Replay with different bytes, or nonce commitment not honoured. The
    /// attempt has been cancelled.
    Mismatch,
}

/// Apply one step submission to `attempt`.
///
/// Pure state transition: the caller persists `attempt` if it changed.
pub fn exchange(
    attempt: &mut StoredAttempt,
    origin: GreeterOrClaimer,
    index: u8,
    payload: &[u8],
    now: DateTime,
) -> ExchangeOutcome {
    if let Some(cancelled) = attempt.cancelled {
        return ExchangeOutcome::Cancelled(cancelled);
    }
    if attempt.joined(origin).is_none() {
        return ExchangeOutcome::NotJoined;
    }
    if index > LAST_STEP_INDEX {
        return ExchangeOutcome::TooAdvanced;
    }

    let index = usize::from(index);
    let own = attempt.steps(origin);

    if let Some(previous) = own.get(index) {
        if previous.payload != payload {
            return cancel_on_mismatch(attempt, origin, CancelledGreetingAttemptReason::InconsistentPayload, now);
        }
    } else if index > own.len() {
        return ExchangeOutcome::TooAdvanced;
    } else {
        if origin == GreeterOrClaimer::Claimer
            && index == NONCE_REVEAL_INDEX
            && !nonce_commitment_holds(own, payload)
        {
            return cancel_on_mismatch(attempt, origin, CancelledGreetingAttemptReason::InvalidNonceHash, now);
        }
        attempt.steps_mut(origin).push(StepRecord { payload: payload.to_vec(), submitted_on: now });
    }

    match attempt.steps(origin.peer()).get(index) {
        Some(peer) => ExchangeOutcome::Ready(peer.payload.clone()),
        None => ExchangeOutcome::NotReady,
    }
}

fn nonce_commitment_holds(claimer_steps: &[StepRecord], nonce: &[u8]) -> bool {
    claimer_steps
        .get(NONCE_COMMIT_INDEX)
        .is_some_and(|commitment| HashDigest::from_data(nonce).as_bytes().as_slice() == commitment.payload.as_slice())
}

fn cancel_on_mismatch(
    attempt: &mut StoredAttempt,
    origin: GreeterOrClaimer,
    reason: CancelledGreetingAttemptReason,
    now: DateTime,
) -> ExchangeOutcome {
    attempt.cancelled = Some(CancelledGreetingAttempt { origin, reason, timestamp: now });
    ExchangeOutcome::Mismatch
}

/// Answer to a step that was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    /// Peer step at the same index
    Ready(T),
    /// Peer has not submitted this step yet
    NotReady,
}

/// Runs step submissions against stored attempts.
#[derive(Clone)]
pub struct StepExchanger<E, S, D> {
    backend: Backend<E, S, D>,
}

impl<E, S, D> StepExchanger<E, S, D>
where
    E: Environment,
    S: Storage,
    D: CertificateStore,
{
    /// Exchanger over a shared backend.
    pub fn new(backend: Backend<E, S, D>) -> Self {
        Self { backend }
    }

    /// Submit a greeter step and get the claimer's step at the same index.
    pub fn greeter_step(
        &self,
        author: &AuthorContext,
        attempt_id: GreetingAttemptId,
        step: &GreeterStep,
    ) -> Result<StepOutcome<ClaimerStep>, StepError> {
        let peer = self.run(
            &author.organization_id,
            attempt_id,
            GreeterOrClaimer::Greeter,
            step.index(),
            step.payload(),
            |attempt, invitation| self.backend.check_greeter_access(author, attempt, invitation),
        )?;

        match peer {
            Some(payload) => ClaimerStep::from_raw(RawStep { step: step.index(), payload })
                .map(StepOutcome::Ready)
                .map_err(|e| corrupted(&e)),
            None => Ok(StepOutcome::NotReady),
        }
    }

    /// Submit a claimer step and get the greeter's step at the same index.
    pub fn claimer_step(
        &self,
        invited: &InvitedContext,
        attempt_id: GreetingAttemptId,
        step: &ClaimerStep,
    ) -> Result<StepOutcome<GreeterStep>, StepError> {
        let peer = self.run(
            &invited.organization_id,
            attempt_id,
            GreeterOrClaimer::Claimer,
            step.index(),
            step.payload(),
            |attempt, invitation| self.backend.check_claimer_access(invited, attempt, invitation),
        )?;

        match peer {
            Some(payload) => GreeterStep::from_raw(RawStep { step: step.index(), payload })
                .map(StepOutcome::Ready)
                .map_err(|e| corrupted(&e)),
            None => Ok(StepOutcome::NotReady),
        }
    }

    fn run(
        &self,
        org: &OrganizationId,
        attempt_id: GreetingAttemptId,
        origin: GreeterOrClaimer,
        index: u8,
        payload: &[u8],
        check: impl FnOnce(&StoredAttempt, &StoredInvitation) -> Result<(), AttemptDenied>,
    ) -> Result<Option<Vec<u8>>, StepError> {
        let _guard = self.backend.lock_attempt(org, attempt_id);

        let (mut attempt, invitation) = self.backend.load_attempt(org, attempt_id)?;
        check(&attempt, &invitation)?;

        let before = attempt.clone();
        let outcome = exchange(&mut attempt, origin, index, payload, self.backend.env.now());
        if attempt != before {
            self.backend.storage.commit(org, &[StorageWrite::Attempt(attempt.clone())])?;
        }

        match outcome {
            ExchangeOutcome::Ready(peer) => {
                tracing::debug!(organization_id = %org, attempt_id = %attempt_id, %origin, index, "step exchanged");
                Ok(Some(peer))
            },
            ExchangeOutcome::NotReady => Ok(None),
            ExchangeOutcome::Cancelled(cancelled) => Err(StepError::GreetingAttemptCancelled(cancelled)),
            ExchangeOutcome::NotJoined => Err(StepError::GreetingAttemptNotJoined),
            ExchangeOutcome::TooAdvanced => Err(StepError::StepTooAdvanced),
            ExchangeOutcome::Mismatch => {
                tracing::warn!(
                    organization_id = %org,
                    attempt_id = %attempt_id,
                    %origin,
                    index,
                    reason = ?attempt.cancelled.map(|c| c.reason),
                    "step mismatch, greeting attempt cancelled"
                );
                Err(StepError::StepMismatch)
            },
        }
    }
}

fn corrupted(err: &greet_proto::ProtocolError) -> StepError {
    StepError::Context(ContextError::Storage(StorageError::Serialization(format!("stored step is malformed: {err}"))))
}

#[cfg(test)]
mod tests {
    use greet_proto::{InvitationToken, STEP_COUNT, UserId};
    use proptest::prelude::*;

    use super::*;

    use GreeterOrClaimer::{Claimer, Greeter};

    fn t(secs: i64) -> DateTime {
        DateTime::from_secs(secs)
    }

    fn joined_attempt() -> StoredAttempt {
        let mut attempt = StoredAttempt::joined_by(
            GreetingAttemptId::from(1u128),
            InvitationToken::from(2u128),
            UserId::from(3u128),
            Greeter,
            t(0),
        );
        attempt.join(Claimer, t(0));
        attempt
    }

    /// Payload a well-behaved side submits at `index`, nonce commitment honoured.
    fn honest_payload(origin: GreeterOrClaimer, index: u8) -> Vec<u8> {
        match (origin, index) {
            (Greeter, 0) => vec![0x67; 32],
            (Claimer, 0) => vec![0x63; 32],
            (Claimer, 1) => HashDigest::from_data(b"claimer nonce").as_bytes().to_vec(),
            (Claimer, 3) => b"claimer nonce".to_vec(),
            (Greeter, 2) => b"greeter nonce".to_vec(),
            (Claimer, 6) => b"claimer payload".to_vec(),
            (Greeter, 7) => b"greeter payload".to_vec(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn first_side_waits_then_both_see_peer() {
        let mut attempt = joined_attempt();
        let g0 = honest_payload(Greeter, 0);
        let c0 = honest_payload(Claimer, 0);

        assert_eq!(exchange(&mut attempt, Greeter, 0, &g0, t(1)), ExchangeOutcome::NotReady);
        assert_eq!(exchange(&mut attempt, Claimer, 0, &c0, t(2)), ExchangeOutcome::Ready(g0.clone()));
        assert_eq!(exchange(&mut attempt, Greeter, 0, &g0, t(3)), ExchangeOutcome::Ready(c0));
        assert_eq!(attempt.greeter_steps.len(), 1);
        assert_eq!(attempt.greeter_steps[0].submitted_on, t(1));
    }

    #[test]
    fn skipping_a_step_is_too_advanced() {
        let mut attempt = joined_attempt();
        assert_eq!(exchange(&mut attempt, Greeter, 1, &[], t(1)), ExchangeOutcome::TooAdvanced);
        assert_eq!(exchange(&mut attempt, Greeter, LAST_STEP_INDEX + 1, &[], t(1)), ExchangeOutcome::TooAdvanced);
        assert!(attempt.greeter_steps.is_empty());
        assert!(attempt.cancelled.is_none());
    }

    #[test]
    fn caller_may_run_ahead_of_peer() {
        let mut attempt = joined_attempt();
        for index in 0..=2 {
            let payload = honest_payload(Greeter, index);
            assert_eq!(exchange(&mut attempt, Greeter, index, &payload, t(1)), ExchangeOutcome::NotReady);
        }
        assert_eq!(attempt.greeter_steps.len(), 3);
    }

    #[test]
    fn unjoined_side_is_rejected() {
        let mut attempt = StoredAttempt::joined_by(
            GreetingAttemptId::from(1u128),
            InvitationToken::from(2u128),
            UserId::from(3u128),
            Greeter,
            t(0),
        );
        let c0 = honest_payload(Claimer, 0);
        assert_eq!(exchange(&mut attempt, Claimer, 0, &c0, t(1)), ExchangeOutcome::NotJoined);
    }

    #[test]
    fn replay_with_other_bytes_cancels() {
        let mut attempt = joined_attempt();
        exchange(&mut attempt, Claimer, 0, &[1; 32], t(1));

        assert_eq!(exchange(&mut attempt, Claimer, 0, &[2; 32], t(5)), ExchangeOutcome::Mismatch);
        let expected = CancelledGreetingAttempt {
            origin: Claimer,
            reason: CancelledGreetingAttemptReason::InconsistentPayload,
            timestamp: t(5),
        };
        assert_eq!(attempt.cancelled, Some(expected));
        assert_eq!(exchange(&mut attempt, Greeter, 0, &[3; 32], t(6)), ExchangeOutcome::Cancelled(expected));
    }

    #[test]
    fn wrong_nonce_breaks_commitment() {
        let mut attempt = joined_attempt();
        for index in 0..=2 {
            exchange(&mut attempt, Claimer, index, &honest_payload(Claimer, index), t(1));
        }

        assert_eq!(exchange(&mut attempt, Claimer, 3, b"another nonce", t(7)), ExchangeOutcome::Mismatch);
        let cancelled = attempt.cancelled.unwrap();
        assert_eq!(cancelled.origin, Claimer);
        assert_eq!(cancelled.reason, CancelledGreetingAttemptReason::InvalidNonceHash);
        assert_eq!(attempt.claimer_steps.len(), 3);
    }

    #[test]
    fn full_ceremony_finishes_attempt() {
        let mut attempt = joined_attempt();
        for index in 0..=LAST_STEP_INDEX {
            let g = honest_payload(Greeter, index);
            let c = honest_payload(Claimer, index);
            assert_eq!(exchange(&mut attempt, Greeter, index, &g, t(1)), ExchangeOutcome::NotReady);
            assert_eq!(exchange(&mut attempt, Claimer, index, &c, t(2)), ExchangeOutcome::Ready(g));
            let replay = honest_payload(Greeter, index);
            assert_eq!(exchange(&mut attempt, Greeter, index, &replay, t(3)), ExchangeOutcome::Ready(c));
        }
        assert!(attempt.is_finished());
        assert_eq!(attempt.claimer_steps.len(), STEP_COUNT);
    }

    #[derive(Debug, Clone)]
    struct Call {
        origin: GreeterOrClaimer,
        index: u8,
        tampered: bool,
    }

    fn call() -> impl Strategy<Value = Call> {
        (any::<bool>(), 0..=LAST_STEP_INDEX + 1, prop::bool::weighted(0.1)).prop_map(|(greeter, index, tampered)| {
            Call { origin: if greeter { Greeter } else { Claimer }, index, tampered }
        })
    }

    fn payload_for(call: &Call) -> Vec<u8> {
        let mut payload = honest_payload(call.origin, call.index);
        if call.tampered {
            payload.push(0xff);
        }
        payload
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_ready_delivers_exact_peer_bytes(calls in prop::collection::vec(call(), 1..60)) {
            let mut attempt = joined_attempt();
            for call in &calls {
                let payload = payload_for(call);
                if let ExchangeOutcome::Ready(peer) = exchange(&mut attempt, call.origin, call.index, &payload, t(1)) {
                    // ORACLE: delivered bytes are what the peer stored at that index,
                    // and the caller's own submission is stored too
                    let index = usize::from(call.index);
                    prop_assert_eq!(&peer, &attempt.steps(call.origin.peer())[index].payload);
                    prop_assert_eq!(&attempt.steps(call.origin)[index].payload, &payload);
                }
            }
        }

        #[test]
        fn prop_cancellation_is_final(calls in prop::collection::vec(call(), 1..60)) {
            let mut attempt = joined_attempt();
            let mut seen = None;
            for (n, call) in calls.iter().enumerate() {
                let payload = payload_for(call);
                let outcome = exchange(&mut attempt, call.origin, call.index, &payload, t(n as i64));
                if let Some(cancelled) = seen {
                    prop_assert_eq!(outcome, ExchangeOutcome::Cancelled(cancelled));
                } else if let ExchangeOutcome::Cancelled(cancelled) = outcome {
                    seen = Some(cancelled);
                }
                if seen.is_none() {
                    seen = attempt.cancelled;
                }
            }
        }

        #[test]
        fn prop_identical_replay_is_idempotent(calls in prop::collection::vec(call(), 1..40)) {
            let mut attempt = joined_attempt();
            for call in &calls {
                let payload = payload_for(call);
                let first = exchange(&mut attempt, call.origin, call.index, &payload, t(1));
                let snapshot = attempt.clone();
                let second = exchange(&mut attempt, call.origin, call.index, &payload, t(2));
                if first != ExchangeOutcome::Mismatch {
                    prop_assert_eq!(first, second);
                    prop_assert_eq!(&attempt, &snapshot);
                }
            }
        }

        #[test]
        fn prop_divergent_replay_cancels(
            index in 0..=LAST_STEP_INDEX,
            origin_is_greeter in any::<bool>(),
            extra in 1u8..=255,
        ) {
            let origin = if origin_is_greeter { Greeter } else { Claimer };
            let mut attempt = joined_attempt();
            for i in 0..=index {
                exchange(&mut attempt, origin, i, &honest_payload(origin, i), t(1));
            }
            prop_assert!(attempt.cancelled.is_none());

            let mut divergent = honest_payload(origin, index);
            divergent.push(extra);
            prop_assert_eq!(exchange(&mut attempt, origin, index, &divergent, t(2)), ExchangeOutcome::Mismatch);
            prop_assert!(attempt.cancelled.is_some());
        }
    }
}
