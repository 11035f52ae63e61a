//! Property-based tests for step encoding.
//!
//! Steps must survive the wire unchanged, and any payload whose shape does not
//! match its index must be refused on decode.

use greet_proto::{
    ClaimerStep, GreeterOrClaimer, GreeterStep, LAST_STEP_INDEX, RawStep, steps::payload_shape,
};
use proptest::prelude::*;

fn arb_greeter_step() -> impl Strategy<Value = GreeterStep> {
    prop_oneof![
        any::<[u8; 32]>().prop_map(|public_key| GreeterStep::Number0WaitPeer { public_key }),
        Just(GreeterStep::Number1GetHashedNonce),
        prop::collection::vec(any::<u8>(), 1..128)
            .prop_map(|greeter_nonce| GreeterStep::Number2SendNonce { greeter_nonce }),
        Just(GreeterStep::Number3GetNonce),
        Just(GreeterStep::Number4SignifyTrust),
        Just(GreeterStep::Number5WaitPeerTrust),
        Just(GreeterStep::Number6GetPayload),
        prop::collection::vec(any::<u8>(), 1..256)
            .prop_map(|greeter_payload| GreeterStep::Number7SendPayload { greeter_payload }),
        Just(GreeterStep::Number8WaitPeerAcknowledgment),
    ]
}

fn arb_claimer_step() -> impl Strategy<Value = ClaimerStep> {
    prop_oneof![
        any::<[u8; 32]>().prop_map(|public_key| ClaimerStep::Number0WaitPeer { public_key }),
        any::<[u8; 32]>().prop_map(|hashed_nonce| ClaimerStep::Number1SendHashedNonce { hashed_nonce }),
        Just(ClaimerStep::Number2GetNonce),
        prop::collection::vec(any::<u8>(), 1..128)
            .prop_map(|claimer_nonce| ClaimerStep::Number3SendNonce { claimer_nonce }),
        Just(ClaimerStep::Number4WaitPeerTrust),
        Just(ClaimerStep::Number5SignifyTrust),
        prop::collection::vec(any::<u8>(), 1..256)
            .prop_map(|claimer_payload| ClaimerStep::Number6SendPayload { claimer_payload }),
        Just(ClaimerStep::Number7GetPayload),
        Just(ClaimerStep::Number8Acknowledge),
    ]
}

fn cbor<T: serde::Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).unwrap();
    buf
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: greeter steps decode to the value that was encoded
    #[test]
    fn prop_greeter_step_survives_wire(step in arb_greeter_step()) {
        let decoded: GreeterStep = ciborium::from_reader(cbor(&step).as_slice()).unwrap();
        prop_assert_eq!(decoded, step);
    }

    /// Property: claimer steps decode to the value that was encoded
    #[test]
    fn prop_claimer_step_survives_wire(step in arb_claimer_step()) {
        let decoded: ClaimerStep = ciborium::from_reader(cbor(&step).as_slice()).unwrap();
        prop_assert_eq!(decoded, step);
    }

    /// Property: a raw step is accepted iff its payload fits the index shape
    #[test]
    fn prop_raw_step_accepted_iff_shape_fits(
        step in 0u8..=LAST_STEP_INDEX + 2,
        payload in prop::collection::vec(any::<u8>(), 0..40),
    ) {
        let raw = RawStep { step, payload: payload.clone() };

        let greeter_ok = payload_shape(GreeterOrClaimer::Greeter, step)
            .is_some_and(|shape| shape.accepts(&payload));
        prop_assert_eq!(GreeterStep::from_raw(raw.clone()).is_ok(), greeter_ok);

        let claimer_ok = payload_shape(GreeterOrClaimer::Claimer, step)
            .is_some_and(|shape| shape.accepts(&payload));
        prop_assert_eq!(ClaimerStep::from_raw(raw).is_ok(), claimer_ok);
    }

    /// Property: a step relayed through its raw form keeps index and bytes
    #[test]
    fn prop_relay_preserves_index_and_payload(step in arb_claimer_step()) {
        let raw = RawStep::from(step.clone());
        prop_assert_eq!(raw.step, step.index());
        prop_assert_eq!(raw.payload.as_slice(), step.payload());
    }
}
