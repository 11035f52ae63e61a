//! Property-based tests for the invitation subsystem.
//!
//! Random operation sequences are applied to a simulated organization. After
//! every operation the standard invariants are checked and invitation
//! statuses are compared with a reference model.

use arbitrary::{Arbitrary, Unstructured};
use greet_harness::{Ceremony, Operation, OperationDriver, OperationOutcome, SimWorld};
use greet_proto::{
    ClaimerStep, GreeterStep, InvitationStatus, InviteListItem,
    cmds::{authenticated::InviteGreeterStepRep, invited::InviteClaimerStepRep},
};
use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Strategy for generating operations.
fn operation_strategy() -> impl Strategy<Value = Operation> {
    let user = 0..3u8;
    let invitation = any::<u8>();

    prop_oneof![
        // Weight towards ceremonies, where most state changes happen
        3 => (user.clone(), 0..4u8).prop_map(|(author, email)| Operation::InviteUser { author, email }),
        1 => user.clone().prop_map(|author| Operation::InviteDevice { author }),
        1 => (user.clone(), invitation.clone()).prop_map(|(author, invitation)| Operation::Cancel {
            author,
            invitation
        }),
        1 => (user.clone(), invitation.clone()).prop_map(|(author, invitation)| Operation::Complete {
            author,
            invitation
        }),
        8 => (user.clone(), invitation.clone()).prop_map(|(greeter, invitation)| {
            Operation::AdvanceCeremony { greeter, invitation }
        }),
        1 => (user.clone(), invitation.clone()).prop_map(|(greeter, invitation)| {
            Operation::RestartCeremony { greeter, invitation }
        }),
        1 => (user, invitation, any::<bool>()).prop_map(|(greeter, invitation, by_claimer)| {
            Operation::CancelAttempt { greeter, invitation, by_claimer }
        }),
        1 => any::<u16>().prop_map(|secs| Operation::AdvanceTime { secs }),
    ]
}

fn list_item_token_status(item: &InviteListItem) -> (greet_proto::InvitationToken, InvitationStatus) {
    (item.token(), item.status())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariants and the status model hold after every operation.
    #[test]
    fn prop_invariants_hold(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 0..60)
    ) {
        let mut driver = OperationDriver::new(seed).unwrap();

        for (i, op) in ops.iter().enumerate() {
            let result = driver.apply(op);
            // ORACLE: refusals are fine, harness errors are not
            prop_assert!(result.is_ok(), "operation {} ({:?}) failed: {:?}", i, op, result);
        }
    }

    /// Creating then listing shows the invitation as pending, and creating
    /// again for the same email returns the same token.
    #[test]
    fn prop_create_then_list(seed in any::<u64>(), emails in prop::collection::vec(0..5u8, 1..10)) {
        let mut world = SimWorld::new(seed).unwrap();
        let alice = world.add_admin("alice@example.com", "Alice");

        for email in emails {
            let email = format!("claimer{email}@example.com");
            let first = world.invite_user(&alice, &email, false).unwrap();
            let second = world.invite_user(&alice, &email, false).unwrap();

            // ORACLE: idempotent while pending
            prop_assert_eq!(first.token, second.token);

            let listed: Vec<_> = world.list(&alice).unwrap().iter().map(list_item_token_status).collect();
            // ORACLE: listed as pending
            prop_assert!(listed.contains(&(first.token, InvitationStatus::Pending)));
        }
    }

    /// Replaying a step with identical bytes yields identical answers;
    /// replaying with different bytes cancels the attempt for good.
    #[test]
    fn prop_replay_semantics(
        seed in any::<u64>(),
        replays in 1..4usize,
        flip in 0..32usize,
    ) {
        let mut world = SimWorld::new(seed).unwrap();
        let alice = world.add_admin("alice@example.com", "Alice");
        let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

        let mut ceremony = Ceremony::new(&world, &alice, token);
        let attempt = ceremony.start(&mut world).unwrap();
        let greeter_key = *ceremony.greeter().public_key().as_bytes();
        let step = GreeterStep::Number0WaitPeer { public_key: greeter_key };

        let first = world.greeter_step(&alice, attempt, step.clone()).unwrap();
        for _ in 0..replays {
            // ORACLE: identical bytes, identical answer
            prop_assert_eq!(&world.greeter_step(&alice, attempt, step.clone()).unwrap(), &first);
        }

        let claimer_key = *ceremony.claimer().public_key().as_bytes();
        let claimer_step = ClaimerStep::Number0WaitPeer { public_key: claimer_key };
        let rep = world.claimer_step(token, attempt, claimer_step.clone()).unwrap();
        prop_assert_eq!(rep, InviteClaimerStepRep::Ok { greeter_step: step.clone() });

        let mut forged = greeter_key;
        forged[flip] ^= 0x80;
        let rep = world.greeter_step(&alice, attempt, GreeterStep::Number0WaitPeer { public_key: forged }).unwrap();
        // ORACLE: divergent replay is a mismatch
        prop_assert_eq!(rep, InviteGreeterStepRep::StepMismatch);

        let after_greeter = world.greeter_step(&alice, attempt, step).unwrap();
        let after_claimer = world.claimer_step(token, attempt, claimer_step).unwrap();
        let (
            InviteGreeterStepRep::GreetingAttemptCancelled { origin, reason, timestamp },
            InviteClaimerStepRep::GreetingAttemptCancelled { origin: o2, reason: r2, timestamp: t2 },
        ) = (after_greeter, after_claimer) else {
            return Err(TestCaseError::fail("attempt not cancelled"));
        };
        // ORACLE: same cancellation triple from both sides
        prop_assert_eq!((origin, reason, timestamp), (o2, r2, t2));
    }

    /// Full ceremonies deliver each side exactly what the peer sealed.
    #[test]
    fn prop_ceremony_delivers_payloads(
        seed in any::<u64>(),
        claimer_payload in prop::collection::vec(any::<u8>(), 1..128),
        greeter_payload in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let mut world = SimWorld::new(seed).unwrap();
        let alice = world.add_admin("alice@example.com", "Alice");
        let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

        let mut ceremony =
            Ceremony::with_payloads(&world, &alice, token, claimer_payload.clone(), greeter_payload.clone());
        ceremony.run(&mut world).unwrap();

        // ORACLE: payloads survive the exchange byte-for-byte
        prop_assert_eq!(ceremony.greeter().received_payload(), Some(claimer_payload.as_slice()));
        prop_assert_eq!(ceremony.claimer().received_payload(), Some(greeter_payload.as_slice()));
        // ORACLE: both humans see the same codes
        prop_assert_eq!(ceremony.greeter().sas(), ceremony.claimer().sas());
    }
}

/// Operation sequences decoded the way the fuzzer decodes them.
#[test]
fn arbitrary_operation_sequences_keep_invariants() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x6772_6565_74);
    for round in 0..16u64 {
        let mut bytes = vec![0u8; 2048];
        rng.fill_bytes(&mut bytes);
        let mut unstructured = Unstructured::new(&bytes);
        let ops = Vec::<Operation>::arbitrary(&mut unstructured).unwrap();

        let mut driver = OperationDriver::new(round).unwrap();
        for op in &ops {
            let outcome = driver.apply(op).unwrap();
            if matches!(op, Operation::AdvanceTime { .. }) {
                assert_eq!(outcome, OperationOutcome::Applied);
            }
        }
        driver.check_model().unwrap();
    }
}
