//! End-to-end greeting scenarios.
//!
//! Each test drives a simulated organization through the command surface,
//! with real client-side cryptography on both ends. The world checks the
//! standard invariants after every request.

use greet_core::directory::{CertificateStore, EnrollmentTarget};
use greet_harness::{Ceremony, HarnessError, InvariantRegistry, SimUser, SimWorld, rejection_code};
use greet_proto::{
    CancelledGreetingAttemptReason, ClaimerStep, ErrorPayload, GreeterOrClaimer, GreeterStep, InvitationEmailSentStatus,
    InvitationInfo, InvitationStatus, RevealToken,
    cmds::{
        authenticated::{
            InviteCompleteRep, InviteGreeterCancelGreetingAttemptRep, InviteGreeterStartGreetingAttemptRep,
            InviteGreeterStepRep,
        },
        invited::{InviteClaimerCancelGreetingAttemptRep, InviteClaimerStepRep, InviteShamirRecoveryRevealRep},
    },
};

fn world_with_alice(seed: u64) -> (SimWorld, SimUser) {
    let world = SimWorld::new(seed).unwrap();
    let alice = world.add_admin("alice@example.com", "Alice");
    (world, alice)
}

fn greeter_attempt(rep: InviteGreeterStartGreetingAttemptRep) -> greet_proto::GreetingAttemptId {
    match rep {
        InviteGreeterStartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
        other => panic!("expected attempt, got {other:?}"),
    }
}

#[test]
fn happy_path_user_enrollment() {
    let (mut world, alice) = world_with_alice(1);

    let created = world.invite_user(&alice, "bob@example.com", true).unwrap();
    assert_eq!(created.email_sent_status, InvitationEmailSentStatus::Success);
    assert_eq!(world.mailer().sent_to("bob@example.com").len(), 1);

    let info = world.info(created.token).unwrap();
    let InvitationInfo::User { claimer_email, administrators, .. } = info else {
        panic!("expected user invitation info");
    };
    assert_eq!(claimer_email, "bob@example.com");
    assert!(administrators.iter().any(|admin| admin.user_id == alice.user_id));

    let mut ceremony = Ceremony::new(&world, &alice, created.token);
    ceremony.run(&mut world).unwrap();

    assert_eq!(ceremony.greeter().sas(), ceremony.claimer().sas());
    assert_eq!(ceremony.greeter().received_payload(), Some(&b"claimer enrollment request"[..]));
    assert_eq!(ceremony.claimer().received_payload(), Some(&b"greeter enrollment response"[..]));

    assert_eq!(world.complete(&alice, created.token).unwrap(), InviteCompleteRep::Ok);

    let stored = &world.snapshot().invitations[&created.token];
    assert_eq!(stored.status, InvitationStatus::Completed);
    assert_eq!(stored.completed_by_attempt, ceremony.attempt());

    assert_eq!(rejection_code(&world.info(created.token)), Some(ErrorPayload::INVITATION_DELETED));

    let enrollments = world.directory().enrollments(world.org());
    assert_eq!(enrollments.len(), 1);
    assert_eq!(enrollments[0].target, EnrollmentTarget::User { claimer_email: "bob@example.com".to_string() });
    let bob = world.directory().user_by_email(world.org(), "bob@example.com").unwrap();
    assert!(bob.is_some());

    InvariantRegistry::standard().assert_all(world.snapshot(), "after enrollment");
}

#[test]
fn claimer_aborts_mid_flight() {
    let (mut world, alice) = world_with_alice(2);
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    let mut ceremony = Ceremony::new(&world, &alice, token);
    ceremony.run_to(&mut world, 2).unwrap();
    let attempt = ceremony.attempt().unwrap();

    let rep = world.claimer_cancel(token, attempt, CancelledGreetingAttemptReason::ManuallyCancelled).unwrap();
    assert_eq!(rep, InviteClaimerCancelGreetingAttemptRep::Ok);

    let rep = world.greeter_step(&alice, attempt, GreeterStep::Number3GetNonce).unwrap();
    let InviteGreeterStepRep::GreetingAttemptCancelled { origin, reason, timestamp } = rep else {
        panic!("expected cancellation, got {rep:?}");
    };
    assert_eq!(origin, GreeterOrClaimer::Claimer);
    assert_eq!(reason, CancelledGreetingAttemptReason::ManuallyCancelled);

    // Same triple on every later call, from either side.
    let again = world.greeter_step(&alice, attempt, GreeterStep::Number3GetNonce).unwrap();
    assert_eq!(again, InviteGreeterStepRep::GreetingAttemptCancelled { origin, reason, timestamp });
    let greeter_cancel = world.greeter_cancel(&alice, attempt, CancelledGreetingAttemptReason::ManuallyCancelled);
    assert_eq!(
        greeter_cancel.unwrap(),
        InviteGreeterCancelGreetingAttemptRep::GreetingAttemptAlreadyCancelled { origin, reason, timestamp }
    );

    assert_eq!(world.snapshot().invitations[&token].status, InvitationStatus::Pending);

    let mut retry = Ceremony::new(&world, &alice, token);
    let new_attempt = retry.start(&mut world).unwrap();
    assert_ne!(new_attempt, attempt);
    retry.run(&mut world).unwrap();
}

#[test]
fn nonce_hash_mismatch_cancels_attempt() {
    let (mut world, alice) = world_with_alice(3);
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    let mut ceremony = Ceremony::new(&world, &alice, token);
    ceremony.run_to(&mut world, 2).unwrap();
    let attempt = ceremony.attempt().unwrap();

    let mut forged = ceremony.claimer().nonce().to_vec();
    forged[0] ^= 0xff;
    ceremony.claimer_mut().replace_nonce(forged);

    let result = ceremony.exchange(&mut world);
    assert!(matches!(result, Err(HarnessError::Unexpected { .. })), "got {result:?}");

    let rep = world.greeter_step(&alice, attempt, GreeterStep::Number3GetNonce).unwrap();
    let InviteGreeterStepRep::GreetingAttemptCancelled { origin, reason, .. } = rep else {
        panic!("expected cancellation, got {rep:?}");
    };
    assert_eq!(origin, GreeterOrClaimer::Claimer);
    assert_eq!(reason, CancelledGreetingAttemptReason::InvalidNonceHash);
}

#[test]
fn stale_attempt_is_cancelled_on_restart() {
    let (mut world, alice) = world_with_alice(4);
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    let first = greeter_attempt(world.greeter_start(&alice, token).unwrap());
    let second = greeter_attempt(world.greeter_start(&alice, token).unwrap());
    assert_ne!(first, second);

    let stale = &world.snapshot().attempts[&first];
    let cancelled = stale.cancelled.unwrap();
    assert_eq!(cancelled.origin, GreeterOrClaimer::Greeter);
    assert_eq!(cancelled.reason, CancelledGreetingAttemptReason::AutomaticallyCancelled);
    assert!(world.snapshot().attempts[&second].is_active());
}

#[test]
fn joined_attempt_is_rejoined_not_replaced() {
    let (mut world, alice) = world_with_alice(5);
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    let mut ceremony = Ceremony::new(&world, &alice, token);
    let attempt = ceremony.start(&mut world).unwrap();

    assert_eq!(greeter_attempt(world.greeter_start(&alice, token).unwrap()), attempt);
    assert_eq!(world.snapshot().attempts_of(token).count(), 1);
    ceremony.run(&mut world).unwrap();
}

#[test]
fn replay_is_idempotent_and_divergence_cancels() {
    let (mut world, alice) = world_with_alice(6);
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    let mut ceremony = Ceremony::new(&world, &alice, token);
    let attempt = ceremony.start(&mut world).unwrap();

    let key = *ceremony.claimer().public_key().as_bytes();
    let step = ClaimerStep::Number0WaitPeer { public_key: key };
    assert_eq!(world.claimer_step(token, attempt, step.clone()).unwrap(), InviteClaimerStepRep::NotReady);
    assert_eq!(world.claimer_step(token, attempt, step.clone()).unwrap(), InviteClaimerStepRep::NotReady);

    let greeter_key = *ceremony.greeter().public_key().as_bytes();
    let rep = world.greeter_step(&alice, attempt, GreeterStep::Number0WaitPeer { public_key: greeter_key }).unwrap();
    assert_eq!(rep, InviteGreeterStepRep::Ok { claimer_step: step.clone() });

    let expected = InviteClaimerStepRep::Ok { greeter_step: GreeterStep::Number0WaitPeer { public_key: greeter_key } };
    assert_eq!(world.claimer_step(token, attempt, step.clone()).unwrap(), expected);
    assert_eq!(world.claimer_step(token, attempt, step).unwrap(), expected);

    let mut other_key = key;
    other_key[0] ^= 0x01;
    let rep = world.claimer_step(token, attempt, ClaimerStep::Number0WaitPeer { public_key: other_key }).unwrap();
    assert_eq!(rep, InviteClaimerStepRep::StepMismatch);

    let cancelled = world.snapshot().attempts[&attempt].cancelled.unwrap();
    assert_eq!(cancelled.origin, GreeterOrClaimer::Claimer);
    assert_eq!(cancelled.reason, CancelledGreetingAttemptReason::InconsistentPayload);
}

#[test]
fn shamir_reveal_returns_stored_blob() {
    let (mut world, alice) = world_with_alice(7);
    let bob = world.add_admin("bob@example.com", "Bob");
    let reveal_token = RevealToken::from(0x5eed_u128);
    let ciphered = b"\x00\x01ciphered shamir data\xff".to_vec();
    world.add_shamir_setup(&bob, &[&alice], reveal_token, &ciphered);

    let token = world.invite_shamir_recovery(&alice, &bob, false).unwrap().token;

    // Alice hands the reveal token over the encrypted step 7 payload.
    let mut ceremony = Ceremony::with_payloads(
        &world,
        &alice,
        token,
        b"recovery device request".to_vec(),
        reveal_token.as_bytes().to_vec(),
    );
    ceremony.run(&mut world).unwrap();

    let learned = RevealToken::from_slice(ceremony.claimer().received_payload().unwrap()).unwrap();
    assert_eq!(learned, reveal_token);

    let rep = world.reveal(token, learned).unwrap();
    assert_eq!(rep, InviteShamirRecoveryRevealRep::Ok { ciphered_data: ciphered });

    let rep = world.reveal(token, RevealToken::from(0xbad_u128)).unwrap();
    assert_eq!(rep, InviteShamirRecoveryRevealRep::BadRevealToken);

    assert_eq!(world.complete(&alice, token).unwrap(), InviteCompleteRep::Ok);
    assert_eq!(rejection_code(&world.reveal(token, learned)), Some(ErrorPayload::INVITATION_DELETED));
}

#[test]
fn reveal_on_user_invitation_is_bad_type() {
    let (mut world, alice) = world_with_alice(8);
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    let rep = world.reveal(token, RevealToken::from(1u128)).unwrap();
    assert_eq!(rep, InviteShamirRecoveryRevealRep::BadInvitationType);
}

#[test]
fn rejected_sas_cancels_attempt() {
    let (mut world, alice) = world_with_alice(9);
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    let mut ceremony = Ceremony::new(&world, &alice, token).distrust_sas();
    let result = ceremony.run(&mut world);
    assert!(matches!(result, Err(HarnessError::SasMismatch)), "got {result:?}");

    let attempt = ceremony.attempt().unwrap();
    let cancelled = world.snapshot().attempts[&attempt].cancelled.unwrap();
    assert_eq!(cancelled.origin, GreeterOrClaimer::Greeter);
    assert_eq!(cancelled.reason, CancelledGreetingAttemptReason::InvalidSasCode);
    assert_eq!(world.snapshot().invitations[&token].status, InvitationStatus::Pending);
}

#[test]
fn device_invitation_enrolls_new_device() {
    let (mut world, alice) = world_with_alice(10);
    let created = world.invite_device(&alice, true).unwrap();
    assert_eq!(world.mailer().sent_to("alice@example.com").len(), 1);

    let mut ceremony = Ceremony::new(&world, &alice, created.token);
    ceremony.run(&mut world).unwrap();
    assert_eq!(world.complete(&alice, created.token).unwrap(), InviteCompleteRep::Ok);

    let enrollments = world.directory().enrollments(world.org());
    assert_eq!(enrollments.len(), 1);
    assert_eq!(enrollments[0].target, EnrollmentTarget::Device { user_id: alice.user_id });
}

#[test]
fn revoked_greeter_cannot_be_selected() {
    let (mut world, alice) = world_with_alice(11);
    let carol = world.add_admin("carol@example.com", "Carol");
    let token = world.invite_user(&alice, "bob@example.com", false).unwrap().token;

    world.revoke(&carol);
    let rep = world.claimer_start(token, carol.user_id).unwrap();
    assert_eq!(rep, greet_proto::cmds::invited::InviteClaimerStartGreetingAttemptRep::GreeterRevoked);
}
