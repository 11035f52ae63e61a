//! Invitation registry tests: creation, listing, cancellation, completion
//! and shamir recovery reveal.

#![allow(clippy::disallowed_types, reason = "Recording mailer in tests")]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    thread,
};

use greet_core::{
    AuthorContext, Environment, InvitationController, InviteConfig, Mailer, MemoryDirectory, MemoryStorage,
    SendEmailError,
    directory::{ShamirSetup, ShamirShare, UserProfile},
    error::{CancelInvitationError, CompleteError, ContextError, NewShamirRecoveryError, NewUserError, RevealError},
    mailer::InvitationEmail,
    storage::Storage,
};
use greet_proto::{
    DateTime, DeviceId, HumanHandle, InvitationEmailSentStatus, InvitationInfo, InvitationStatus, InvitationToken,
    InviteListItem, OrganizationId, RevealToken, ServerAddr, UserId,
};
use proptest::prelude::*;

#[derive(Clone, Default)]
struct TestEnv {
    clock: Arc<AtomicI64>,
    counter: Arc<AtomicU64>,
}

impl Environment for TestEnv {
    fn now(&self) -> DateTime {
        DateTime::from_secs(1_000 + self.clock.fetch_add(1, Ordering::SeqCst))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let value = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = value.to_be_bytes()[i % 8];
        }
    }
}

/// Records delivered emails, or refuses all of them.
#[derive(Clone, Default)]
struct RecordingMailer {
    sent: Arc<Mutex<Vec<InvitationEmail>>>,
    unavailable: bool,
}

impl RecordingMailer {
    fn sent(&self) -> Vec<InvitationEmail> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, email: &InvitationEmail) -> Result<(), SendEmailError> {
        if self.unavailable {
            return Err(SendEmailError::ServerUnavailable("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

type Controller = InvitationController<TestEnv, MemoryStorage, MemoryDirectory, RecordingMailer>;

const ALICE: u128 = 0xa1;
const ADAM: u128 = 0xad;
const BOB: u128 = 0xb0;
const REVEAL: u128 = 0x5ec2e7;

struct World {
    controller: Controller,
    directory: MemoryDirectory,
    storage: MemoryStorage,
    mailer: RecordingMailer,
    org: OrganizationId,
}

impl World {
    fn new() -> Self {
        Self::with(RecordingMailer::default(), InviteConfig::with_server_addr(ServerAddr::new(
            "parsec.example.com",
            None,
            true,
        )))
    }

    fn with(mailer: RecordingMailer, config: InviteConfig) -> Self {
        let org = OrganizationId::new("CoolOrg").unwrap();
        let directory = MemoryDirectory::new();
        directory.add_organization(&org);
        for (id, name, profile) in [
            (ALICE, "alice", UserProfile::Admin),
            (ADAM, "adam", UserProfile::Admin),
            (BOB, "bob", UserProfile::Standard),
        ] {
            directory.add_user(
                &org,
                UserId::from(id),
                DeviceId::from(id),
                HumanHandle::new(format!("{name}@example.com"), name),
                profile,
            );
        }

        let storage = MemoryStorage::new();
        let controller =
            InvitationController::new(TestEnv::default(), storage.clone(), directory.clone(), mailer.clone(), config);
        Self { controller, directory, storage, mailer, org }
    }

    fn author(&self, id: u128) -> AuthorContext {
        self.controller.backend().authenticate(&self.org, DeviceId::from(id)).unwrap()
    }

    fn status(&self, token: InvitationToken) -> InvitationStatus {
        self.storage.load_invitation(&self.org, token).unwrap().unwrap().status
    }

    /// Shamir setup of Bob, with Alice as the only recipient.
    fn bob_shamir_setup(&self, created_on: i64) {
        self.directory.add_shamir_setup(&self.org, ShamirSetup {
            user_id: UserId::from(BOB),
            created_on: DateTime::from_secs(created_on),
            deleted_on: None,
            threshold: 1,
            recipients: vec![ShamirShare { user_id: UserId::from(ALICE), shares: 1 }],
            reveal_token: RevealToken::from(REVEAL),
            ciphered_data: b"ciphered".to_vec(),
        });
    }
}

#[test]
fn user_invitation_is_reused_while_pending() {
    let world = World::new();
    let registry = world.controller.registry();
    let alice = world.author(ALICE);

    let first = registry.create_user(&alice, "zack@example.com", false).unwrap();
    let again = registry.create_user(&world.author(ADAM), "zack@example.com", false).unwrap();
    let other = registry.create_user(&alice, "yann@example.com", false).unwrap();

    assert_eq!(first.token, again.token);
    assert_ne!(first.token, other.token);
    assert_eq!(world.storage.invitation_count(), 2);

    // Once cancelled, a new one can be issued
    registry.cancel(&alice, first.token).unwrap();
    let fresh = registry.create_user(&alice, "zack@example.com", false).unwrap();
    assert_ne!(fresh.token, first.token);
}

#[test]
fn user_invitation_rejections() {
    let world = World::new();
    let registry = world.controller.registry();

    let result = registry.create_user(&world.author(BOB), "zack@example.com", false);
    assert_eq!(result, Err(NewUserError::AuthorNotAllowed));

    let result = registry.create_user(&world.author(ALICE), "bob@example.com", false);
    assert_eq!(result, Err(NewUserError::ClaimerEmailAlreadyEnrolled));
}

#[test]
fn malformed_claimer_email_is_refused() {
    let world = World::new();
    let registry = world.controller.registry();

    for email in ["zack@example.com\r\nBcc: attacker@example.net", "zack@example.com\n", "not-an-email"] {
        let result = registry.create_user(&world.author(ALICE), email, true);
        assert!(
            matches!(result, Err(NewUserError::Context(ContextError::InvalidRequest(_)))),
            "{email:?}: {result:?}"
        );
    }
    assert_eq!(world.storage.invitation_count(), 0);
    assert!(world.mailer.sent().is_empty());
}

#[test]
fn invitation_email_is_delivered() {
    let world = World::new();
    let created = world.controller.registry().create_user(&world.author(ALICE), "zack@example.com", true).unwrap();

    assert_eq!(created.email_sent_status, InvitationEmailSentStatus::Success);
    let sent = world.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "zack@example.com");
    assert_eq!(sent[0].reply_to.as_deref(), Some("alice <alice@example.com>"));
}

#[test]
fn email_failure_does_not_fail_invitation() {
    let mailer = RecordingMailer { unavailable: true, ..RecordingMailer::default() };
    let world = World::with(mailer, InviteConfig::with_server_addr(ServerAddr::new("parsec.example.com", None, true)));
    let created = world.controller.registry().create_device(&world.author(BOB), true).unwrap();
    assert_eq!(created.email_sent_status, InvitationEmailSentStatus::ServerUnavailable);
    assert_eq!(world.status(created.token), InvitationStatus::Pending);

    let world = World::with(RecordingMailer::default(), InviteConfig::default());
    let created = world.controller.registry().create_device(&world.author(BOB), true).unwrap();
    assert_eq!(created.email_sent_status, InvitationEmailSentStatus::BadSmtpConfig);
    assert!(world.mailer.sent().is_empty());
}

#[test]
fn list_shows_only_greetable_invitations() {
    let world = World::new();
    let registry = world.controller.registry();

    let user = registry.create_user(&world.author(ALICE), "zack@example.com", false).unwrap();
    let bob_device = registry.create_device(&world.author(BOB), false).unwrap();
    let alice_device = registry.create_device(&world.author(ALICE), false).unwrap();

    let tokens = |id| registry.list(&world.author(id)).unwrap().iter().map(InviteListItem::token).collect::<Vec<_>>();
    assert_eq!(tokens(ALICE), vec![user.token, alice_device.token]);
    assert_eq!(tokens(ADAM), vec![user.token]);
    assert_eq!(tokens(BOB), vec![bob_device.token]);
}

#[test]
fn cancel_rules() {
    let world = World::new();
    let registry = world.controller.registry();
    let alice = world.author(ALICE);
    let token = registry.create_user(&alice, "zack@example.com", false).unwrap().token;

    assert_eq!(registry.cancel(&world.author(BOB), token), Err(CancelInvitationError::AuthorNotAllowed));
    assert_eq!(
        registry.cancel(&alice, InvitationToken::from(0xdeadu128)),
        Err(CancelInvitationError::InvitationNotFound)
    );

    // Any admin may cancel, not only the creator
    registry.cancel(&world.author(ADAM), token).unwrap();
    assert_eq!(world.status(token), InvitationStatus::Cancelled);
    assert_eq!(registry.cancel(&alice, token), Err(CancelInvitationError::InvitationAlreadyCancelled));
    assert_eq!(registry.complete(&alice, token), Err(CompleteError::InvitationCancelled));

    let result = world.controller.backend().invited(&world.org, token);
    assert_eq!(result.unwrap_err(), ContextError::InvitationDeleted);
}

#[test]
fn complete_rules() {
    let world = World::new();
    let registry = world.controller.registry();
    let bob = world.author(BOB);
    let token = registry.create_device(&bob, false).unwrap().token;

    assert_eq!(registry.complete(&world.author(ALICE), token), Err(CompleteError::AuthorNotAllowed));

    // No attempt finished: nothing gets enrolled
    registry.complete(&bob, token).unwrap();
    assert_eq!(world.status(token), InvitationStatus::Completed);
    assert!(world.directory.enrollments(&world.org).is_empty());

    assert_eq!(registry.complete(&bob, token), Err(CompleteError::InvitationAlreadyCompleted));
    assert_eq!(registry.cancel(&bob, token), Err(CancelInvitationError::InvitationCompleted));
}

#[test]
fn user_invitation_info_lists_administrators() {
    let world = World::new();
    let token = world.controller.registry().create_user(&world.author(ALICE), "zack@example.com", false).unwrap().token;
    world.controller.arbiter().greeter_start(&world.author(ADAM), token).unwrap();

    let invited = world.controller.backend().invited(&world.org, token).unwrap();
    let info = world.controller.registry().info_as_invited(&invited).unwrap();

    let InvitationInfo::User { claimer_email, administrators, .. } = info else {
        panic!("expected user invitation info");
    };
    assert_eq!(claimer_email, "zack@example.com");
    let joined: HashMap<_, _> =
        administrators.iter().map(|a| (a.user_id, a.last_greeting_attempt_joined_on.is_some())).collect();
    assert_eq!(joined, HashMap::from([(UserId::from(ALICE), false), (UserId::from(ADAM), true)]));
}

#[test]
fn shamir_recovery_invitation() {
    let world = World::new();
    let registry = world.controller.registry();
    world.bob_shamir_setup(10);

    let result = registry.create_shamir_recovery(&world.author(ADAM), UserId::from(BOB), false);
    assert_eq!(result, Err(NewShamirRecoveryError::AuthorNotAllowed));
    let result = registry.create_shamir_recovery(&world.author(ALICE), UserId::from(0x404u128), false);
    assert_eq!(result, Err(NewShamirRecoveryError::UserNotFound));

    let token = registry.create_shamir_recovery(&world.author(ALICE), UserId::from(BOB), true).unwrap().token;
    assert_eq!(world.mailer.sent()[0].to, "bob@example.com");

    let invited = world.controller.backend().invited(&world.org, token).unwrap();
    let InvitationInfo::ShamirRecovery { threshold, recipients, .. } =
        registry.info_as_invited(&invited).unwrap()
    else {
        panic!("expected shamir recovery info");
    };
    assert_eq!(threshold, 1);
    assert_eq!(recipients.len(), 1);

    assert_eq!(registry.shamir_recovery_reveal(&invited, RevealToken::from(REVEAL)).unwrap(), b"ciphered");
    assert_eq!(
        registry.shamir_recovery_reveal(&invited, RevealToken::from(1u128)),
        Err(RevealError::BadRevealToken)
    );
}

#[test]
fn shamir_recovery_follows_setup_replacement() {
    let world = World::new();
    let registry = world.controller.registry();
    let alice = world.author(ALICE);
    world.bob_shamir_setup(10);

    let stale = registry.create_shamir_recovery(&alice, UserId::from(BOB), false).unwrap().token;
    world.bob_shamir_setup(20);

    // The bound setup is gone: the claimer token is dead
    let result = world.controller.backend().invited(&world.org, stale);
    assert_eq!(result.unwrap_err(), ContextError::InvitationDeleted);

    let fresh = registry.create_shamir_recovery(&alice, UserId::from(BOB), false).unwrap().token;
    assert_ne!(fresh, stale);
    assert_eq!(world.status(stale), InvitationStatus::Cancelled);

    let items = registry.list(&alice).unwrap();
    let deleted_on: Vec<_> = items
        .iter()
        .filter_map(|item| match item {
            InviteListItem::ShamirRecovery { shamir_recovery_deleted_on, .. } => Some(*shamir_recovery_deleted_on),
            _ => None,
        })
        .collect();
    assert_eq!(deleted_on, vec![Some(DateTime::from_secs(20)), None]);
}

#[test]
fn setup_replacement_races_stale_completion() {
    for _ in 0..32 {
        let world = World::new();
        let registry = world.controller.registry();
        let alice = world.author(ALICE);
        world.bob_shamir_setup(10);
        let stale = registry.create_shamir_recovery(&alice, UserId::from(BOB), false).unwrap().token;
        world.bob_shamir_setup(20);

        let bob = world.author(BOB);
        let (created, completed) = thread::scope(|scope| {
            let create = scope.spawn(|| registry.create_shamir_recovery(&alice, UserId::from(BOB), false));
            let complete = scope.spawn(|| registry.complete(&bob, stale));
            (create.join().unwrap(), complete.join().unwrap())
        });

        let fresh = created.unwrap().token;
        assert_eq!(world.status(fresh), InvitationStatus::Pending);
        match world.status(stale) {
            InvitationStatus::Completed => assert_eq!(completed, Ok(())),
            InvitationStatus::Cancelled => assert_eq!(completed, Err(CompleteError::InvitationCancelled)),
            InvitationStatus::Pending => panic!("stale invitation left pending"),
        }
    }
}

#[test]
fn reveal_requires_shamir_invitation() {
    let world = World::new();
    let token = world.controller.registry().create_device(&world.author(BOB), false).unwrap().token;
    let invited = world.controller.backend().invited(&world.org, token).unwrap();

    let result = world.controller.registry().shamir_recovery_reveal(&invited, RevealToken::from(REVEAL));
    assert_eq!(result, Err(RevealError::BadInvitationType));
}

#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    Cancel(usize),
    Complete(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..3).prop_map(Op::Create),
        1 => any::<usize>().prop_map(Op::Cancel),
        1 => any::<usize>().prop_map(Op::Complete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: at most one pending invitation per claimer email
    #[test]
    fn prop_one_pending_invitation_per_email(ops in prop::collection::vec(arb_op(), 1..30)) {
        let world = World::with(RecordingMailer::default(), InviteConfig::default());
        let registry = world.controller.registry();
        let alice = world.author(ALICE);
        let emails = ["x@example.com", "y@example.com", "z@example.com"];
        let mut tokens = Vec::new();

        for op in ops {
            match op {
                Op::Create(i) => tokens.push(registry.create_user(&alice, emails[i], false).unwrap().token),
                Op::Cancel(n) if !tokens.is_empty() => {
                    let _ = registry.cancel(&alice, tokens[n % tokens.len()]);
                },
                Op::Complete(n) if !tokens.is_empty() => {
                    let _ = registry.complete(&alice, tokens[n % tokens.len()]);
                },
                _ => {},
            }

            // ORACLE: count pending invitations by claimer key
            let mut pending: HashMap<_, usize> = HashMap::new();
            for invitation in world.storage.list_invitations(&world.org).unwrap() {
                if invitation.status == InvitationStatus::Pending {
                    *pending.entry(invitation.kind.claimer_key()).or_default() += 1;
                }
            }
            prop_assert!(pending.values().all(|&count| count == 1));
        }
    }
}
