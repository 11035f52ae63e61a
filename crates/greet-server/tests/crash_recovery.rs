//! Crash recovery tests for `RedbStorage`.
//!
//! These tests verify that invitations and greeting attempts persist across
//! database close/reopen cycles, simulating server restarts in the middle of
//! a greeting.

use std::path::Path;

use greet_core::{
    InvitationController, InviteConfig, Mailer, MemoryDirectory, SendEmailError, StepOutcome,
    directory::UserProfile, mailer::InvitationEmail, storage::Storage,
};
use greet_proto::{
    ClaimerStep, DeviceId, GreeterStep, HumanHandle, InvitationStatus, InvitationToken, OrganizationId, UserId,
};
use greet_server::{RedbStorage, SystemEnv};
use tempfile::tempdir;

#[derive(Clone)]
struct NoMailer;

impl Mailer for NoMailer {
    fn send(&self, _email: &InvitationEmail) -> Result<(), SendEmailError> {
        Ok(())
    }
}

const ALICE: u128 = 0xa1;

fn org() -> OrganizationId {
    OrganizationId::new("CoolOrg").unwrap()
}

fn directory() -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    directory.add_organization(&org());
    directory.add_user(
        &org(),
        UserId::from(ALICE),
        DeviceId::from(ALICE),
        HumanHandle::new("alice@example.com", "alice"),
        UserProfile::Admin,
    );
    directory
}

fn controller(
    db_path: &Path,
    directory: &MemoryDirectory,
) -> InvitationController<SystemEnv, RedbStorage, MemoryDirectory, NoMailer> {
    let storage = RedbStorage::open(db_path).unwrap();
    InvitationController::new(SystemEnv::new(), storage, directory.clone(), NoMailer, InviteConfig::default())
}

#[test]
fn test_invitations_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.redb");
    let directory = directory();

    // Create invitations, then simulate clean shutdown
    let (kept, cancelled) = {
        let controller = controller(&db_path, &directory);
        let alice = controller.backend().authenticate(&org(), DeviceId::from(ALICE)).unwrap();
        let kept = controller.registry().create_user(&alice, "zack@example.com", false).unwrap().token;
        let cancelled = controller.registry().create_user(&alice, "yann@example.com", false).unwrap().token;
        controller.registry().cancel(&alice, cancelled).unwrap();
        (kept, cancelled)

        // Database dropped
    };

    // Reopen and verify
    {
        let controller = controller(&db_path, &directory);
        let alice = controller.backend().authenticate(&org(), DeviceId::from(ALICE)).unwrap();

        let listed: Vec<(InvitationToken, InvitationStatus)> = controller
            .registry()
            .list(&alice)
            .unwrap()
            .iter()
            .map(|item| (item.token(), item.status()))
            .collect();
        assert_eq!(listed, vec![(kept, InvitationStatus::Pending), (cancelled, InvitationStatus::Cancelled)]);

        // The pending invitation is still the one handed out for that email
        let again = controller.registry().create_user(&alice, "zack@example.com", false).unwrap();
        assert_eq!(again.token, kept);
    }
}

#[test]
fn test_greeting_resumes_after_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.redb");
    let directory = directory();

    let greeter_key = GreeterStep::Number0WaitPeer { public_key: [0x67; 32] };
    let claimer_key = ClaimerStep::Number0WaitPeer { public_key: [0x63; 32] };

    // Greeter submits step 0 before the crash
    let (token, attempt) = {
        let controller = controller(&db_path, &directory);
        let alice = controller.backend().authenticate(&org(), DeviceId::from(ALICE)).unwrap();
        let token = controller.registry().create_user(&alice, "zack@example.com", false).unwrap().token;

        let attempt = controller.arbiter().greeter_start(&alice, token).unwrap();
        let invited = controller.backend().invited(&org(), token).unwrap();
        controller.arbiter().claimer_start(&invited, UserId::from(ALICE)).unwrap();

        let outcome = controller.exchanger().greeter_step(&alice, attempt, &greeter_key).unwrap();
        assert_eq!(outcome, StepOutcome::NotReady);
        (token, attempt)
    };

    // After restart the claimer picks up the greeter's key
    {
        let controller = controller(&db_path, &directory);
        let stored = controller.backend().storage().load_attempt(&org(), attempt).unwrap().unwrap();
        assert_eq!(stored.greeter_steps.len(), 1);
        assert!(stored.claimer_joined.is_some());

        let invited = controller.backend().invited(&org(), token).unwrap();
        let outcome = controller.exchanger().claimer_step(&invited, attempt, &claimer_key).unwrap();
        assert_eq!(outcome, StepOutcome::Ready(greeter_key.clone()));

        // Rejoining after restart keeps the same attempt (both sides joined)
        let alice = controller.backend().authenticate(&org(), DeviceId::from(ALICE)).unwrap();
        assert_eq!(controller.arbiter().greeter_start(&alice, token).unwrap(), attempt);
        let outcome = controller.exchanger().greeter_step(&alice, attempt, &greeter_key).unwrap();
        assert_eq!(outcome, StepOutcome::Ready(claimer_key));
    }

    // Attempts are indexed by invitation
    {
        let storage = RedbStorage::open(&db_path).unwrap();
        let attempts = storage.list_attempts(&org(), token).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].id, attempt);
        assert_eq!(attempts[0].claimer_steps.len(), 1);
    }
}

#[test]
fn test_multiple_restart_cycles() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.redb");
    let directory = directory();

    let mut tokens = Vec::new();
    for cycle in 0..5 {
        let controller = controller(&db_path, &directory);
        let alice = controller.backend().authenticate(&org(), DeviceId::from(ALICE)).unwrap();

        let email = format!("user{cycle}@example.com");
        tokens.push(controller.registry().create_user(&alice, &email, false).unwrap().token);

        let listed: Vec<_> = controller.registry().list(&alice).unwrap().iter().map(|i| i.token()).collect();
        assert_eq!(listed, tokens, "cycle {cycle}");
    }
}
