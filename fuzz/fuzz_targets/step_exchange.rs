//! Fuzz target for the step exchange state machine
//!
//! Arbitrary interleavings of greeter and claimer submissions, replays and
//! divergent replays are applied to one attempt.
//!
//! # Invariants
//!
//! - Step logs only grow, and a recorded step never changes
//! - Once cancelled, the cancellation record never changes and every later
//!   call reports it
//! - `Ready` carries exactly the bytes the peer recorded at that index
//! - A log never holds more than the nine steps

#![no_main]

use arbitrary::Arbitrary;
use greet_core::{ExchangeOutcome, exchange, storage::StoredAttempt};
use greet_proto::{DateTime, GreeterOrClaimer, GreetingAttemptId, InvitationToken, STEP_COUNT, UserId};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Submission {
    by_claimer: bool,
    index: u8,
    payload: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    claimer_joined: bool,
    submissions: Vec<Submission>,
}

fuzz_target!(|scenario: Scenario| {
    let mut now = DateTime::from_secs(1);
    let mut attempt = StoredAttempt::joined_by(
        GreetingAttemptId::from(1u128),
        InvitationToken::from(2u128),
        UserId::from(3u128),
        GreeterOrClaimer::Greeter,
        now,
    );
    if scenario.claimer_joined {
        attempt.join(GreeterOrClaimer::Claimer, now);
    }

    for submission in &scenario.submissions {
        now = now.add_micros(1);
        let origin = if submission.by_claimer { GreeterOrClaimer::Claimer } else { GreeterOrClaimer::Greeter };
        let before = attempt.clone();

        let outcome = exchange(&mut attempt, origin, submission.index, &submission.payload, now);

        for side in [GreeterOrClaimer::Greeter, GreeterOrClaimer::Claimer] {
            let (old, new) = (before.steps(side), attempt.steps(side));
            assert!(new.len() >= old.len() && new[..old.len()] == *old, "step log rewritten");
            assert!(new.len() <= STEP_COUNT);
        }

        if let Some(cancelled) = before.cancelled {
            assert_eq!(attempt, before, "cancelled attempt changed");
            assert_eq!(outcome, ExchangeOutcome::Cancelled(cancelled));
        }

        if let ExchangeOutcome::Ready(payload) = &outcome {
            let peer = attempt.steps(origin.peer());
            assert_eq!(&peer[usize::from(submission.index)].payload, payload);
        }
        if outcome == ExchangeOutcome::Mismatch {
            assert!(attempt.cancelled.is_some());
        }
    }
});
