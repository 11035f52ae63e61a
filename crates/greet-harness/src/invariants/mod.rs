//! Invitation and greeting attempt invariants.
//!
//! Simulation drivers replay random operation sequences against the
//! controller; after every step the stored invitations and attempts are read
//! back into a [`SystemSnapshot`] and every registered [`Invariant`] is
//! evaluated against it. The snapshot keeps each record's history, so checks
//! can compare a record with its earlier versions: an invitation that left
//! `Pending`, an attempt that got cancelled, a step log that grew.
//!
//! ```ignore
//! let mut snapshot = SystemSnapshot::empty();
//! snapshot.observe(&storage, &org)?;
//! InvariantRegistry::standard().check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    AttemptsHaveInvitation, CancellationIsFinal, PendingUniqueness, SingleActiveAttempt, StepLogAppendOnly,
    TerminalImmutability,
};
pub use snapshot::SystemSnapshot;

/// Outcome of one check.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant and the record that broke it.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the failing check.
    pub invariant: &'static str,
    /// Offending token or attempt, with the observed state.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Property of the stored invitation state.
pub trait Invariant: Send + Sync {
    /// Short name used in violation reports.
    fn name(&self) -> &'static str;

    /// Evaluates the property over every record in `state`.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Set of checks evaluated together.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// No checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invitation and attempt property the controller guarantees:
    ///
    /// - [`PendingUniqueness`]: a claimer has at most one pending invitation
    /// - [`TerminalImmutability`]: completed or cancelled invitations are frozen
    /// - [`SingleActiveAttempt`]: a greeter has at most one live attempt per invitation
    /// - [`AttemptsHaveInvitation`]: every attempt points at a stored invitation
    /// - [`CancellationIsFinal`]: a cancelled attempt is never revived
    /// - [`StepLogAppendOnly`]: step logs only grow
    pub fn standard() -> Self {
        let invariants: Vec<Box<dyn Invariant>> = vec![
            Box::new(PendingUniqueness),
            Box::new(TerminalImmutability),
            Box::new(SingleActiveAttempt),
            Box::new(AttemptsHaveInvitation),
            Box::new(CancellationIsFinal),
            Box::new(StepLogAppendOnly),
        ];
        Self { invariants }
    }

    /// Registers one more check.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Runs every check; collects all violations rather than stopping at the first.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> = self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Test helper: panics listing every violation, prefixed by `context`.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("invariants broken {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Names of the registered checks, in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.invariants.iter().map(|inv| inv.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_invitations_and_attempts() {
        let registry = InvariantRegistry::standard();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&"pending_uniqueness"));
        assert!(names.contains(&"step_log_append_only"));
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let snapshot = SystemSnapshot::empty();
        assert!(InvariantRegistry::standard().check_all(&snapshot).is_ok());
    }

    #[test]
    fn added_check_reports_its_violation() {
        struct AlwaysBroken;
        impl Invariant for AlwaysBroken {
            fn name(&self) -> &'static str {
                "always_broken"
            }

            fn check(&self, _state: &SystemSnapshot) -> InvariantResult {
                Err(Violation { invariant: "always_broken", message: "token 00".to_string() })
            }
        }

        let mut registry = InvariantRegistry::new();
        registry.add(AlwaysBroken);
        let violations = registry.check_all(&SystemSnapshot::empty()).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].to_string(), "always_broken: token 00");
    }
}
