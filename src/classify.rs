//! Outcome classification
//!
//! Each store reports its own outcome for a mutation; this module merges
//! them into the single caller-visible result. The policy is availability
//! over consistency: one healthy backend is enough for the caller to see
//! success, and the resulting divergence is surfaced to observers instead
//! of being silently repaired.

use crate::store::StoreKind;

/// Outcome of one store-local guard + mutate round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Guard held and the mutation (plus counters) applied.
    Ok,
    /// Guard found the action already applied (e.g. edge exists).
    AlreadyDone,
    /// Guard found nothing to undo (e.g. no edge to delete).
    NotDone,
    /// The counterpart target does not exist in this store.
    TargetMissing,
    /// Backend failure or timeout; details are logged at the source.
    Failed,
}

/// Single caller-visible result of a coordinated mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Ok,
    AlreadyDone,
    NotDone,
    TargetNotFound,
    PermissionDenied,
    General,
}

/// Merge per-store outcomes into one result.
///
/// Precedence: any `Ok` wins; otherwise a unanimous `AlreadyDone`,
/// `NotDone` or `TargetMissing` verdict is reported as such; anything
/// mixed (including store failures) collapses to `General`.
pub fn classify(outcomes: &[(StoreKind, StoreOutcome)]) -> ActionOutcome {
    if outcomes.is_empty() {
        // The coordinator rejects empty principal sets before any store
        // call, so this only happens on a misuse of the classifier.
        return ActionOutcome::General;
    }

    if outcomes.iter().any(|(_, o)| *o == StoreOutcome::Ok) {
        return ActionOutcome::Ok;
    }
    if outcomes.iter().all(|(_, o)| *o == StoreOutcome::AlreadyDone) {
        return ActionOutcome::AlreadyDone;
    }
    if outcomes.iter().all(|(_, o)| *o == StoreOutcome::NotDone) {
        return ActionOutcome::NotDone;
    }
    if outcomes.iter().all(|(_, o)| *o == StoreOutcome::TargetMissing) {
        return ActionOutcome::TargetNotFound;
    }
    ActionOutcome::General
}

/// Whether the queried stores disagreed about this mutation.
///
/// Divergence includes the success case where only one backend applied the
/// write; it is reported through the event bus so an operator can schedule
/// reconciliation.
pub fn diverged(outcomes: &[(StoreKind, StoreOutcome)]) -> bool {
    outcomes
        .windows(2)
        .any(|pair| pair[0].1 != pair[1].1)
}
