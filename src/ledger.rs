//! Per-store guarded execution
//!
//! The ledger runs one action against one backend: target existence check,
//! atomic guard + mutate, then the paired counter deltas. It is the only
//! component that writes counters; nothing else may touch those fields.
//!
//! Effects committed here are never rolled back by the coordinator. A
//! counter failure after an applied write leaves the store ahead of its
//! counters; that is reported as a store failure and left to
//! reconciliation, mirroring the absence of any cross-store transaction.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::ReciprocalAction;
use crate::classify::StoreOutcome;
use crate::store::{Store, WriteOutcome};

/// Guard-then-mutate executor for a single store.
pub struct CounterLedger {
    store: Arc<dyn Store>,
}

impl CounterLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run `action` for `actor_id` against this store.
    ///
    /// Never returns an error: store failures are folded into the outcome
    /// so the classifier can weigh them against the other backend.
    pub async fn apply(&self, action: &ReciprocalAction, actor_id: u64) -> StoreOutcome {
        let kind = self.store.kind();

        if let Some(filter) = action.existence_filter(actor_id) {
            match self.store.exists(&filter).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(store = ?kind, action = ?action.kind(), target = action.target_id(), "target not found");
                    return StoreOutcome::TargetMissing;
                }
                Err(e) => {
                    warn!(store = ?kind, action = ?action.kind(), error = %e, "existence check failed");
                    return StoreOutcome::Failed;
                }
            }
        }

        if let Some((guard, mutation)) = action.conditional_mutation(actor_id) {
            match self.store.conditional_write(&guard, &mutation).await {
                Ok(WriteOutcome { applied: true }) => {}
                Ok(WriteOutcome { applied: false }) => return action.on_not_applied(),
                Err(e) => {
                    warn!(store = ?kind, action = ?action.kind(), error = %e, "conditional write failed");
                    return StoreOutcome::Failed;
                }
            }
        }

        for (key, field, delta) in action.counter_deltas(actor_id) {
            if let Err(e) = self.store.increment(key, field, delta).await {
                // The forward mutation already landed; this store now needs
                // reconciliation, not a retry of the whole action.
                warn!(
                    store = ?kind,
                    action = ?action.kind(),
                    entity = ?key,
                    field = ?field,
                    error = %e,
                    "counter increment failed after applied write"
                );
                return StoreOutcome::Failed;
            }
        }

        StoreOutcome::Ok
    }
}
