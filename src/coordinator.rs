//! Dual-store mutation coordination
//!
//! `MutationCoordinator::execute` fans one action out to every store the
//! caller has a principal for, joins the per-store outcomes under a
//! per-store timeout, and classifies them into the single caller-visible
//! result. The coordinator holds no per-call state between invocations;
//! everything about one execution lives on its stack.
//!
//! Two concurrency rules are load-bearing here:
//!
//! - Executions of the same logical mutation (same actors, target and
//!   action kind) are serialized through a keyed lock, so a burst of
//!   duplicate requests creates at most one edge and moves counters once.
//! - Store calls run on spawned tasks. A timeout or a caller that goes
//!   away abandons the wait, not the write: an in-flight store call always
//!   runs to completion rather than being cancelled mid-mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::action::{ActionKey, ReciprocalAction};
use crate::auth::PrincipalSet;
use crate::classify::{self, ActionOutcome, StoreOutcome};
use crate::events::{ActionEvent, EventBus};
use crate::ledger::CounterLedger;
use crate::store::{Store, StoreKind};

/// Coordinates one mutation across both backends.
pub struct MutationCoordinator {
    ledgers: HashMap<StoreKind, Arc<CounterLedger>>,
    locks: DashMap<ActionKey, Arc<Mutex<()>>>,
    events: Arc<EventBus>,
    store_timeout: Duration,
}

impl MutationCoordinator {
    /// Build a coordinator over the given stores.
    ///
    /// One store per [`StoreKind`]; a later store of the same kind
    /// replaces the earlier one.
    pub fn new(stores: Vec<Arc<dyn Store>>, events: Arc<EventBus>, store_timeout: Duration) -> Self {
        let ledgers = stores
            .into_iter()
            .map(|store| (store.kind(), Arc::new(CounterLedger::new(store))))
            .collect();
        Self {
            ledgers,
            locks: DashMap::new(),
            events,
            store_timeout,
        }
    }

    /// Execute one action for the given principals.
    pub async fn execute(
        &self,
        action: &ReciprocalAction,
        principals: &PrincipalSet,
    ) -> ActionOutcome {
        if principals.is_empty() {
            return ActionOutcome::PermissionDenied;
        }
        if action.requires_target() && action.target_id() == 0 {
            return ActionOutcome::TargetNotFound;
        }

        let key = action.key(principals.key_ids());
        let lock = self.lock_for(key);
        let outcomes = {
            let _held = lock.lock().await;
            self.fan_out(action, principals).await
        };
        self.release(key, lock);

        let result = classify::classify(&outcomes);
        debug!(action = ?action.kind(), target = action.target_id(), outcomes = ?outcomes, result = ?result, "action classified");

        if classify::diverged(&outcomes) {
            warn!(
                action = ?action.kind(),
                target = action.target_id(),
                outcomes = ?outcomes,
                "store outcomes diverged"
            );
            self.events.emit(ActionEvent::StoreDivergence {
                kind: action.kind(),
                target_id: action.target_id(),
                outcomes: outcomes.clone(),
            });
        }
        self.events.emit(ActionEvent::Executed {
            kind: action.kind(),
            target_id: action.target_id(),
            result,
        });

        result
    }

    /// Run the action against every principal's store concurrently and
    /// collect one outcome per store.
    async fn fan_out(
        &self,
        action: &ReciprocalAction,
        principals: &PrincipalSet,
    ) -> Vec<(StoreKind, StoreOutcome)> {
        let mut pending: Vec<(StoreKind, Option<JoinHandle<StoreOutcome>>)> = Vec::new();

        for principal in principals.iter() {
            match self.ledgers.get(&principal.store) {
                Some(ledger) => {
                    let ledger = Arc::clone(ledger);
                    let action = action.clone();
                    let actor_id = principal.id;
                    let handle =
                        tokio::spawn(async move { ledger.apply(&action, actor_id).await });
                    pending.push((principal.store, Some(handle)));
                }
                None => {
                    warn!(store = ?principal.store, "no store configured for principal");
                    pending.push((principal.store, None));
                }
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (kind, handle) in pending {
            let outcome = match handle {
                None => StoreOutcome::Failed,
                Some(handle) => match timeout(self.store_timeout, handle).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join_error)) => {
                        warn!(store = ?kind, error = %join_error, "store task failed");
                        StoreOutcome::Failed
                    }
                    // The abandoned task keeps running to completion; only
                    // the wait is given up.
                    Err(_) => {
                        warn!(
                            store = ?kind,
                            timeout_ms = self.store_timeout.as_millis() as u64,
                            "store call timed out"
                        );
                        StoreOutcome::Failed
                    }
                },
            };
            outcomes.push((kind, outcome));
        }
        outcomes
    }

    fn lock_for(&self, key: ActionKey) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_default().clone()
    }

    /// Drop the keyed lock entry once no other execution is waiting on it.
    fn release(&self, key: ActionKey, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(&key, |_, entry| Arc::strong_count(entry) <= 1);
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::store::MemoryStore;

    fn two_store_setup() -> (MutationCoordinator, Arc<MemoryStore>, Arc<MemoryStore>, PrincipalSet) {
        let doc = Arc::new(MemoryStore::new(StoreKind::Document));
        let rel = Arc::new(MemoryStore::new(StoreKind::Relational));
        for store in [&doc, &rel] {
            store.seed_user(1);
            store.seed_user(2);
        }
        let coordinator = MutationCoordinator::new(
            vec![doc.clone() as Arc<dyn Store>, rel.clone() as Arc<dyn Store>],
            Arc::new(EventBus::new()),
            Duration::from_millis(200),
        );
        let principals = PrincipalSet::from_iter([
            Principal::new(1, StoreKind::Document),
            Principal::new(1, StoreKind::Relational),
        ]);
        (coordinator, doc, rel, principals)
    }

    #[tokio::test]
    async fn empty_principals_denied_before_any_store_call() {
        let (coordinator, doc, _rel, _) = two_store_setup();
        let result = coordinator
            .execute(
                &ReciprocalAction::Follow { followee_id: 2 },
                &PrincipalSet::new(),
            )
            .await;
        assert_eq!(result, ActionOutcome::PermissionDenied);
        assert!(!doc.has_follow_edge(1, 2));
    }

    #[tokio::test]
    async fn zero_target_rejected() {
        let (coordinator, _doc, _rel, principals) = two_store_setup();
        let result = coordinator
            .execute(&ReciprocalAction::Follow { followee_id: 0 }, &principals)
            .await;
        assert_eq!(result, ActionOutcome::TargetNotFound);
    }

    #[tokio::test]
    async fn follow_lands_on_both_stores() {
        let (coordinator, doc, rel, principals) = two_store_setup();
        let result = coordinator
            .execute(&ReciprocalAction::Follow { followee_id: 2 }, &principals)
            .await;
        assert_eq!(result, ActionOutcome::Ok);
        assert!(doc.has_follow_edge(1, 2));
        assert!(rel.has_follow_edge(1, 2));
    }

    #[tokio::test]
    async fn timed_out_store_degrades_to_failure_but_other_carries() {
        let (coordinator, _doc, rel, principals) = two_store_setup();
        rel.set_delay(Duration::from_millis(500));

        let result = coordinator
            .execute(&ReciprocalAction::Follow { followee_id: 2 }, &principals)
            .await;
        // Document store succeeded; relational timed out.
        assert_eq!(result, ActionOutcome::Ok);
    }

    #[tokio::test]
    async fn keyed_lock_entries_are_reclaimed() {
        let (coordinator, _doc, _rel, principals) = two_store_setup();
        coordinator
            .execute(&ReciprocalAction::Follow { followee_id: 2 }, &principals)
            .await;
        assert!(coordinator.locks.is_empty());
    }
}
