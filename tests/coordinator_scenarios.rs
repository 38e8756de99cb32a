//! End-to-end coordinator scenarios over two in-process backends.
//!
//! Each test drives the coordinator the way the request glue does, with
//! one store impersonating the document backend and one the relational
//! backend, and asserts on caller-visible results, persisted state and
//! counters on both sides.

use std::sync::Arc;
use std::time::Duration;

use coinboard::auth::{Principal, PrincipalSet};
use coinboard::events::{ActionEvent, EventBus};
use coinboard::notify::{NotificationRecord, NotifyStatus};
use coinboard::store::{Filter, Guard, MemoryStore, Mutation, PostTarget, Store};
use coinboard::{ActionOutcome, MutationCoordinator, ReciprocalAction, StoreKind};

struct Setup {
    coordinator: Arc<MutationCoordinator>,
    doc: Arc<MemoryStore>,
    rel: Arc<MemoryStore>,
    principals: PrincipalSet,
    events: Arc<EventBus>,
}

fn setup() -> Setup {
    coinboard::config::init_logging("error");
    let doc = Arc::new(MemoryStore::new(StoreKind::Document));
    let rel = Arc::new(MemoryStore::new(StoreKind::Relational));
    for store in [&doc, &rel] {
        store.seed_user(1);
        store.seed_user(2);
        store.seed_market(7);
        store.seed_topic(10, 2, "btc", "discuss");
        store.seed_notification(NotificationRecord::new(5, 1, "follow"));
    }

    let events = Arc::new(EventBus::new());
    let coordinator = Arc::new(MutationCoordinator::new(
        vec![doc.clone() as Arc<dyn Store>, rel.clone() as Arc<dyn Store>],
        events.clone(),
        Duration::from_millis(200),
    ));
    let principals = PrincipalSet::from_iter([
        Principal::new(1, StoreKind::Document),
        Principal::new(1, StoreKind::Relational),
    ]);

    Setup {
        coordinator,
        doc,
        rel,
        principals,
        events,
    }
}

async fn seed_edge(store: &MemoryStore, follower_id: u64, followee_id: u64) {
    let guard = Guard::Absent(Filter::FollowEdge {
        follower_id,
        followee_id,
    });
    let mutation = Mutation::CreateFollowEdge {
        follower_id,
        followee_id,
    };
    assert!(store.conditional_write(&guard, &mutation).await.unwrap().applied);
}

#[tokio::test]
async fn duplicate_follow_is_idempotent() {
    let s = setup();
    let follow = ReciprocalAction::Follow { followee_id: 2 };

    assert_eq!(
        s.coordinator.execute(&follow, &s.principals).await,
        ActionOutcome::Ok
    );
    assert_eq!(
        s.coordinator.execute(&follow, &s.principals).await,
        ActionOutcome::AlreadyDone
    );

    // Counters moved exactly once on each side of each store.
    for store in [&s.doc, &s.rel] {
        assert_eq!(store.user_counters(1).unwrap().follow_num, 1);
        assert_eq!(store.user_counters(2).unwrap().follower_num, 1);
    }
}

#[tokio::test]
async fn follow_is_symmetric_across_edge_and_counters() {
    let s = setup();
    s.coordinator
        .execute(&ReciprocalAction::Follow { followee_id: 2 }, &s.principals)
        .await;

    for store in [&s.doc, &s.rel] {
        assert!(store.has_follow_edge(1, 2));
        assert!(!store.has_follow_edge(2, 1));
        assert_eq!(store.user_counters(1).unwrap().follow_num, 1);
        assert_eq!(store.user_counters(1).unwrap().follower_num, 0);
        assert_eq!(store.user_counters(2).unwrap().follower_num, 1);
        assert_eq!(store.user_counters(2).unwrap().follow_num, 0);
    }
}

#[tokio::test]
async fn unfollow_of_absent_edge_changes_nothing() {
    let s = setup();
    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::Unfollow { followee_id: 2 }, &s.principals)
            .await,
        ActionOutcome::NotDone
    );
    for store in [&s.doc, &s.rel] {
        assert_eq!(store.user_counters(1).unwrap().follow_num, 0);
        assert_eq!(store.user_counters(2).unwrap().follower_num, 0);
    }
}

#[tokio::test]
async fn follow_then_unfollow_returns_counters_to_zero() {
    let s = setup();
    s.coordinator
        .execute(&ReciprocalAction::Follow { followee_id: 2 }, &s.principals)
        .await;
    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::Unfollow { followee_id: 2 }, &s.principals)
            .await,
        ActionOutcome::Ok
    );
    for store in [&s.doc, &s.rel] {
        assert!(!store.has_follow_edge(1, 2));
        assert_eq!(store.user_counters(1).unwrap().follow_num, 0);
        assert_eq!(store.user_counters(2).unwrap().follower_num, 0);
    }
}

#[tokio::test]
async fn concurrent_follows_create_one_edge_and_one_delta() {
    let s = setup();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let coordinator = s.coordinator.clone();
        let principals = s.principals.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .execute(&ReciprocalAction::Follow { followee_id: 2 }, &principals)
                .await
        }));
    }

    let mut ok = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ActionOutcome::Ok => ok += 1,
            ActionOutcome::AlreadyDone => already += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(already, 15);
    for store in [&s.doc, &s.rel] {
        assert!(store.has_follow_edge(1, 2));
        assert_eq!(store.user_counters(1).unwrap().follow_num, 1);
        assert_eq!(store.user_counters(2).unwrap().follower_num, 1);
    }
}

#[tokio::test]
async fn notification_read_is_monotonic_across_stores() {
    let s = setup();
    let read = ReciprocalAction::ReadNotification { notification_id: 5 };

    assert_eq!(
        s.coordinator.execute(&read, &s.principals).await,
        ActionOutcome::Ok
    );
    // Re-reading is a no-op success and never regresses the status.
    assert_eq!(
        s.coordinator.execute(&read, &s.principals).await,
        ActionOutcome::Ok
    );
    for store in [&s.doc, &s.rel] {
        assert_eq!(store.notification(5).unwrap().status, NotifyStatus::Read);
    }
}

#[tokio::test]
async fn foreign_notification_is_not_found() {
    let s = setup();
    // Notification 5 belongs to user 1; user 2 cannot read it.
    let stranger = PrincipalSet::from_iter([
        Principal::new(2, StoreKind::Document),
        Principal::new(2, StoreKind::Relational),
    ]);
    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::ReadNotification { notification_id: 5 }, &stranger)
            .await,
        ActionOutcome::TargetNotFound
    );
    for store in [&s.doc, &s.rel] {
        assert_eq!(store.notification(5).unwrap().status, NotifyStatus::Unread);
    }
}

#[tokio::test]
async fn divergent_stores_still_succeed_but_are_observable() {
    let s = setup();
    // The document store already has the edge; the relational store does not.
    seed_edge(&s.doc, 1, 2).await;

    let mut receiver = s.events.subscribe();
    let result = s
        .coordinator
        .execute(&ReciprocalAction::Follow { followee_id: 2 }, &s.principals)
        .await;

    // One healthy backend carries the request.
    assert_eq!(result, ActionOutcome::Ok);

    // The disagreement is published for reconciliation, not hidden.
    let mut saw_divergence = false;
    while let Ok(event) = receiver.try_recv() {
        if let ActionEvent::StoreDivergence { target_id, .. } = event {
            assert_eq!(target_id, 2);
            saw_divergence = true;
        }
    }
    assert!(saw_divergence);
}

#[tokio::test]
async fn failing_store_degrades_without_blocking_the_healthy_one() {
    let s = setup();
    s.rel.set_fail(true);

    let mut receiver = s.events.subscribe();
    let result = s
        .coordinator
        .execute(&ReciprocalAction::Follow { followee_id: 2 }, &s.principals)
        .await;

    assert_eq!(result, ActionOutcome::Ok);
    assert!(s.doc.has_follow_edge(1, 2));
    assert!(!s.rel.has_follow_edge(1, 2));

    let mut saw_divergence = false;
    while let Ok(event) = receiver.try_recv() {
        if matches!(event, ActionEvent::StoreDivergence { .. }) {
            saw_divergence = true;
        }
    }
    assert!(saw_divergence);
}

#[tokio::test]
async fn slow_store_times_out_and_the_other_carries() {
    let s = setup();
    s.rel.set_delay(Duration::from_millis(500));

    let result = s
        .coordinator
        .execute(&ReciprocalAction::Follow { followee_id: 2 }, &s.principals)
        .await;

    assert_eq!(result, ActionOutcome::Ok);
    assert!(s.doc.has_follow_edge(1, 2));
}

#[tokio::test]
async fn both_stores_failing_is_a_general_error() {
    let s = setup();
    s.doc.set_fail(true);
    s.rel.set_fail(true);

    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::Follow { followee_id: 2 }, &s.principals)
            .await,
        ActionOutcome::General
    );
}

#[tokio::test]
async fn comment_on_missing_post_is_target_not_found() {
    let s = setup();
    assert_eq!(
        s.coordinator
            .execute(
                &ReciprocalAction::PublishComment {
                    target: PostTarget::Topic(404),
                    content: "hello".to_string(),
                },
                &s.principals
            )
            .await,
        ActionOutcome::TargetNotFound
    );
}

#[tokio::test]
async fn comment_bumps_target_comment_counter() {
    let s = setup();
    assert_eq!(
        s.coordinator
            .execute(
                &ReciprocalAction::PublishComment {
                    target: PostTarget::Topic(10),
                    content: "first".to_string(),
                },
                &s.principals
            )
            .await,
        ActionOutcome::Ok
    );
    for store in [&s.doc, &s.rel] {
        assert_eq!(store.post_counters(PostTarget::Topic(10)).unwrap().comment_num, 1);
    }
}

#[tokio::test]
async fn collect_and_uncollect_roundtrip() {
    let s = setup();
    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::CollectMarket { market_id: 7 }, &s.principals)
            .await,
        ActionOutcome::Ok
    );
    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::CollectMarket { market_id: 7 }, &s.principals)
            .await,
        ActionOutcome::AlreadyDone
    );
    for store in [&s.doc, &s.rel] {
        assert!(store.is_collected(1, 7));
        assert_eq!(store.user_counters(1).unwrap().collected_market_num, 1);
    }

    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::UncollectMarket { market_id: 7 }, &s.principals)
            .await,
        ActionOutcome::Ok
    );
    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::UncollectMarket { market_id: 7 }, &s.principals)
            .await,
        ActionOutcome::NotDone
    );
    for store in [&s.doc, &s.rel] {
        assert!(!store.is_collected(1, 7));
        assert_eq!(store.user_counters(1).unwrap().collected_market_num, 0);
    }
}

#[tokio::test]
async fn diss_increments_its_own_counter() {
    let s = setup();
    let target = PostTarget::Topic(10);
    s.coordinator
        .execute(&ReciprocalAction::Digg { target }, &s.principals)
        .await;
    s.coordinator
        .execute(&ReciprocalAction::Diss { target }, &s.principals)
        .await;

    for store in [&s.doc, &s.rel] {
        let counters = store.post_counters(target).unwrap();
        assert_eq!(counters.digg_num, 1);
        assert_eq!(counters.diss_num, 1);
    }
}

#[tokio::test]
async fn single_principal_runs_against_one_store_only() {
    let s = setup();
    let only_doc = PrincipalSet::from_iter([Principal::new(1, StoreKind::Document)]);

    assert_eq!(
        s.coordinator
            .execute(&ReciprocalAction::Follow { followee_id: 2 }, &only_doc)
            .await,
        ActionOutcome::Ok
    );
    assert!(s.doc.has_follow_edge(1, 2));
    assert!(!s.rel.has_follow_edge(1, 2));
}
