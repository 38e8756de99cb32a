//! In-process store
//!
//! DashMap-backed stand-in for either backend, used in dev mode and as the
//! controllable double in coordinator tests. Conditional writes ride on the
//! atomicity of the underlying map operations (`insert`/`remove` report
//! whether they changed anything), so the guard contract holds without a
//! surrounding lock.
//!
//! Fault injection: `set_fail` makes every call return a backend error,
//! `set_delay` stalls every call, which is how tests exercise the
//! coordinator's timeout and divergence paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::error::StoreError;
use crate::notify::{self, NotificationRecord, ReadOutcome};
use crate::store::{
    CounterField, EntityKey, Filter, Guard, Mutation, PostCounters, PostTarget, Store, StoreKind,
    UserCounters, WriteOutcome,
};

#[derive(Debug, Clone)]
struct TopicRecord {
    author_id: u64,
    title: String,
    content: String,
    counters: PostCounters,
}

#[derive(Debug, Clone)]
struct CommentRecord {
    author_id: u64,
    content: String,
    counters: PostCounters,
}

/// In-process implementation of [`Store`].
pub struct MemoryStore {
    kind: StoreKind,
    users: DashMap<u64, UserCounters>,
    markets: DashSet<u64>,
    follows: DashSet<(u64, u64)>,
    collections: DashSet<(u64, u64)>,
    topics: DashMap<u64, TopicRecord>,
    comments: DashMap<u64, CommentRecord>,
    notifications: DashMap<u64, NotificationRecord>,
    // Generated post ids; seeded fixtures use small explicit ids.
    next_post_id: AtomicU64,
    fail: AtomicBool,
    delay_ms: AtomicU64,
}

impl MemoryStore {
    /// A store impersonating the given backend kind.
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            users: DashMap::new(),
            markets: DashSet::new(),
            follows: DashSet::new(),
            collections: DashSet::new(),
            topics: DashMap::new(),
            comments: DashMap::new(),
            notifications: DashMap::new(),
            next_post_id: AtomicU64::new(1_000_000),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Make every subsequent call fail with a backend error.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    /// Stall every subsequent call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("injected failure".to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Seeding and read-back
    // =========================================================================

    pub fn seed_user(&self, id: u64) {
        self.users.insert(id, UserCounters::default());
    }

    pub fn seed_market(&self, id: u64) {
        self.markets.insert(id);
    }

    pub fn seed_topic(&self, id: u64, author_id: u64, title: &str, content: &str) {
        self.topics.insert(
            id,
            TopicRecord {
                author_id,
                title: title.to_string(),
                content: content.to_string(),
                counters: PostCounters::default(),
            },
        );
    }

    pub fn seed_comment(&self, id: u64, author_id: u64, content: &str) {
        self.comments.insert(
            id,
            CommentRecord {
                author_id,
                content: content.to_string(),
                counters: PostCounters::default(),
            },
        );
    }

    pub fn seed_notification(&self, record: NotificationRecord) {
        self.notifications.insert(record.id, record);
    }

    pub fn has_follow_edge(&self, follower_id: u64, followee_id: u64) -> bool {
        self.follows.contains(&(follower_id, followee_id))
    }

    pub fn is_collected(&self, user_id: u64, market_id: u64) -> bool {
        self.collections.contains(&(user_id, market_id))
    }

    pub fn user_counters(&self, id: u64) -> Option<UserCounters> {
        self.users.get(&id).map(|entry| *entry.value())
    }

    pub fn post_counters(&self, target: PostTarget) -> Option<PostCounters> {
        match target {
            PostTarget::Topic(id) => self.topics.get(&id).map(|t| t.counters),
            PostTarget::Comment(id) => self.comments.get(&id).map(|c| c.counters),
        }
    }

    pub fn notification(&self, id: u64) -> Option<NotificationRecord> {
        self.notifications.get(&id).map(|entry| entry.value().clone())
    }

    /// Stored topic as `(author_id, title, content)`.
    pub fn topic(&self, id: u64) -> Option<(u64, String, String)> {
        self.topics
            .get(&id)
            .map(|t| (t.author_id, t.title.clone(), t.content.clone()))
    }

    /// Stored comment as `(author_id, content)`.
    pub fn comment(&self, id: u64) -> Option<(u64, String)> {
        self.comments
            .get(&id)
            .map(|c| (c.author_id, c.content.clone()))
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    /// Unread notifications for a recipient, newest first.
    pub fn unread_notifications(&self, recipient_id: u64) -> Vec<NotificationRecord> {
        let mut unread: Vec<NotificationRecord> = self
            .notifications
            .iter()
            .filter(|entry| {
                entry.value().recipient_id == recipient_id
                    && entry.value().status == crate::notify::NotifyStatus::Unread
            })
            .map(|entry| entry.value().clone())
            .collect();
        unread.sort_by(|a, b| b.time.cmp(&a.time));
        unread
    }

    fn post_exists(&self, target: PostTarget) -> bool {
        match target {
            PostTarget::Topic(id) => self.topics.contains_key(&id),
            PostTarget::Comment(id) => self.comments.contains_key(&id),
        }
    }

    fn alloc_post_id(&self) -> u64 {
        self.next_post_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn exists(&self, filter: &Filter) -> Result<bool, StoreError> {
        self.gate().await?;
        let found = match filter {
            Filter::FollowEdge {
                follower_id,
                followee_id,
            } => self.follows.contains(&(*follower_id, *followee_id)),
            Filter::CollectionMember { user_id, market_id } => {
                self.collections.contains(&(*user_id, *market_id))
            }
            Filter::UserExists { id } => self.users.contains_key(id),
            Filter::MarketExists { id } => self.markets.contains(id),
            Filter::PostExists { target } => self.post_exists(*target),
            Filter::Notification { id, recipient_id } => self
                .notifications
                .get(id)
                .map(|entry| entry.value().recipient_id == *recipient_id)
                .unwrap_or(false),
        };
        Ok(found)
    }

    async fn conditional_write(
        &self,
        guard: &Guard,
        mutation: &Mutation,
    ) -> Result<WriteOutcome, StoreError> {
        self.gate().await?;
        match (guard, mutation) {
            (
                Guard::Absent(_),
                Mutation::CreateFollowEdge {
                    follower_id,
                    followee_id,
                },
            ) => {
                let inserted = self.follows.insert((*follower_id, *followee_id));
                Ok(if inserted {
                    WriteOutcome::applied()
                } else {
                    WriteOutcome::skipped()
                })
            }
            (
                Guard::Present(_),
                Mutation::DeleteFollowEdge {
                    follower_id,
                    followee_id,
                },
            ) => {
                let removed = self.follows.remove(&(*follower_id, *followee_id)).is_some();
                Ok(if removed {
                    WriteOutcome::applied()
                } else {
                    WriteOutcome::skipped()
                })
            }
            (Guard::Absent(_), Mutation::AddCollectionMember { user_id, market_id }) => {
                let inserted = self.collections.insert((*user_id, *market_id));
                Ok(if inserted {
                    WriteOutcome::applied()
                } else {
                    WriteOutcome::skipped()
                })
            }
            (Guard::Present(_), Mutation::RemoveCollectionMember { user_id, market_id }) => {
                let removed = self.collections.remove(&(*user_id, *market_id)).is_some();
                Ok(if removed {
                    WriteOutcome::applied()
                } else {
                    WriteOutcome::skipped()
                })
            }
            (
                Guard::Unconditional,
                Mutation::InsertTopic {
                    author_id,
                    title,
                    content,
                },
            ) => {
                self.topics.insert(
                    self.alloc_post_id(),
                    TopicRecord {
                        author_id: *author_id,
                        title: title.clone(),
                        content: content.clone(),
                        counters: PostCounters::default(),
                    },
                );
                Ok(WriteOutcome::applied())
            }
            (
                Guard::Present(_),
                Mutation::InsertComment {
                    author_id,
                    target,
                    content,
                },
            ) => {
                if !self.post_exists(*target) {
                    return Ok(WriteOutcome::skipped());
                }
                self.comments.insert(
                    self.alloc_post_id(),
                    CommentRecord {
                        author_id: *author_id,
                        content: content.clone(),
                        counters: PostCounters::default(),
                    },
                );
                Ok(WriteOutcome::applied())
            }
            (Guard::Present(_), Mutation::MarkNotificationRead { id, recipient_id }) => {
                match self.notifications.get_mut(id) {
                    Some(mut entry) => {
                        match notify::try_mark_read(entry.value_mut(), *recipient_id) {
                            ReadOutcome::Applied => Ok(WriteOutcome::applied()),
                            ReadOutcome::AlreadyRead | ReadOutcome::NotOwner => {
                                Ok(WriteOutcome::skipped())
                            }
                        }
                    }
                    None => Ok(WriteOutcome::skipped()),
                }
            }
            _ => Err(StoreError::UnsupportedWrite),
        }
    }

    async fn increment(
        &self,
        key: EntityKey,
        field: CounterField,
        delta: i64,
    ) -> Result<(), StoreError> {
        self.gate().await?;
        match key {
            EntityKey::User(id) => {
                let mut entry = self
                    .users
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::CounterTargetMissing(format!("user {id}")))?;
                let counters = entry.value_mut();
                match field {
                    CounterField::FollowNum => counters.follow_num += delta,
                    CounterField::FollowerNum => counters.follower_num += delta,
                    CounterField::CollectedMarketNum => counters.collected_market_num += delta,
                    CounterField::TopicNum => counters.topic_num += delta,
                    _ => {
                        return Err(StoreError::Backend(format!(
                            "field {} not a user counter",
                            field.field_name()
                        )))
                    }
                }
                Ok(())
            }
            EntityKey::Topic(id) => {
                let mut entry = self
                    .topics
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::CounterTargetMissing(format!("topic {id}")))?;
                bump_post(&mut entry.value_mut().counters, field, delta)
            }
            EntityKey::Comment(id) => {
                let mut entry = self
                    .comments
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::CounterTargetMissing(format!("comment {id}")))?;
                bump_post(&mut entry.value_mut().counters, field, delta)
            }
        }
    }
}

fn bump_post(counters: &mut PostCounters, field: CounterField, delta: i64) -> Result<(), StoreError> {
    match field {
        CounterField::DiggNum => counters.digg_num += delta,
        CounterField::DissNum => counters.diss_num += delta,
        CounterField::CommentNum => counters.comment_num += delta,
        _ => {
            return Err(StoreError::Backend(format!(
                "field {} not a post counter",
                field.field_name()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyStatus;

    #[tokio::test]
    async fn create_edge_is_idempotent() {
        let store = MemoryStore::new(StoreKind::Document);
        let guard = Guard::Absent(Filter::FollowEdge {
            follower_id: 1,
            followee_id: 2,
        });
        let mutation = Mutation::CreateFollowEdge {
            follower_id: 1,
            followee_id: 2,
        };

        assert!(store.conditional_write(&guard, &mutation).await.unwrap().applied);
        assert!(!store.conditional_write(&guard, &mutation).await.unwrap().applied);
        assert!(store.has_follow_edge(1, 2));
    }

    #[tokio::test]
    async fn increment_on_missing_user_errors() {
        let store = MemoryStore::new(StoreKind::Document);
        let err = store
            .increment(EntityKey::User(42), CounterField::FollowNum, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CounterTargetMissing(_)));
    }

    #[tokio::test]
    async fn notification_read_is_monotonic() {
        let store = MemoryStore::new(StoreKind::Relational);
        store.seed_notification(NotificationRecord::new(5, 1, "follow"));
        let guard = Guard::Present(Filter::Notification {
            id: 5,
            recipient_id: 1,
        });
        let mutation = Mutation::MarkNotificationRead {
            id: 5,
            recipient_id: 1,
        };

        assert!(store.conditional_write(&guard, &mutation).await.unwrap().applied);
        assert!(!store.conditional_write(&guard, &mutation).await.unwrap().applied);
        assert_eq!(store.notification(5).unwrap().status, NotifyStatus::Read);
    }

    #[tokio::test]
    async fn unread_listing_excludes_read_and_foreign_records() {
        let store = MemoryStore::new(StoreKind::Document);
        store.seed_notification(NotificationRecord::new(1, 1, "follow"));
        store.seed_notification(NotificationRecord::new(2, 1, "digg"));
        store.seed_notification(NotificationRecord::new(3, 9, "follow"));

        let guard = Guard::Present(Filter::Notification {
            id: 1,
            recipient_id: 1,
        });
        store
            .conditional_write(
                &guard,
                &Mutation::MarkNotificationRead {
                    id: 1,
                    recipient_id: 1,
                },
            )
            .await
            .unwrap();

        let unread = store.unread_notifications(1);
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, 2);
    }

    #[tokio::test]
    async fn inserted_topic_is_readable_under_its_generated_id() {
        let store = MemoryStore::new(StoreKind::Document);
        store
            .conditional_write(
                &Guard::Unconditional,
                &Mutation::InsertTopic {
                    author_id: 1,
                    title: "btc".to_string(),
                    content: "discuss".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.topic_count(), 1);
        // Generated ids start at the fixture ceiling.
        let (author_id, title, content) = store.topic(1_000_000).unwrap();
        assert_eq!(author_id, 1);
        assert_eq!(title, "btc");
        assert_eq!(content, "discuss");
    }

    #[tokio::test]
    async fn inserted_comment_is_readable_under_its_generated_id() {
        let store = MemoryStore::new(StoreKind::Relational);
        store.seed_topic(10, 2, "btc", "discuss");
        store
            .conditional_write(
                &Guard::Present(Filter::PostExists {
                    target: PostTarget::Topic(10),
                }),
                &Mutation::InsertComment {
                    author_id: 1,
                    target: PostTarget::Topic(10),
                    content: "first".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.comment_count(), 1);
        assert_eq!(store.comment(1_000_000).unwrap(), (1, "first".to_string()));
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_backend_error() {
        let store = MemoryStore::new(StoreKind::Document);
        store.seed_user(1);
        store.set_fail(true);
        assert!(store.exists(&Filter::UserExists { id: 1 }).await.is_err());
    }
}
