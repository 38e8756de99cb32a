//! Store capability interface
//!
//! The coordinator consumes both persistence backends through this narrow
//! interface: a guarded existence read, an atomic conditional write, and a
//! counter increment. The two production implementations are
//! [`document::DocumentStore`] (MongoDB) and [`relational::RelationalStore`]
//! (SQLite); [`memory::MemoryStore`] is an in-process stand-in for either
//! backend used in dev mode and tests.
//!
//! Conditional writes carry their guard with them and must be applied
//! atomically by the backend (unique-key insert, filtered delete, filtered
//! update). A sequential read-then-write is not a conforming
//! implementation: the guard race it opens is exactly what this interface
//! exists to close.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub mod document;
pub mod memory;
pub mod relational;

pub use document::DocumentStore;
pub use memory::MemoryStore;
pub use relational::RelationalStore;

/// Which backend a store instance represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKind {
    Document,
    Relational,
}

/// A diggable/commentable post: a topic or a comment.
///
/// Wire requests carry `(type, id)` with type 0 = topic, 1 = comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostTarget {
    Topic(u64),
    Comment(u64),
}

impl PostTarget {
    /// Build from the wire `(type, id)` pair; `None` for an unknown type.
    pub fn from_wire(post_type: u8, post_id: u64) -> Option<Self> {
        match post_type {
            0 => Some(PostTarget::Topic(post_id)),
            1 => Some(PostTarget::Comment(post_id)),
            _ => None,
        }
    }

    pub fn id(&self) -> u64 {
        match *self {
            PostTarget::Topic(id) | PostTarget::Comment(id) => id,
        }
    }
}

/// Entity owning a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    User(u64),
    Topic(u64),
    Comment(u64),
}

impl EntityKey {
    /// Counter holder for a post target.
    pub fn from_post(target: PostTarget) -> Self {
        match target {
            PostTarget::Topic(id) => EntityKey::Topic(id),
            PostTarget::Comment(id) => EntityKey::Comment(id),
        }
    }
}

/// Counter fields mutated through the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    FollowNum,
    FollowerNum,
    CollectedMarketNum,
    TopicNum,
    CommentNum,
    DiggNum,
    DissNum,
}

impl CounterField {
    /// Column / document field name, identical across both backends.
    pub fn field_name(&self) -> &'static str {
        match self {
            CounterField::FollowNum => "follow_num",
            CounterField::FollowerNum => "follower_num",
            CounterField::CollectedMarketNum => "collected_market_num",
            CounterField::TopicNum => "topic_num",
            CounterField::CommentNum => "comment_num",
            CounterField::DiggNum => "digg_num",
            CounterField::DissNum => "diss_num",
        }
    }
}

/// Existence predicate evaluated by `Store::exists`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    FollowEdge { follower_id: u64, followee_id: u64 },
    CollectionMember { user_id: u64, market_id: u64 },
    UserExists { id: u64 },
    MarketExists { id: u64 },
    PostExists { target: PostTarget },
    Notification { id: u64, recipient_id: u64 },
}

/// Guard under which a conditional write applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The filtered entity must be absent (e.g. no edge yet).
    Absent(Filter),
    /// The filtered entity must be present (e.g. edge to delete).
    Present(Filter),
    /// The write always applies.
    Unconditional,
}

/// State change applied under a guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateFollowEdge { follower_id: u64, followee_id: u64 },
    DeleteFollowEdge { follower_id: u64, followee_id: u64 },
    AddCollectionMember { user_id: u64, market_id: u64 },
    RemoveCollectionMember { user_id: u64, market_id: u64 },
    InsertTopic { author_id: u64, title: String, content: String },
    InsertComment { author_id: u64, target: PostTarget, content: String },
    MarkNotificationRead { id: u64, recipient_id: u64 },
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Whether the guard held and the mutation was applied.
    pub applied: bool,
}

impl WriteOutcome {
    pub fn applied() -> Self {
        Self { applied: true }
    }

    pub fn skipped() -> Self {
        Self { applied: false }
    }
}

/// User counter snapshot, read back by tests and the account surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserCounters {
    pub follow_num: i64,
    pub follower_num: i64,
    pub collected_market_num: i64,
    pub topic_num: i64,
}

/// Reaction/comment counter snapshot for a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostCounters {
    pub digg_num: i64,
    pub diss_num: i64,
    pub comment_num: i64,
}

/// Narrow persistence interface consumed by the coordinator.
///
/// Implementations must make `conditional_write` atomic with respect to its
/// guard, and must treat every call as independent: the coordinator issues
/// calls for the two backends concurrently and never coordinates a shared
/// transaction.
#[async_trait]
pub trait Store: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Guarded existence read.
    async fn exists(&self, filter: &Filter) -> Result<bool, StoreError>;

    /// Atomically apply `mutation` iff `guard` holds.
    async fn conditional_write(
        &self,
        guard: &Guard,
        mutation: &Mutation,
    ) -> Result<WriteOutcome, StoreError>;

    /// Apply a counter delta to an existing entity.
    async fn increment(
        &self,
        key: EntityKey,
        field: CounterField,
        delta: i64,
    ) -> Result<(), StoreError>;
}
