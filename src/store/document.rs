//! Document store backed by MongoDB
//!
//! Guard semantics ride on single-document atomic operations: follow edges
//! use a deterministic `_id` (`follow-{uid}-{followee}`) so a duplicate
//! insert reports the E11000 write error instead of creating a second
//! edge, collection membership is a filtered `$push`/`$pull` on the user
//! document, and notification reads are a filtered `$set` on the unread
//! status. Generated post ids come from an atomically incremented
//! `counters` collection.

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::info;

use crate::error::StoreError;
use crate::store::{
    CounterField, EntityKey, Filter, Guard, Mutation, PostTarget, Store, StoreKind, WriteOutcome,
};

/// MongoDB implementation of [`Store`].
#[derive(Clone)]
pub struct DocumentStore {
    db: Database,
}

impl DocumentStore {
    /// Connect, ping and prepare indexes.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        info!(db = db_name, "connecting to document store");

        // Bounded server selection, to avoid hanging on an unreachable
        // backend; a slow store must degrade, not block the coordinator.
        let timeout_uri = if uri.contains('?') {
            format!("{uri}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        } else {
            format!("{uri}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect to MongoDB: {e}")))?;
        let db = client.database(db_name);

        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(format!("MongoDB ping failed: {e}")))?;

        let store = Self { db };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = IndexOptions::builder().unique(true).build();
        for name in ["user", "market", "topic", "comment", "notify"] {
            let model = IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(unique.clone())
                .build();
            self.coll(name)
                .create_index(model)
                .await
                .map_err(|e| StoreError::Backend(format!("failed to create index on {name}: {e}")))?;
        }
        Ok(())
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Next value of a named id sequence, allocated atomically.
    async fn next_id(&self, sequence: &str) -> Result<i64, StoreError> {
        let counter = self
            .coll("counters")
            .find_one_and_update(doc! { "_id": sequence }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| StoreError::Backend(format!("id sequence update failed: {e}")))?
            .ok_or_else(|| StoreError::Backend("id sequence missing after upsert".to_string()))?;
        counter
            .get_i64("seq")
            .map_err(|e| StoreError::Backend(format!("bad id sequence document: {e}")))
    }
}

/// Deterministic edge document id; doubles as the uniqueness guard.
fn edge_id(follower_id: u64, followee_id: u64) -> String {
    format!("follow-{follower_id}-{followee_id}")
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        &*error.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write_error))
            if write_error.code == 11000
    )
}

#[async_trait]
impl Store for DocumentStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Document
    }

    async fn exists(&self, filter: &Filter) -> Result<bool, StoreError> {
        let found = match filter {
            Filter::FollowEdge {
                follower_id,
                followee_id,
            } => {
                self.coll("follow")
                    .find_one(doc! { "_id": edge_id(*follower_id, *followee_id) })
                    .await
            }
            Filter::CollectionMember { user_id, market_id } => {
                self.coll("user")
                    .find_one(doc! {
                        "id": *user_id as i64,
                        "collected_markets": *market_id as i64,
                    })
                    .await
            }
            Filter::UserExists { id } => {
                self.coll("user").find_one(doc! { "id": *id as i64 }).await
            }
            Filter::MarketExists { id } => {
                self.coll("market").find_one(doc! { "id": *id as i64 }).await
            }
            Filter::PostExists { target } => match target {
                PostTarget::Topic(id) => {
                    self.coll("topic").find_one(doc! { "id": *id as i64 }).await
                }
                PostTarget::Comment(id) => {
                    self.coll("comment").find_one(doc! { "id": *id as i64 }).await
                }
            },
            Filter::Notification { id, recipient_id } => {
                self.coll("notify")
                    .find_one(doc! {
                        "id": *id as i64,
                        "recipient_id": *recipient_id as i64,
                    })
                    .await
            }
        }
        .map_err(|e| StoreError::Backend(format!("existence query failed: {e}")))?;

        Ok(found.is_some())
    }

    async fn conditional_write(
        &self,
        guard: &Guard,
        mutation: &Mutation,
    ) -> Result<WriteOutcome, StoreError> {
        match (guard, mutation) {
            (
                Guard::Absent(_),
                Mutation::CreateFollowEdge {
                    follower_id,
                    followee_id,
                },
            ) => {
                let edge = doc! {
                    "_id": edge_id(*follower_id, *followee_id),
                    "uid": *follower_id as i64,
                    "follow_id": *followee_id as i64,
                    "time": DateTime::now(),
                };
                match self.coll("follow").insert_one(edge).await {
                    Ok(_) => Ok(WriteOutcome::applied()),
                    Err(e) if is_duplicate_key(&e) => Ok(WriteOutcome::skipped()),
                    Err(e) => Err(StoreError::Backend(format!("edge insert failed: {e}"))),
                }
            }
            (
                Guard::Present(_),
                Mutation::DeleteFollowEdge {
                    follower_id,
                    followee_id,
                },
            ) => {
                let result = self
                    .coll("follow")
                    .delete_one(doc! { "_id": edge_id(*follower_id, *followee_id) })
                    .await
                    .map_err(|e| StoreError::Backend(format!("edge delete failed: {e}")))?;
                Ok(if result.deleted_count > 0 {
                    WriteOutcome::applied()
                } else {
                    WriteOutcome::skipped()
                })
            }
            (Guard::Absent(_), Mutation::AddCollectionMember { user_id, market_id }) => {
                // Filtered push: only matches while the market is absent
                // from the list, so the membership add is atomic.
                let result = self
                    .coll("user")
                    .update_one(
                        doc! {
                            "id": *user_id as i64,
                            "collected_markets": { "$ne": *market_id as i64 },
                        },
                        doc! { "$push": { "collected_markets": *market_id as i64 } },
                    )
                    .await
                    .map_err(|e| StoreError::Backend(format!("membership add failed: {e}")))?;
                Ok(if result.modified_count > 0 {
                    WriteOutcome::applied()
                } else {
                    WriteOutcome::skipped()
                })
            }
            (Guard::Present(_), Mutation::RemoveCollectionMember { user_id, market_id }) => {
                let result = self
                    .coll("user")
                    .update_one(
                        doc! { "id": *user_id as i64 },
                        doc! { "$pull": { "collected_markets": *market_id as i64 } },
                    )
                    .await
                    .map_err(|e| StoreError::Backend(format!("membership remove failed: {e}")))?;
                Ok(if result.modified_count > 0 {
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
                let id = self.next_id("topic").await?;
                let topic = doc! {
                    "id": id,
                    "author_id": *author_id as i64,
                    "title": title.as_str(),
                    "content": content.as_str(),
                    "digg_num": 0_i64,
                    "diss_num": 0_i64,
                    "comment_num": 0_i64,
                    "time": DateTime::now(),
                };
                self.coll("topic")
                    .insert_one(topic)
                    .await
                    .map_err(|e| StoreError::Backend(format!("topic insert failed: {e}")))?;
                Ok(WriteOutcome::applied())
            }
            (
                Guard::Present(guard_filter),
                Mutation::InsertComment {
                    author_id,
                    target,
                    content,
                },
            ) => {
                // Cross-document writes have no single-statement guard in a
                // document store; posts are never deleted, so the residual
                // window after this check is benign.
                if !self.exists(guard_filter).await? {
                    return Ok(WriteOutcome::skipped());
                }
                let id = self.next_id("comment").await?;
                let mut comment = doc! {
                    "id": id,
                    "author_id": *author_id as i64,
                    "content": content.as_str(),
                    "digg_num": 0_i64,
                    "diss_num": 0_i64,
                    "comment_num": 0_i64,
                    "time": DateTime::now(),
                };
                match target {
                    PostTarget::Topic(topic_id) => {
                        comment.insert("topic_id", *topic_id as i64);
                    }
                    PostTarget::Comment(parent_id) => {
                        comment.insert("parent_id", *parent_id as i64);
                    }
                }
                self.coll("comment")
                    .insert_one(comment)
                    .await
                    .map_err(|e| StoreError::Backend(format!("comment insert failed: {e}")))?;
                Ok(WriteOutcome::applied())
            }
            (Guard::Present(_), Mutation::MarkNotificationRead { id, recipient_id }) => {
                let result = self
                    .coll("notify")
                    .update_one(
                        doc! {
                            "id": *id as i64,
                            "recipient_id": *recipient_id as i64,
                            "status": 0_i64,
                        },
                        doc! { "$set": { "status": 1_i64 } },
                    )
                    .await
                    .map_err(|e| StoreError::Backend(format!("notification update failed: {e}")))?;
                Ok(if result.modified_count > 0 {
                    WriteOutcome::applied()
                } else {
                    WriteOutcome::skipped()
                })
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
        let (name, id) = match key {
            EntityKey::User(id) => ("user", id),
            EntityKey::Topic(id) => ("topic", id),
            EntityKey::Comment(id) => ("comment", id),
        };

        let mut inc = Document::new();
        inc.insert(field.field_name(), delta);

        let result = self
            .coll(name)
            .update_one(doc! { "id": id as i64 }, doc! { "$inc": inc })
            .await
            .map_err(|e| StoreError::Backend(format!("counter update failed: {e}")))?;

        if result.matched_count == 0 {
            return Err(StoreError::CounterTargetMissing(format!("{name} {id}")));
        }
        Ok(())
    }
}
