//! Relational store backed by SQLite
//!
//! Guard semantics ride on single SQL statements: `INSERT OR IGNORE`
//! against a unique pair index for edge creation, filtered `DELETE` /
//! `UPDATE` for removal and state transitions, and `INSERT ... SELECT
//! WHERE EXISTS` for writes conditioned on another row. The affected-row
//! count is the applied/skipped verdict, so there is no read-then-write
//! window.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params};
use tracing::info;

use crate::error::StoreError;
use crate::notify::{NotificationRecord, NotifyStatus};
use crate::store::{
    CounterField, EntityKey, Filter, Guard, Mutation, PostCounters, PostTarget, Store, StoreKind,
    UserCounters, WriteOutcome,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL DEFAULT '',
    follow_num INTEGER NOT NULL DEFAULT 0,
    follower_num INTEGER NOT NULL DEFAULT 0,
    collected_market_num INTEGER NOT NULL DEFAULT 0,
    topic_num INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS follow (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    follow_id INTEGER NOT NULL,
    time TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (uid, follow_id)
);

CREATE TABLE IF NOT EXISTS market (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS market_collection (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER NOT NULL,
    market_id INTEGER NOT NULL,
    time TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (uid, market_id)
);

CREATE TABLE IF NOT EXISTS topic (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    author_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    digg_num INTEGER NOT NULL DEFAULT 0,
    diss_num INTEGER NOT NULL DEFAULT 0,
    comment_num INTEGER NOT NULL DEFAULT 0,
    time TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS comment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    author_id INTEGER NOT NULL,
    topic_id INTEGER,
    parent_id INTEGER,
    content TEXT NOT NULL,
    digg_num INTEGER NOT NULL DEFAULT 0,
    diss_num INTEGER NOT NULL DEFAULT 0,
    comment_num INTEGER NOT NULL DEFAULT 0,
    time TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS notify (
    id INTEGER PRIMARY KEY,
    event TEXT NOT NULL DEFAULT '',
    recipient_id INTEGER NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    path TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0,
    time TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// SQLite implementation of [`Store`].
pub struct RelationalStore {
    conn: Arc<Mutex<Connection>>,
}

impl RelationalStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "opening relational store");
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connection(format!("failed to open sqlite db: {e}")))?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(format!("failed to open sqlite db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Backend(format!("failed to apply schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))?;
        f(&conn)
    }

    fn exists_row<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<bool, StoreError> {
        conn.query_row(sql, params, |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
            .map_err(|e| StoreError::Backend(format!("existence query failed: {e}")))
    }

    // =========================================================================
    // Seeding and read-back (account/registration surface lives elsewhere)
    // =========================================================================

    pub fn insert_user(&self, id: u64, username: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user (id, username) VALUES (?1, ?2)",
                params![id as i64, username],
            )
            .map_err(|e| StoreError::Backend(format!("failed to insert user: {e}")))?;
            Ok(())
        })
    }

    pub fn insert_market(&self, id: u64, name: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO market (id, name) VALUES (?1, ?2)",
                params![id as i64, name],
            )
            .map_err(|e| StoreError::Backend(format!("failed to insert market: {e}")))?;
            Ok(())
        })
    }

    pub fn insert_topic(
        &self,
        id: u64,
        author_id: u64,
        title: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO topic (id, author_id, title, content) VALUES (?1, ?2, ?3, ?4)",
                params![id as i64, author_id as i64, title, content],
            )
            .map_err(|e| StoreError::Backend(format!("failed to insert topic: {e}")))?;
            Ok(())
        })
    }

    pub fn insert_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO notify (id, event, recipient_id, title, content, path, status, time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id as i64,
                    record.event,
                    record.recipient_id as i64,
                    record.title,
                    record.content,
                    record.path,
                    record.status.as_i64(),
                    record.time.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Backend(format!("failed to insert notification: {e}")))?;
            Ok(())
        })
    }

    pub fn user_counters(&self, id: u64) -> Result<Option<UserCounters>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT follow_num, follower_num, collected_market_num, topic_num
                 FROM user WHERE id = ?1",
                params![id as i64],
                |row| {
                    Ok(UserCounters {
                        follow_num: row.get(0)?,
                        follower_num: row.get(1)?,
                        collected_market_num: row.get(2)?,
                        topic_num: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("failed to read user counters: {e}")))
        })
    }

    pub fn post_counters(&self, target: PostTarget) -> Result<Option<PostCounters>, StoreError> {
        let (table, id) = match target {
            PostTarget::Topic(id) => ("topic", id),
            PostTarget::Comment(id) => ("comment", id),
        };
        let sql =
            format!("SELECT digg_num, diss_num, comment_num FROM {table} WHERE id = ?1");
        self.with_conn(|conn| {
            conn.query_row(&sql, params![id as i64], |row| {
                Ok(PostCounters {
                    digg_num: row.get(0)?,
                    diss_num: row.get(1)?,
                    comment_num: row.get(2)?,
                })
            })
            .optional()
            .map_err(|e| StoreError::Backend(format!("failed to read post counters: {e}")))
        })
    }

    /// Unread notifications for a recipient, newest first.
    pub fn unread_notifications(
        &self,
        recipient_id: u64,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let raw: Vec<(i64, String, i64, String, String, String, i64, String)> =
            self.with_conn(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, event, recipient_id, title, content, path, status, time
                         FROM notify WHERE recipient_id = ?1 AND status = 0
                         ORDER BY time DESC",
                    )
                    .map_err(|e| StoreError::Backend(format!("failed to prepare query: {e}")))?;
                let rows = stmt
                    .query_map(params![recipient_id as i64], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ))
                    })
                    .map_err(|e| StoreError::Backend(format!("failed to query notifications: {e}")))?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(|e| StoreError::Backend(format!("failed to read row: {e}")))
            })?;

        raw.into_iter()
            .map(|(id, event, recipient, title, content, path, status, time)| {
                let time = DateTime::parse_from_rfc3339(&time)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StoreError::Backend(format!("bad notification timestamp: {e}")))?;
                Ok(NotificationRecord {
                    id: id as u64,
                    event,
                    recipient_id: recipient as u64,
                    title,
                    content,
                    path,
                    status: NotifyStatus::from_i64(status),
                    time,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Store for RelationalStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    async fn exists(&self, filter: &Filter) -> Result<bool, StoreError> {
        self.with_conn(|conn| match filter {
            Filter::FollowEdge {
                follower_id,
                followee_id,
            } => Self::exists_row(
                conn,
                "SELECT 1 FROM follow WHERE uid = ?1 AND follow_id = ?2",
                params![*follower_id as i64, *followee_id as i64],
            ),
            Filter::CollectionMember { user_id, market_id } => Self::exists_row(
                conn,
                "SELECT 1 FROM market_collection WHERE uid = ?1 AND market_id = ?2",
                params![*user_id as i64, *market_id as i64],
            ),
            Filter::UserExists { id } => Self::exists_row(
                conn,
                "SELECT 1 FROM user WHERE id = ?1",
                params![*id as i64],
            ),
            Filter::MarketExists { id } => Self::exists_row(
                conn,
                "SELECT 1 FROM market WHERE id = ?1",
                params![*id as i64],
            ),
            Filter::PostExists { target } => match target {
                PostTarget::Topic(id) => Self::exists_row(
                    conn,
                    "SELECT 1 FROM topic WHERE id = ?1",
                    params![*id as i64],
                ),
                PostTarget::Comment(id) => Self::exists_row(
                    conn,
                    "SELECT 1 FROM comment WHERE id = ?1",
                    params![*id as i64],
                ),
            },
            Filter::Notification { id, recipient_id } => Self::exists_row(
                conn,
                "SELECT 1 FROM notify WHERE id = ?1 AND recipient_id = ?2",
                params![*id as i64, *recipient_id as i64],
            ),
        })
    }

    async fn conditional_write(
        &self,
        guard: &Guard,
        mutation: &Mutation,
    ) -> Result<WriteOutcome, StoreError> {
        self.with_conn(|conn| {
            let changed = match (guard, mutation) {
                (
                    Guard::Absent(_),
                    Mutation::CreateFollowEdge {
                        follower_id,
                        followee_id,
                    },
                ) => conn.execute(
                    "INSERT OR IGNORE INTO follow (uid, follow_id) VALUES (?1, ?2)",
                    params![*follower_id as i64, *followee_id as i64],
                ),
                (
                    Guard::Present(_),
                    Mutation::DeleteFollowEdge {
                        follower_id,
                        followee_id,
                    },
                ) => conn.execute(
                    "DELETE FROM follow WHERE uid = ?1 AND follow_id = ?2",
                    params![*follower_id as i64, *followee_id as i64],
                ),
                (Guard::Absent(_), Mutation::AddCollectionMember { user_id, market_id }) => conn
                    .execute(
                        "INSERT OR IGNORE INTO market_collection (uid, market_id) VALUES (?1, ?2)",
                        params![*user_id as i64, *market_id as i64],
                    ),
                (Guard::Present(_), Mutation::RemoveCollectionMember { user_id, market_id }) => {
                    conn.execute(
                        "DELETE FROM market_collection WHERE uid = ?1 AND market_id = ?2",
                        params![*user_id as i64, *market_id as i64],
                    )
                }
                (
                    Guard::Unconditional,
                    Mutation::InsertTopic {
                        author_id,
                        title,
                        content,
                    },
                ) => conn.execute(
                    "INSERT INTO topic (author_id, title, content) VALUES (?1, ?2, ?3)",
                    params![*author_id as i64, title, content],
                ),
                (
                    Guard::Present(_),
                    Mutation::InsertComment {
                        author_id,
                        target,
                        content,
                    },
                ) => match target {
                    PostTarget::Topic(topic_id) => conn.execute(
                        "INSERT INTO comment (author_id, topic_id, content)
                         SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM topic WHERE id = ?2)",
                        params![*author_id as i64, *topic_id as i64, content],
                    ),
                    PostTarget::Comment(parent_id) => conn.execute(
                        "INSERT INTO comment (author_id, parent_id, content)
                         SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM comment WHERE id = ?2)",
                        params![*author_id as i64, *parent_id as i64, content],
                    ),
                },
                (Guard::Present(_), Mutation::MarkNotificationRead { id, recipient_id }) => conn
                    .execute(
                        "UPDATE notify SET status = 1
                         WHERE id = ?1 AND recipient_id = ?2 AND status = 0",
                        params![*id as i64, *recipient_id as i64],
                    ),
                _ => return Err(StoreError::UnsupportedWrite),
            }
            .map_err(|e| StoreError::Backend(format!("conditional write failed: {e}")))?;

            Ok(if changed > 0 {
                WriteOutcome::applied()
            } else {
                WriteOutcome::skipped()
            })
        })
    }

    async fn increment(
        &self,
        key: EntityKey,
        field: CounterField,
        delta: i64,
    ) -> Result<(), StoreError> {
        let (table, id) = match key {
            EntityKey::User(id) => ("user", id),
            EntityKey::Topic(id) => ("topic", id),
            EntityKey::Comment(id) => ("comment", id),
        };
        let column = field.field_name();
        let sql = format!("UPDATE {table} SET {column} = {column} + ?1 WHERE id = ?2");

        self.with_conn(|conn| {
            let changed = conn
                .execute(&sql, params![delta, id as i64])
                .map_err(|e| StoreError::Backend(format!("counter update failed: {e}")))?;
            if changed == 0 {
                return Err(StoreError::CounterTargetMissing(format!("{table} {id}")));
            }
            Ok(())
        })
    }
}
