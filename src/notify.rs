//! Notification records and their read-state machine
//!
//! A notification belongs to exactly one recipient. Its status only ever
//! moves `Unread -> Read`, triggered by the owning recipient; repeat reads
//! are no-op successes and the state never regresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read state of a notification. Persisted as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyStatus {
    Unread,
    Read,
}

impl NotifyStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            NotifyStatus::Unread => 0,
            NotifyStatus::Read => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value == 1 {
            NotifyStatus::Read
        } else {
            NotifyStatus::Unread
        }
    }
}

/// One notification as persisted by either backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: u64,
    pub event: String,
    pub recipient_id: u64,
    pub title: String,
    pub content: String,
    pub path: String,
    pub status: NotifyStatus,
    pub time: DateTime<Utc>,
}

impl NotificationRecord {
    /// A fresh unread notification for `recipient_id`.
    pub fn new(id: u64, recipient_id: u64, event: impl Into<String>) -> Self {
        Self {
            id,
            event: event.into(),
            recipient_id,
            title: String::new(),
            content: String::new(),
            path: String::new(),
            status: NotifyStatus::Unread,
            time: Utc::now(),
        }
    }
}

/// Result of attempting to mark a record read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Unread -> Read happened.
    Applied,
    /// Already read; a no-op success for the caller.
    AlreadyRead,
    /// Caller is not the recipient; nothing changed.
    NotOwner,
}

/// Apply the read transition. The only mutation path for `status`.
pub fn try_mark_read(record: &mut NotificationRecord, caller_id: u64) -> ReadOutcome {
    if record.recipient_id != caller_id {
        return ReadOutcome::NotOwner;
    }
    match record.status {
        NotifyStatus::Read => ReadOutcome::AlreadyRead,
        NotifyStatus::Unread => {
            record.status = NotifyStatus::Read;
            ReadOutcome::Applied
        }
    }
}
