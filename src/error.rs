//! Error types for the action coordinator

use thiserror::Error;

/// Failure of a single store call.
///
/// Store failures are values merged by the outcome classifier, never
/// propagated as panics across the coordinator boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Counter target missing: {0}")]
    CounterTargetMissing(String),

    #[error("Unsupported conditional write")]
    UnsupportedWrite,
}

/// Input rejection raised before any store is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Title must not be empty")]
    TitleEmpty,

    #[error("Title exceeds {max} characters")]
    TitleTooLong { max: usize },

    #[error("Title contains a forbidden word")]
    TitleForbiddenWord,

    #[error("Content must not be empty")]
    ContentEmpty,

    #[error("Content exceeds {max} characters")]
    ContentTooLong { max: usize },

    #[error("Content contains a forbidden word")]
    ContentForbiddenWord,

    #[error("Post type must be 0 (topic) or 1 (comment)")]
    BadPostType,

    #[error("Target id must be positive")]
    BadTargetId,

    #[error("Action cannot target the acting user")]
    SelfTarget,
}
