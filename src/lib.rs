//! Coinboard - dual-store social action coordination
//!
//! Core of a social/forum backend for a cryptocurrency community. Every
//! engagement mutation (follow/unfollow, market collect/uncollect,
//! digg/diss, topic/comment publishing, notification reads) is applied
//! against two independently reachable backends - a document store and a
//! relational store - that share no transaction, and the two store-local
//! outcomes are classified into one caller-visible result.
//!
//! ## Components
//!
//! - **store**: narrow capability interface over both backends, plus the
//!   MongoDB, SQLite and in-process implementations
//! - **action**: pure descriptors of each reciprocal mutation
//! - **ledger**: per-store guard-then-mutate execution and counter deltas
//! - **coordinator**: keyed serialization, concurrent fan-out with
//!   per-store timeouts, outcome classification
//! - **api**: parameter validation and envelope construction over the
//!   coordinator; HTTP routing and sessions live outside this crate

pub mod action;
pub mod api;
pub mod auth;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod events;
pub mod ledger;
pub mod notify;
pub mod store;
pub mod validate;

pub use action::{ActionKind, ReciprocalAction};
pub use api::ActionApi;
pub use auth::{Authenticator, Principal, PrincipalSet, StaticAuthenticator};
pub use classify::{ActionOutcome, StoreOutcome};
pub use config::Args;
pub use coordinator::MutationCoordinator;
pub use envelope::Envelope;
pub use error::{StoreError, ValidationError};
pub use events::{ActionEvent, EventBus};
pub use store::{Store, StoreKind};
pub use validate::ValidationLimits;
