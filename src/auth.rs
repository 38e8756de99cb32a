//! Principal resolution
//!
//! A logical user is known to each backend under its own identity record.
//! Resolution yields zero, one or two per-store principals; the credential
//! verification mechanics behind it (sessions, password hashing, third
//! party tokens) live outside this crate.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::StoreKind;

/// A per-store identity for an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: u64,
    pub store: StoreKind,
}

impl Principal {
    pub fn new(id: u64, store: StoreKind) -> Self {
        Self { id, store }
    }
}

/// The principals resolved for one request: at most one per backend.
///
/// Principals from different stores refer to "the same" user only by
/// correlated identifying fields, never a shared key; an empty set means
/// the request carries no usable identity.
#[derive(Debug, Clone, Default)]
pub struct PrincipalSet {
    principals: Vec<Principal>,
}

impl PrincipalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from an iterator, keeping the first principal per store.
    pub fn from_iter(principals: impl IntoIterator<Item = Principal>) -> Self {
        let mut set = Self::new();
        for p in principals {
            set.add(p);
        }
        set
    }

    /// Add a principal, replacing any existing entry for the same store.
    pub fn add(&mut self, principal: Principal) {
        self.principals.retain(|p| p.store != principal.store);
        self.principals.push(principal);
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Principal> {
        self.principals.iter()
    }

    /// Whether any per-store identity carries this id.
    pub fn contains_id(&self, id: u64) -> bool {
        self.principals.iter().any(|p| p.id == id)
    }

    /// Actor ids as a fixed-size key component, sorted, zero-padded.
    pub fn key_ids(&self) -> [u64; 2] {
        let mut ids = [0u64; 2];
        for (slot, p) in self.principals.iter().take(2).enumerate() {
            ids[slot] = p.id;
        }
        ids.sort_unstable();
        ids
    }
}

/// Resolves an inbound credential to per-store principals.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, credential: &str) -> PrincipalSet;
}

/// Fixed credential-to-principal table for dev mode and tests.
#[derive(Default)]
pub struct StaticAuthenticator {
    sessions: DashMap<String, PrincipalSet>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the principals a credential resolves to.
    pub fn insert(&self, credential: impl Into<String>, principals: PrincipalSet) {
        self.sessions.insert(credential.into(), principals);
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn resolve(&self, credential: &str) -> PrincipalSet {
        self.sessions
            .get(credential)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_principal_per_store() {
        let mut set = PrincipalSet::new();
        set.add(Principal::new(1, StoreKind::Document));
        set.add(Principal::new(2, StoreKind::Document));
        set.add(Principal::new(3, StoreKind::Relational));
        assert_eq!(set.len(), 2);
        assert!(set.contains_id(2));
        assert!(!set.contains_id(1));
    }

    #[test]
    fn key_ids_are_order_independent() {
        let a = PrincipalSet::from_iter([
            Principal::new(7, StoreKind::Document),
            Principal::new(3, StoreKind::Relational),
        ]);
        let b = PrincipalSet::from_iter([
            Principal::new(3, StoreKind::Relational),
            Principal::new(7, StoreKind::Document),
        ]);
        assert_eq!(a.key_ids(), b.key_ids());
    }

    #[tokio::test]
    async fn static_authenticator_resolves_known_credential() {
        let auth = StaticAuthenticator::new();
        auth.insert(
            "session-1",
            PrincipalSet::from_iter([Principal::new(1, StoreKind::Document)]),
        );

        let resolved = auth.resolve("session-1").await;
        assert_eq!(resolved.len(), 1);

        let unknown = auth.resolve("nope").await;
        assert!(unknown.is_empty());
    }
}
