//! Session storage behind a narrow interface.
//!
//! The contract is get-by-id, create, compare-and-swap on a version
//! counter, and list-expired. Any replacement store must preserve the
//! compare-and-swap semantics; that is what per-session serialization in
//! the manager leans on.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::session::CheckoutSession;

/// Errors from session storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A session with this id already exists.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// No session with this id exists.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The stored version no longer matches the expected one.
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Session id.
        id: String,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
}

/// Narrow storage interface for checkout sessions.
pub trait SessionStore: Send + Sync {
    /// Inserts a new session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the id is taken.
    fn create(&self, session: CheckoutSession) -> Result<(), StoreError>;

    /// Fetches a session snapshot by id.
    fn get(&self, id: &str) -> Option<CheckoutSession>;

    /// Replaces a session if its stored version equals `expected_version`.
    /// On success the stored copy carries `expected_version + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::VersionConflict`].
    fn compare_and_swap(
        &self,
        expected_version: u64,
        session: CheckoutSession,
    ) -> Result<CheckoutSession, StoreError>;

    /// Ids of sessions awaiting completion whose inactivity window has
    /// passed as of `now`.
    fn list_expired(&self, now: DateTime<Utc>) -> Vec<String>;
}

/// Single-node in-memory store.
#[derive(Default)]
pub struct InMemorySessionStore {
    inner: RwLock<HashMap<String, CheckoutSession>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, session: CheckoutSession) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        if inner.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists(session.id));
        }
        inner.insert(session.id.clone(), session);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<CheckoutSession> {
        let inner = self.inner.read().unwrap();
        inner.get(id).cloned()
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        mut session: CheckoutSession,
    ) -> Result<CheckoutSession, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let current = inner
            .get(&session.id)
            .ok_or_else(|| StoreError::NotFound(session.id.clone()))?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: session.id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }
        session.version = expected_version + 1;
        inner.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id.clone())
            .collect()
    }
}
