//! Session snapshot type and the storage contract.

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Event, SessionKey, StateKey};

/// State entries keyed by scoped key.
pub type StateMap = BTreeMap<StateKey, Value>;

/// Snapshot of a session as returned by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    /// Full event history in append order.
    pub events: Vec<Event>,
    /// Session-local entries merged with the user- and app-scoped entries
    /// visible from this session.
    pub state: StateMap,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
    /// Last append or state write.
    pub updated_at: i64,
}

impl Session {
    /// Empty session created now.
    #[must_use]
    pub fn empty(key: SessionKey, created_at: i64) -> Self {
        Self {
            key,
            events: Vec::new(),
            state: StateMap::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.key.session_id
    }

    /// Look up a state entry in the merged view.
    #[must_use]
    pub fn get(&self, key: &StateKey) -> Option<&Value> {
        self.state.get(key)
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session already exists: {0}")]
    AlreadyExists(SessionKey),
    #[error("Session not found: {0}")]
    NotFound(SessionKey),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Invalid state key: {0:?}")]
    InvalidKey(String),
}

impl StoreError {
    /// Wrap a backend failure.
    pub fn unavailable(e: impl fmt::Display) -> Self {
        Self::StorageUnavailable(e.to_string())
    }

    /// Whether the caller can reasonably continue, e.g. by falling back
    /// to `get_session` after `AlreadyExists`.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::AlreadyExists(_) | Self::NotFound(_))
    }
}

/// Trait for session storage backends.
///
/// Every backend honours the same contract: events are append-only and
/// returned in append order, `user:`/`app:` state is shared across the
/// sessions of one user/app, and a successful write is visible to every
/// later read.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an empty session.
    ///
    /// Fails with `AlreadyExists` if the key is taken.
    async fn create_session(&self, key: &SessionKey) -> Result<Session, StoreError>;

    /// Fetch a session with its events and merged state.
    ///
    /// Fails with `NotFound` if absent.
    async fn get_session(&self, key: &SessionKey) -> Result<Session, StoreError>;

    /// Append an event to the session's log.
    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), StoreError>;

    /// Read a state entry from the scope implied by the key.
    ///
    /// A missing entry is `Ok(None)`; a missing session is `NotFound`.
    async fn get_state(
        &self,
        key: &SessionKey,
        state_key: &StateKey,
    ) -> Result<Option<Value>, StoreError>;

    /// Write a state entry to the scope implied by the key. Last write wins.
    async fn set_state(
        &self,
        key: &SessionKey,
        state_key: &StateKey,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Snapshot of the session's events in append order.
    async fn list_events(&self, key: &SessionKey) -> Result<Vec<Event>, StoreError>;

    /// Keys of a user's sessions in creation order.
    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionKey>, StoreError>;

    /// Remove a session and its events. User and app state survive.
    async fn delete_session(&self, key: &SessionKey) -> Result<(), StoreError>;

    /// Create the session, or fetch it if it already exists.
    async fn open_session(&self, key: &SessionKey) -> Result<Session, StoreError> {
        match self.create_session(key).await {
            Err(StoreError::AlreadyExists(_)) => {
                tracing::warn!(session = %key, "session already exists, resuming");
                self.get_session(key).await
            }
            other => other,
        }
    }
}
