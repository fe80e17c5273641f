//! Session service: backend selection, create-or-get and inspection.

use std::sync::Arc;

use agent_sessions_core::{
    Content, Event, Session, SessionKey, SessionStore, StateMap, StoreConfig, StoreError,
};

#[cfg(feature = "memory")]
use crate::storage::MemoryStorage;
#[cfg(feature = "sqlite")]
use crate::storage::SqliteStorage;

/// Open the backend described by `config`.
///
/// # Errors
/// Returns `StorageUnavailable` if the backend cannot be opened or was not
/// compiled in.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn SessionStore>, StoreError> {
    match config {
        #[cfg(feature = "memory")]
        StoreConfig::Memory => Ok(Arc::new(MemoryStorage::new())),
        #[cfg(feature = "sqlite")]
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteStorage::open(path).await?)),
        #[cfg(feature = "sqlite")]
        StoreConfig::SqliteMemory => Ok(Arc::new(SqliteStorage::in_memory().await?)),
        #[allow(unreachable_patterns)]
        other => Err(StoreError::unavailable(format!(
            "backend not compiled in: {other:?}"
        ))),
    }
}

/// One row of a transcript dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub author: String,
    pub content: String,
}

/// Thin facade over a `SessionStore` used by applications and demos.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
}

impl SessionService {
    /// Wrap an existing store.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Open the backend described by `config`.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the backend cannot be opened.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Ok(Self::new(open_store(config).await?))
    }

    /// The underlying store, for handing to a runner.
    #[must_use]
    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// Create the session or reopen it if it already exists.
    ///
    /// # Errors
    /// Propagates any error other than `AlreadyExists`.
    pub async fn open(&self, key: &SessionKey) -> Result<Session, StoreError> {
        let session = self.store.open_session(key).await?;
        tracing::info!(session = %key, events = session.events.len(), "session ready");
        Ok(session)
    }

    /// Merged state visible from a session.
    ///
    /// # Errors
    /// Returns `NotFound` if the session does not exist.
    pub async fn state(&self, key: &SessionKey) -> Result<StateMap, StoreError> {
        Ok(self.store.get_session(key).await?.state)
    }

    /// Every event of every session of a user, flattened to author/content rows.
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn transcript(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<(SessionKey, TranscriptLine)>, StoreError> {
        let mut rows = Vec::new();
        for key in self.store.list_sessions(app_name, user_id).await? {
            for event in self.store.list_events(&key).await? {
                rows.push((key.clone(), describe(&event)));
            }
        }
        Ok(rows)
    }
}

fn describe(event: &Event) -> TranscriptLine {
    let content = match &event.content {
        Content::Text { text } => text.clone(),
        Content::ToolCall { name, args, .. } => format!("call {name}({args})"),
        Content::ToolResponse { name, response, .. } => format!("{name} -> {response}"),
    };
    TranscriptLine {
        author: event.author.clone(),
        content,
    }
}
