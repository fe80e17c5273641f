//! State access handed to tools.

use std::sync::Arc;

use agent_sessions_core::{SessionKey, SessionStore, StateKey, StoreError};
use serde_json::Value;

/// Narrowed view of the session a tool was invoked under.
///
/// Only state reads and writes are exposed, and only for the invoking
/// session (plus the user- and app-scoped entries that session can see).
#[derive(Clone)]
pub struct ToolContext {
    store: Arc<dyn SessionStore>,
    session: SessionKey,
    agent_name: String,
    call_id: String,
}

impl ToolContext {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        session: SessionKey,
        agent_name: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            session,
            agent_name: agent_name.into(),
            call_id: call_id.into(),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Agent that issued the call.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Read a state entry.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn get(&self, key: &StateKey) -> Result<Option<Value>, StoreError> {
        self.store.get_state(&self.session, key).await
    }

    /// Read a state entry, substituting `default` when absent.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn get_or(&self, key: &StateKey, default: impl Into<Value>) -> Result<Value, StoreError> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.into()))
    }

    /// Write a state entry.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn set(&self, key: &StateKey, value: impl Into<Value>) -> Result<(), StoreError> {
        self.store.set_state(&self.session, key, value.into()).await
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session", &self.session)
            .field("agent_name", &self.agent_name)
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}
