//! In-memory session storage.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use agent_sessions_core::{
    Event, EventLog, Session, SessionKey, SessionStore, StateKey, StateMap, StateScope, StoreError,
    UserKey, now_millis,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

type Entries = HashMap<String, Value>;
type SharedEntries = Arc<RwLock<Entries>>;

/// Per-session data. Each session carries its own locks.
struct SessionSlot {
    seq: u64,
    created_at: i64,
    updated_at: AtomicI64,
    state: SharedEntries,
    events: EventLog,
}

impl SessionSlot {
    fn touch(&self) {
        self.updated_at.store(now_millis(), Ordering::Relaxed);
    }
}

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
///
/// The outer maps are locked only long enough to look up a session;
/// event appends and state writes lock that session alone.
pub struct MemoryStorage {
    sessions: RwLock<HashMap<SessionKey, Arc<SessionSlot>>>,
    user_state: RwLock<HashMap<UserKey, SharedEntries>>,
    app_state: RwLock<HashMap<String, SharedEntries>>,
    next_seq: AtomicU64,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            user_state: RwLock::new(HashMap::new()),
            app_state: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Stream a session's history followed by its live appends.
    ///
    /// # Errors
    /// Returns `NotFound` if the session does not exist.
    pub fn watch(&self, key: &SessionKey) -> Result<BoxStream<'static, Event>, StoreError> {
        self.slot(key)?.events.subscribe_with_history()
    }

    fn slot(&self, key: &SessionKey) -> Result<Arc<SessionSlot>, StoreError> {
        self.sessions
            .read()
            .map_err(StoreError::unavailable)?
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn user_entries(&self, user: &UserKey) -> Result<SharedEntries, StoreError> {
        shared_entry(&self.user_state, user)
    }

    fn app_entries(&self, app_name: &str) -> Result<SharedEntries, StoreError> {
        shared_entry(&self.app_state, &app_name.to_string())
    }

    /// Entries backing `scope` as seen from `slot`.
    fn scoped_entries(
        &self,
        key: &SessionKey,
        slot: &SessionSlot,
        scope: StateScope,
    ) -> Result<SharedEntries, StoreError> {
        match scope {
            StateScope::Session => Ok(Arc::clone(&slot.state)),
            StateScope::User => self.user_entries(&key.user_key()),
            StateScope::App => self.app_entries(&key.app_name),
        }
    }

    fn snapshot(&self, key: &SessionKey, slot: &SessionSlot) -> Result<Session, StoreError> {
        let mut state = StateMap::new();
        for scope in [StateScope::App, StateScope::User, StateScope::Session] {
            let entries = self.scoped_entries(key, slot, scope)?;
            let entries = entries.read().map_err(StoreError::unavailable)?;
            state.extend(
                entries
                    .iter()
                    .map(|(name, value)| (StateKey::new(scope, name.clone()), value.clone())),
            );
        }

        Ok(Session {
            key: key.clone(),
            events: slot.events.snapshot()?,
            state,
            created_at: slot.created_at,
            updated_at: slot.updated_at.load(Ordering::Relaxed),
        })
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Get or lazily create the shared entries for `id`.
fn shared_entry<K>(
    map: &RwLock<HashMap<K, SharedEntries>>,
    id: &K,
) -> Result<SharedEntries, StoreError>
where
    K: std::hash::Hash + Eq + Clone,
{
    if let Some(entries) = map.read().map_err(StoreError::unavailable)?.get(id) {
        return Ok(Arc::clone(entries));
    }
    let mut map = map.write().map_err(StoreError::unavailable)?;
    Ok(Arc::clone(map.entry(id.clone()).or_default()))
}

#[async_trait]
impl SessionStore for MemoryStorage {
    async fn create_session(&self, key: &SessionKey) -> Result<Session, StoreError> {
        let timestamp = now_millis();
        let slot = {
            let mut sessions = self.sessions.write().map_err(StoreError::unavailable)?;
            if sessions.contains_key(key) {
                return Err(StoreError::AlreadyExists(key.clone()));
            }
            let slot = Arc::new(SessionSlot {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                created_at: timestamp,
                updated_at: AtomicI64::new(timestamp),
                state: SharedEntries::default(),
                events: EventLog::new(),
            });
            sessions.insert(key.clone(), Arc::clone(&slot));
            slot
        };

        tracing::info!(session = %key, "created in-memory session");
        self.snapshot(key, &slot)
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Session, StoreError> {
        let slot = self.slot(key)?;
        self.snapshot(key, &slot)
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), StoreError> {
        let slot = self.slot(key)?;
        let len = slot.events.push(event)?;
        slot.touch();
        tracing::debug!(session = %key, len, "appended event");
        Ok(())
    }

    async fn get_state(
        &self,
        key: &SessionKey,
        state_key: &StateKey,
    ) -> Result<Option<Value>, StoreError> {
        state_key.validate()?;
        let slot = self.slot(key)?;
        let entries = self.scoped_entries(key, &slot, state_key.scope())?;
        let value = entries
            .read()
            .map_err(StoreError::unavailable)?
            .get(state_key.name())
            .cloned();
        Ok(value)
    }

    async fn set_state(
        &self,
        key: &SessionKey,
        state_key: &StateKey,
        value: Value,
    ) -> Result<(), StoreError> {
        state_key.validate()?;
        let slot = self.slot(key)?;
        let entries = self.scoped_entries(key, &slot, state_key.scope())?;
        entries
            .write()
            .map_err(StoreError::unavailable)?
            .insert(state_key.name().to_string(), value);
        slot.touch();
        tracing::debug!(session = %key, key = %state_key, "state written");
        Ok(())
    }

    async fn list_events(&self, key: &SessionKey) -> Result<Vec<Event>, StoreError> {
        self.slot(key)?.events.snapshot()
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionKey>, StoreError> {
        let sessions = self.sessions.read().map_err(StoreError::unavailable)?;
        let mut found: Vec<(u64, SessionKey)> = sessions
            .iter()
            .filter(|(k, _)| k.app_name == app_name && k.user_id == user_id)
            .map(|(k, slot)| (slot.seq, k.clone()))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found.into_iter().map(|(_, k)| k).collect())
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.sessions
            .write()
            .map_err(StoreError::unavailable)?
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        tracing::info!(session = %key, "deleted in-memory session");
        Ok(())
    }
}
