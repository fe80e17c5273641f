//! SQLite session storage (feature-gated).
//!
//! Layout: one `sessions` row per session holding its local state as a JSON
//! object, one `events` row per appended event, one `user_states` row per
//! `(app_name, user_id)` and one `app_states` row per `app_name`.
//!
//! Every write runs in its own transaction and is committed with
//! `synchronous = FULL` before the call returns.

use std::{collections::HashMap, path::Path, str::FromStr, time::Duration};

use agent_sessions_core::{
    Event, Session, SessionKey, SessionStore, StateKey, StateMap, StateScope, StoreError,
    now_millis,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Transaction,
    sqlite::{
        Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
        SqlitePoolOptions, SqliteSynchronous,
    },
};

type Entries = HashMap<String, Value>;

/// Connections kept for file-backed databases. Writers still serialise on the
/// file lock; readers proceed concurrently under WAL.
const FILE_POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS sessions (
        app_name TEXT NOT NULL,
        user_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (app_name, user_id, session_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS events (
        app_name TEXT NOT NULL,
        user_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        sequence_num INTEGER NOT NULL,
        event_id TEXT NOT NULL,
        author TEXT NOT NULL,
        role TEXT NOT NULL,
        event_data TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (app_name, user_id, session_id, sequence_num)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS user_states (
        app_name TEXT NOT NULL,
        user_id TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT '{}',
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (app_name, user_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS app_states (
        app_name TEXT PRIMARY KEY,
        state TEXT NOT NULL DEFAULT '{}',
        updated_at INTEGER NOT NULL
    )
    ",
];

/// SQLite storage implementation.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the file cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::unavailable(format!("failed to create directory: {e}"))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let store = Self::connect(options, FILE_POOL_SIZE).await?;
        tracing::info!(path = %path.display(), "opened sqlite session store");
        Ok(store)
    }

    /// Open a database that lives only as long as this value.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the connection cannot be established.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::unavailable(format!("invalid sqlite options: {e}")))?;
        // Each in-memory connection is a separate database.
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to connect to sqlite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for sql in MIGRATIONS {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::unavailable(format!("migration failed: {e}")))?;
        }
        Ok(())
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.pool.begin().await.map_err(db_err)
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(format!("sqlite: {e}"))
}

fn parse_entries(raw: &str) -> Result<Entries, StoreError> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::unavailable(format!("corrupt state record: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::unavailable(format!("failed to encode record: {e}")))
}

/// Bump `updated_at`, failing with `NotFound` if the session is absent.
///
/// Run first inside write transactions so the write lock is taken up front.
async fn touch(conn: &mut SqliteConnection, key: &SessionKey, now: i64) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE sessions SET updated_at = ?1 WHERE app_name = ?2 AND user_id = ?3 AND session_id = ?4",
    )
    .bind(now)
    .bind(&key.app_name)
    .bind(&key.user_id)
    .bind(&key.session_id)
    .execute(conn)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(key.clone()));
    }
    Ok(())
}

async fn session_exists(conn: &mut SqliteConnection, key: &SessionKey) -> Result<bool, StoreError> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
    )
    .bind(&key.app_name)
    .bind(&key.user_id)
    .bind(&key.session_id)
    .fetch_optional(conn)
    .await
    .map_err(db_err)?;
    Ok(found.is_some())
}

/// Load the entries backing `scope`. Missing user/app records read as empty.
async fn load_entries(
    conn: &mut SqliteConnection,
    key: &SessionKey,
    scope: StateScope,
) -> Result<Entries, StoreError> {
    let raw: Option<String> = match scope {
        StateScope::Session => sqlx::query_scalar(
            "SELECT state FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_optional(conn)
        .await
        .map_err(db_err)?,
        StateScope::User => {
            sqlx::query_scalar("SELECT state FROM user_states WHERE app_name = ?1 AND user_id = ?2")
                .bind(&key.app_name)
                .bind(&key.user_id)
                .fetch_optional(conn)
                .await
                .map_err(db_err)?
        }
        StateScope::App => sqlx::query_scalar("SELECT state FROM app_states WHERE app_name = ?1")
            .bind(&key.app_name)
            .fetch_optional(conn)
            .await
            .map_err(db_err)?,
    };

    raw.map_or_else(|| Ok(Entries::new()), |raw| parse_entries(&raw))
}

async fn store_entries(
    conn: &mut SqliteConnection,
    key: &SessionKey,
    scope: StateScope,
    entries: &Entries,
    now: i64,
) -> Result<(), StoreError> {
    let state = encode(entries)?;
    let query = match scope {
        StateScope::Session => sqlx::query(
            "UPDATE sessions SET state = ?1 WHERE app_name = ?2 AND user_id = ?3 AND session_id = ?4",
        )
        .bind(state)
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id),
        StateScope::User => sqlx::query(
            r"
            INSERT INTO user_states (app_name, user_id, state, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (app_name, user_id)
            DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            ",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(state)
        .bind(now),
        StateScope::App => sqlx::query(
            r"
            INSERT INTO app_states (app_name, state, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (app_name)
            DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            ",
        )
        .bind(&key.app_name)
        .bind(state)
        .bind(now),
    };

    query.execute(conn).await.map_err(db_err)?;
    Ok(())
}

async fn load_events(conn: &mut SqliteConnection, key: &SessionKey) -> Result<Vec<Event>, StoreError> {
    let rows: Vec<String> = sqlx::query_scalar(
        r"
        SELECT event_data FROM events
        WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
        ORDER BY sequence_num ASC
        ",
    )
    .bind(&key.app_name)
    .bind(&key.user_id)
    .bind(&key.session_id)
    .fetch_all(conn)
    .await
    .map_err(db_err)?;

    rows.iter()
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| StoreError::unavailable(format!("corrupt event record: {e}")))
        })
        .collect()
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn create_session(&self, key: &SessionKey) -> Result<Session, StoreError> {
        let now = now_millis();
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO sessions (app_name, user_id, session_id, state, created_at, updated_at)
            VALUES (?1, ?2, ?3, '{}', ?4, ?4)
            ",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(key.clone()));
        }

        // Shared scopes are visible from the moment the session exists.
        let mut session = Session::empty(key.clone(), now);
        for scope in [StateScope::App, StateScope::User] {
            let entries = load_entries(&mut tx, key, scope).await?;
            session
                .state
                .extend(entries.into_iter().map(|(name, value)| (StateKey::new(scope, name), value)));
        }

        tx.commit().await.map_err(db_err)?;
        tracing::info!(session = %key, "created sqlite session");
        Ok(session)
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Session, StoreError> {
        // One read transaction so the row, shared scopes and events come from
        // the same WAL snapshot.
        let mut tx = self.begin().await?;

        let row: Option<(String, i64, i64)> = sqlx::query_as(
            r"
            SELECT state, created_at, updated_at FROM sessions
            WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
            ",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let (local, created_at, updated_at) =
            row.ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let mut state = StateMap::new();
        for scope in [StateScope::App, StateScope::User] {
            let entries = load_entries(&mut tx, key, scope).await?;
            state.extend(entries.into_iter().map(|(name, value)| (StateKey::new(scope, name), value)));
        }
        state.extend(
            parse_entries(&local)?
                .into_iter()
                .map(|(name, value)| (StateKey::session(name), value)),
        );

        let events = load_events(&mut tx, key).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(Session {
            key: key.clone(),
            events,
            state,
            created_at,
            updated_at,
        })
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), StoreError> {
        let now = now_millis();
        let event_data = encode(&event)?;
        let mut tx = self.begin().await?;

        touch(&mut tx, key, now).await?;

        let next_seq: i64 = sqlx::query_scalar(
            r"
            SELECT COALESCE(MAX(sequence_num), -1) + 1 FROM events
            WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
            ",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r"
            INSERT INTO events
                (app_name, user_id, session_id, sequence_num, event_id, author, role, event_data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(next_seq)
        .bind(event.id.to_string())
        .bind(&event.author)
        .bind(event.role.as_str())
        .bind(event_data)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(session = %key, seq = next_seq, "appended event");
        Ok(())
    }

    async fn get_state(
        &self,
        key: &SessionKey,
        state_key: &StateKey,
    ) -> Result<Option<Value>, StoreError> {
        state_key.validate()?;
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        if !session_exists(&mut conn, key).await? {
            return Err(StoreError::NotFound(key.clone()));
        }
        let mut entries = load_entries(&mut conn, key, state_key.scope()).await?;
        Ok(entries.remove(state_key.name()))
    }

    async fn set_state(
        &self,
        key: &SessionKey,
        state_key: &StateKey,
        value: Value,
    ) -> Result<(), StoreError> {
        state_key.validate()?;
        let now = now_millis();
        let mut tx = self.begin().await?;

        touch(&mut tx, key, now).await?;

        let scope = state_key.scope();
        let mut entries = load_entries(&mut tx, key, scope).await?;
        entries.insert(state_key.name().to_string(), value);
        store_entries(&mut tx, key, scope, &entries, now).await?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(session = %key, key = %state_key, "state written");
        Ok(())
    }

    async fn list_events(&self, key: &SessionKey) -> Result<Vec<Event>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let events = load_events(&mut conn, key).await?;
        if events.is_empty() && !session_exists(&mut conn, key).await? {
            return Err(StoreError::NotFound(key.clone()));
        }
        Ok(events)
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionKey>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r"
            SELECT session_id FROM sessions
            WHERE app_name = ?1 AND user_id = ?2
            ORDER BY created_at ASC, rowid ASC
            ",
        )
        .bind(app_name)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(ids
            .into_iter()
            .map(|id| SessionKey::new(app_name, user_id, id))
            .collect())
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            "DELETE FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.clone()));
        }

        sqlx::query("DELETE FROM events WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3")
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(&key.session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::info!(session = %key, "deleted sqlite session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(session_id: &str) -> SessionKey {
        SessionKey::new("default", "default", session_id)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let k = key("s1");
        store.create_session(&k).await.unwrap();
        let session = store.get_session(&k).await.unwrap();
        assert_eq!(session.id(), "s1");
        assert!(session.events.is_empty());
    }

    #[tokio::test]
    async fn test_new_session_sees_existing_user_state() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let s1 = key("s1");
        store.create_session(&s1).await.unwrap();
        store.set_state(&s1, &StateKey::user("name"), json!("Manoj")).await.unwrap();

        let created = store.create_session(&key("s2")).await.unwrap();
        assert_eq!(created.get(&StateKey::user("name")), Some(&json!("Manoj")));
    }

    #[tokio::test]
    async fn test_append_rows_are_sequenced() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let k = key("s1");
        store.create_session(&k).await.unwrap();
        for i in 0..3 {
            store.append_event(&k, Event::user_text(format!("q{i}"))).await.unwrap();
        }

        let seqs: Vec<i64> = sqlx::query_scalar(
            "SELECT sequence_num FROM events WHERE session_id = 's1' ORDER BY sequence_num",
        )
        .fetch_all(&store.pool)
        .await
        .unwrap();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_unavailable() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let k = key("s1");
        store.create_session(&k).await.unwrap();
        sqlx::query("UPDATE sessions SET state = 'not json' WHERE session_id = 's1'")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store
            .get_state(&k, &StateKey::session("topic"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_consistent_under_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SqliteStorage::open(&dir.path().join("s.db")).await.unwrap());
        let k = key("s1");
        store.create_session(&k).await.unwrap();

        let writer = {
            let store = std::sync::Arc::clone(&store);
            let k = k.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    store.append_event(&k, Event::user_text(format!("m{i}"))).await.unwrap();
                }
            })
        };

        // `updated_at` is bumped in the same transaction as each append, so a
        // consistent snapshot never holds an event newer than its row.
        while !writer.is_finished() {
            let session = store.get_session(&k).await.unwrap();
            assert!(session.events.iter().all(|e| e.timestamp <= session.updated_at));
        }
        writer.await.unwrap();
        assert_eq!(store.get_session(&k).await.unwrap().events.len(), 100);
    }

    #[tokio::test]
    async fn test_delete_removes_events() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let k = key("s1");
        store.create_session(&k).await.unwrap();
        store.append_event(&k, Event::user_text("hi")).await.unwrap();
        store.delete_session(&k).await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(matches!(
            store.delete_session(&k).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
