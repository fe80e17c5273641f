//! Session identity and scoped state keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Identifies one session. Unique per store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    /// Create a session key from its three parts.
    #[must_use]
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Key of the user-scoped state visible from this session.
    #[must_use]
    pub fn user_key(&self) -> UserKey {
        UserKey {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// Identifies the user-scoped state shared by all of a user's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey {
    pub app_name: String,
    pub user_id: String,
}

/// Where a state entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    /// Visible only inside one session.
    Session,
    /// Shared by every session of the same `(app_name, user_id)`.
    User,
    /// Shared by every session of the same `app_name`.
    App,
}

impl StateScope {
    /// Textual prefix used when the key is rendered as a string.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Session => "",
            Self::User => "user:",
            Self::App => "app:",
        }
    }
}

/// A state key with an explicit scope.
///
/// Renders as `user:name`, `app:name` or `name`, and parses back from
/// the same form. Anything without a recognised prefix is session-local.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct StateKey {
    scope: StateScope,
    name: String,
}

impl StateKey {
    /// Create a key in the given scope.
    #[must_use]
    pub fn new(scope: StateScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }

    /// Session-local key.
    #[must_use]
    pub fn session(name: impl Into<String>) -> Self {
        Self::new(StateScope::Session, name)
    }

    /// User-scoped key.
    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self::new(StateScope::User, name)
    }

    /// App-scoped key.
    #[must_use]
    pub fn app(name: impl Into<String>) -> Self {
        Self::new(StateScope::App, name)
    }

    /// Parse the prefixed string form.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the name is empty after the prefix.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let key = if let Some(name) = raw.strip_prefix(StateScope::User.prefix()) {
            Self::user(name)
        } else if let Some(name) = raw.strip_prefix(StateScope::App.prefix()) {
            Self::app(name)
        } else {
            Self::session(raw)
        };
        key.validate()?;
        Ok(key)
    }

    #[must_use]
    pub const fn scope(&self) -> StateScope {
        self.scope
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reject keys that no backend can store, or whose rendered form would
    /// read back in a different scope.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the name is empty, or if a session-local name
    /// starts with a shared-scope prefix.
    pub fn validate(&self) -> Result<(), StoreError> {
        let shadows_shared = self.scope == StateScope::Session
            && [StateScope::User, StateScope::App]
                .iter()
                .any(|scope| self.name.starts_with(scope.prefix()));
        if self.name.is_empty() || shadows_shared {
            return Err(StoreError::InvalidKey(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.scope.prefix(), self.name)
    }
}

impl From<StateKey> for String {
    fn from(key: StateKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for StateKey {
    type Error = StoreError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scopes() {
        let user = StateKey::parse("user:name").unwrap();
        assert_eq!(user.scope(), StateScope::User);
        assert_eq!(user.name(), "name");

        let app = StateKey::parse("app:theme").unwrap();
        assert_eq!(app.scope(), StateScope::App);

        let local = StateKey::parse("topic").unwrap();
        assert_eq!(local.scope(), StateScope::Session);
        assert_eq!(local.name(), "topic");
    }

    #[test]
    fn test_session_name_cannot_mimic_shared_scope() {
        for name in ["user:name", "app:theme"] {
            assert!(matches!(
                StateKey::session(name).validate(),
                Err(StoreError::InvalidKey(_))
            ));
        }
        // Round-trips stay in the scope they were written in.
        let user = StateKey::user("name");
        assert_eq!(StateKey::parse(&user.to_string()).unwrap(), user);
        assert!(StateKey::user("app:theme").validate().is_ok());
    }

    #[test]
    fn test_unknown_prefix_is_session_local() {
        let key = StateKey::parse("temp:scratch").unwrap();
        assert_eq!(key.scope(), StateScope::Session);
        assert_eq!(key.name(), "temp:scratch");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            StateKey::parse("user:"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(StateKey::parse("").is_err());
        assert!(StateKey::app("").validate().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        let key = StateKey::user("country");
        assert_eq!(key.to_string(), "user:country");
        assert_eq!(StateKey::parse(&key.to_string()).unwrap(), key);
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&StateKey::app("motd")).unwrap();
        assert_eq!(json, "\"app:motd\"");
        let parsed: StateKey = serde_json::from_str("\"user:name\"").unwrap();
        assert_eq!(parsed, StateKey::user("name"));
    }

    #[test]
    fn test_session_key_display() {
        let key = SessionKey::new("default", "u1", "s1");
        assert_eq!(key.to_string(), "default/u1/s1");
        assert_eq!(key.user_key().user_id, "u1");
    }
}
