//! Core abstractions for agent conversation sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionKey` / `StateKey` - Session identity and scoped state keys
//! - `Event` - Immutable conversation turn
//! - `EventLog` - Ordered history + live broadcast for one session
//! - `SessionStore` - Storage contract shared by every backend
//! - `StoreConfig` / `RetryOptions` - Configuration

pub mod config;
pub mod event;
pub mod event_log;
pub mod key;
pub mod traits;

pub use config::{ConfigError, RetryOptions, StoreConfig};
pub use event::{Content, Event, Role, now_millis};
pub use event_log::EventLog;
pub use key::{SessionKey, StateKey, StateScope, UserKey};
pub use traits::{Session, SessionStore, StateMap, StoreError};
