//! Session storage for agent conversations.
//!
//! Provides:
//! - `SessionService` - Create-or-get and inspection over any backend
//! - Storage implementations (memory, SQLite)
//! - `open_store` - Pick a backend from `StoreConfig`

pub mod service;
pub mod storage;

pub use service::{SessionService, TranscriptLine, open_store};
