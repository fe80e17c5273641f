//! Store selection and model retry configuration.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted by `StoreConfig::from_env`.
pub const DATABASE_URL_ENV: &str = "AGENT_SESSIONS_DATABASE_URL";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),
}

/// Which session backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Volatile, process lifetime.
    #[default]
    Memory,
    /// SQLite database file, survives restarts.
    Sqlite { path: PathBuf },
    /// SQLite without a backing file. Useful in tests.
    SqliteMemory,
}

impl StoreConfig {
    /// Parse a database URL.
    ///
    /// Accepted forms:
    /// - `memory://`
    /// - `sqlite::memory:`
    /// - `sqlite:///relative.db` and `sqlite:////absolute.db`
    /// - `sqlite://path.db`
    ///
    /// # Errors
    /// Returns `UnsupportedUrl` for any other scheme or an empty path.
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        if url == "memory://" || url == "memory" {
            return Ok(Self::Memory);
        }
        if url == "sqlite::memory:" || url == "sqlite://:memory:" {
            return Ok(Self::SqliteMemory);
        }

        let path = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
            .or_else(|| url.strip_prefix("sqlite:"))
            .ok_or_else(|| ConfigError::UnsupportedUrl(url.to_string()))?;

        if path.is_empty() {
            return Err(ConfigError::UnsupportedUrl(url.to_string()));
        }

        Ok(Self::Sqlite {
            path: PathBuf::from(path),
        })
    }

    /// Read `AGENT_SESSIONS_DATABASE_URL`, falling back to `Memory`.
    ///
    /// # Errors
    /// Returns `UnsupportedUrl` if the variable is set to an unknown URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(DATABASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::from_url(&url),
            _ => Ok(Self::Memory),
        }
    }

    /// Whether data outlives the process.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        matches!(self, Self::Sqlite { .. })
    }
}

/// HTTP retry policy handed to model clients.
///
/// The session store never interprets these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Total attempts including the first.
    pub attempts: u32,
    /// Multiplier applied to the delay after each failure.
    pub exp_base: u32,
    /// Delay before the first retry.
    pub initial_delay_secs: u64,
    /// Status codes that trigger a retry.
    pub http_status_codes: Vec<u16>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 5,
            exp_base: 7,
            initial_delay_secs: 1,
            http_status_codes: vec![429, 500, 503, 504],
        }
    }
}

impl RetryOptions {
    #[must_use]
    pub fn is_retryable(&self, status: u16) -> bool {
        self.http_status_codes.contains(&status)
    }

    /// Delay before retry number `retry` (1-based). `None` once attempts are spent.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry >= self.attempts {
            return None;
        }
        let factor = u64::from(self.exp_base).saturating_pow(retry - 1);
        Some(Duration::from_secs(
            self.initial_delay_secs.saturating_mul(factor),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        assert_eq!(StoreConfig::from_url("memory://").unwrap(), StoreConfig::Memory);
        assert_eq!(
            StoreConfig::from_url("sqlite::memory:").unwrap(),
            StoreConfig::SqliteMemory
        );
        assert_eq!(
            StoreConfig::from_url("sqlite:///my_agent_data.db").unwrap(),
            StoreConfig::Sqlite {
                path: PathBuf::from("my_agent_data.db")
            }
        );
        assert_eq!(
            StoreConfig::from_url("sqlite:////var/lib/agents.db").unwrap(),
            StoreConfig::Sqlite {
                path: PathBuf::from("/var/lib/agents.db")
            }
        );
        assert_eq!(
            StoreConfig::from_url("sqlite://data/agents.db").unwrap(),
            StoreConfig::Sqlite {
                path: PathBuf::from("data/agents.db")
            }
        );
    }

    #[test]
    fn test_from_url_rejects_unknown() {
        assert!(StoreConfig::from_url("postgres://localhost/db").is_err());
        assert!(StoreConfig::from_url("sqlite://").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"backend":"sqlite","path":"agents.db"}"#).unwrap();
        assert!(config.is_durable());
        let json = serde_json::to_string(&StoreConfig::Memory).unwrap();
        assert_eq!(json, r#"{"backend":"memory"}"#);
    }

    #[test]
    fn test_retry_defaults() {
        let retry = RetryOptions::default();
        assert_eq!(retry.attempts, 5);
        assert!(retry.is_retryable(429));
        assert!(retry.is_retryable(503));
        assert!(!retry.is_retryable(404));
    }

    #[test]
    fn test_retry_delays() {
        let retry = RetryOptions::default();
        assert_eq!(retry.delay_for(1), Some(Duration::from_secs(1)));
        assert_eq!(retry.delay_for(2), Some(Duration::from_secs(7)));
        assert_eq!(retry.delay_for(3), Some(Duration::from_secs(49)));
        assert_eq!(retry.delay_for(5), None);
        assert_eq!(retry.delay_for(0), None);
    }

    #[test]
    fn test_retry_partial_config() {
        let retry: RetryOptions = serde_json::from_str(r#"{"attempts":2}"#).unwrap();
        assert_eq!(retry.attempts, 2);
        assert_eq!(retry.exp_base, 7);
    }
}
