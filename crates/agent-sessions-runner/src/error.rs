//! Runner error.

use agent_sessions_core::StoreError;

/// Runner error.
///
/// Tool-level failures are not errors: tools report them through
/// `ToolOutcome::Error` so the model can branch on them.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Tool registration failed: {0}")]
    ToolRegistration(String),
    #[error("Agent did not produce a reply within {0} steps")]
    MaxStepsExceeded(usize),
}
