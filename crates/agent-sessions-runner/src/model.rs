//! Model seam and a scripted stand-in.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use agent_sessions_core::{Event, RetryOptions};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{RunnerError, ToolSpec};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    /// Create a call with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }
}

/// Everything a model sees for one request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub agent_name: String,
    pub instruction: String,
    /// Full session history, oldest first.
    pub history: Vec<Event>,
    pub tools: Vec<ToolSpec>,
    pub retry: RetryOptions,
}

/// What the model decided to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// Final reply for this turn.
    Text(String),
    /// Run these tools, then ask again.
    ToolCalls(Vec<ToolCall>),
}

impl ModelResponse {
    /// Shorthand for a text reply.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Shorthand for a single tool call.
    #[must_use]
    pub fn call(name: impl Into<String>, args: Value) -> Self {
        Self::ToolCalls(vec![ToolCall::new(name, args)])
    }
}

/// Trait for model backends.
#[async_trait]
pub trait Model: Send + Sync {
    /// Model identifier.
    fn name(&self) -> &str;

    /// Produce the next step for a request.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, RunnerError>;
}

/// Deterministic model that replays a fixed list of responses.
pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<ModelResponse>>,
    requests: AtomicUsize,
}

impl ScriptedModel {
    /// Create a model that returns `responses` in order.
    #[must_use]
    pub fn new(name: impl Into<String>, responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(responses.into_iter().collect()),
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of requests served so far.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().map_or(0, |s| s.len())
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, RunnerError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let next = self
            .script
            .lock()
            .map_err(|e| RunnerError::Model(e.to_string()))?
            .pop_front();

        tracing::debug!(
            model = %self.name,
            agent = %request.agent_name,
            history = request.history.len(),
            "scripted model request"
        );

        next.ok_or_else(|| RunnerError::Model(format!("{}: script exhausted", self.name)))
    }
}
