//! Runner extension points.

use std::sync::atomic::{AtomicU64, Ordering};

use agent_sessions_core::SessionKey;
use async_trait::async_trait;

use crate::{ModelRequest, ToolCall};

/// Context passed to every hook.
#[derive(Debug, Clone, Copy)]
pub struct CallbackContext<'a> {
    pub agent_name: &'a str,
    pub session: &'a SessionKey,
    /// Unique per `Runner::run` call.
    pub invocation_id: &'a str,
}

/// Passive observer registered with a runner.
///
/// Hooks cannot alter the run. All have empty defaults.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Before an agent begins processing a request.
    async fn before_agent(&self, _ctx: &CallbackContext<'_>) {}

    /// Before each model request is issued.
    async fn before_model(&self, _ctx: &CallbackContext<'_>, _request: &ModelRequest) {}

    /// Before each tool call is dispatched.
    async fn before_tool(&self, _ctx: &CallbackContext<'_>, _call: &ToolCall) {}
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationCounts {
    pub agent_runs: u64,
    pub model_requests: u64,
    pub tool_calls: u64,
}

/// Counts hook invocations. Counters only move through the hooks.
#[derive(Debug, Default)]
pub struct CountInvocationPlugin {
    agent_runs: AtomicU64,
    model_requests: AtomicU64,
    tool_calls: AtomicU64,
}

impl CountInvocationPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counts(&self) -> InvocationCounts {
        InvocationCounts {
            agent_runs: self.agent_runs.load(Ordering::SeqCst),
            model_requests: self.model_requests.load(Ordering::SeqCst),
            tool_calls: self.tool_calls.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Plugin for CountInvocationPlugin {
    fn name(&self) -> &str {
        "count_invocation"
    }

    async fn before_agent(&self, ctx: &CallbackContext<'_>) {
        let count = self.agent_runs.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(agent = ctx.agent_name, count, "[Plugin] Agent run count");
    }

    async fn before_model(&self, ctx: &CallbackContext<'_>, _request: &ModelRequest) {
        let count = self.model_requests.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(agent = ctx.agent_name, count, "[Plugin] LLM request count");
    }

    async fn before_tool(&self, ctx: &CallbackContext<'_>, call: &ToolCall) {
        let count = self.tool_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(agent = ctx.agent_name, tool = %call.name, count, "[Plugin] Tool call count");
    }
}

/// Logs every hook at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlugin;

#[async_trait]
impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before_agent(&self, ctx: &CallbackContext<'_>) {
        tracing::info!(
            agent = ctx.agent_name,
            session = %ctx.session,
            invocation = ctx.invocation_id,
            "agent starting"
        );
    }

    async fn before_model(&self, ctx: &CallbackContext<'_>, request: &ModelRequest) {
        tracing::info!(
            agent = ctx.agent_name,
            invocation = ctx.invocation_id,
            history = request.history.len(),
            tools = request.tools.len(),
            "model request"
        );
    }

    async fn before_tool(&self, ctx: &CallbackContext<'_>, call: &ToolCall) {
        tracing::info!(
            agent = ctx.agent_name,
            invocation = ctx.invocation_id,
            tool = %call.name,
            args = %call.args,
            "tool call"
        );
    }
}

#[cfg(test)]
mod tests {
    use agent_sessions_core::RetryOptions;

    use super::*;

    #[tokio::test]
    async fn test_counts_are_monotonic_per_hook() {
        let plugin = CountInvocationPlugin::new();
        let session = SessionKey::new("a", "u", "s");
        let ctx = CallbackContext {
            agent_name: "research_paper_finder_agent",
            session: &session,
            invocation_id: "inv-1",
        };
        let request = ModelRequest {
            agent_name: "research_paper_finder_agent".to_string(),
            instruction: String::new(),
            history: Vec::new(),
            tools: Vec::new(),
            retry: RetryOptions::default(),
        };

        plugin.before_agent(&ctx).await;
        plugin.before_model(&ctx, &request).await;
        plugin.before_model(&ctx, &request).await;
        plugin
            .before_tool(&ctx, &ToolCall::new("count_papers", serde_json::json!({})))
            .await;

        assert_eq!(
            plugin.counts(),
            InvocationCounts {
                agent_runs: 1,
                model_requests: 2,
                tool_calls: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_plugins_observe_a_run_side_by_side() {
        use std::sync::Arc;

        use crate::{Agent, ModelResponse, Runner, ScriptedModel, builtin};

        let model = ScriptedModel::new(
            "scripted",
            [
                ModelResponse::call("count_papers", serde_json::json!({"papers": ["a", "b"]})),
                ModelResponse::text("Found 2 papers."),
            ],
        );
        let agent = Agent::builder("research_paper_finder_agent", Arc::new(model))
            .tool(builtin::count_papers_tool())
            .build()
            .unwrap();

        let counter = Arc::new(CountInvocationPlugin::new());
        let runner = Runner::in_memory(Arc::new(agent))
            .with_plugin(Arc::new(LoggingPlugin))
            .with_plugin(counter.clone());
        runner.run_debug("Find papers on quantum computing").await.unwrap();

        assert_eq!(
            counter.counts(),
            InvocationCounts {
                agent_runs: 1,
                model_requests: 2,
                tool_calls: 1,
            }
        );
    }
}
