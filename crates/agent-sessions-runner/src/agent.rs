//! Agent definitions.

use std::sync::Arc;

use agent_sessions_core::RetryOptions;
use agent_sessions_store::storage::MemoryStorage;
use async_trait::async_trait;
use serde_json::json;

use crate::{
    Model, ParamKind, ParamSpec, RunnerError, Tool, ToolArgs, ToolContext, ToolOutcome,
    ToolRegistry, ToolSpec,
    runner::{Runner, RunnerConfig, final_reply},
};

/// A named model plus its instruction and tools.
pub struct Agent {
    name: String,
    description: String,
    instruction: String,
    model: Arc<dyn Model>,
    tools: ToolRegistry,
    retry: RetryOptions,
}

impl Agent {
    /// Start building an agent.
    #[must_use]
    pub fn builder(name: impl Into<String>, model: Arc<dyn Model>) -> AgentBuilder {
        AgentBuilder::new(name, model)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    #[must_use]
    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryOptions {
        &self.retry
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model.name())
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

/// Builder for `Agent`.
pub struct AgentBuilder {
    name: String,
    description: String,
    instruction: String,
    model: Arc<dyn Model>,
    tools: Vec<Arc<dyn Tool>>,
    retry: RetryOptions,
}

impl AgentBuilder {
    /// Create a builder with no tools and default retry options.
    #[must_use]
    pub fn new(name: impl Into<String>, model: Arc<dyn Model>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: String::new(),
            model,
            tools: Vec::new(),
            retry: RetryOptions::default(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Add a tool. Its spec is checked in `build`.
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Validate and register the tools.
    ///
    /// # Errors
    /// Returns `ToolRegistration` for an empty agent name, an invalid tool
    /// spec, or two tools sharing a name.
    pub fn build(self) -> Result<Agent, RunnerError> {
        if self.name.trim().is_empty() {
            return Err(RunnerError::ToolRegistration("agent name is empty".to_string()));
        }

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool)?;
        }

        tracing::debug!(agent = %self.name, tools = tools.len(), "agent built");
        Ok(Agent {
            name: self.name,
            description: self.description,
            instruction: self.instruction,
            model: self.model,
            tools,
            retry: self.retry,
        })
    }
}

/// Exposes an agent as a tool of another agent.
///
/// Each call runs the wrapped agent to completion in a throwaway session and
/// returns its final reply under `result`.
pub struct AgentTool {
    agent: Arc<Agent>,
    spec: ToolSpec,
}

impl AgentTool {
    #[must_use]
    pub fn new(agent: Arc<Agent>) -> Self {
        let spec = ToolSpec::new(agent.name(), agent.description()).param(ParamSpec::required(
            "request",
            ParamKind::String,
            "Request for the agent",
        ));
        Self { agent, spec }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolOutcome, RunnerError> {
        let request = args.str("request").unwrap_or_default();
        let runner = Runner::new(
            Arc::clone(&self.agent),
            Arc::new(MemoryStorage::new()),
            RunnerConfig {
                app_name: self.agent.name().to_string(),
                ..RunnerConfig::default()
            },
        );

        let session_id = format!("{}-{}", ctx.session_id(), ctx.call_id());
        runner
            .store()
            .create_session(&runner.session_key(ctx.user_id(), &session_id))
            .await?;

        match runner.run(ctx.user_id(), &session_id, request).await {
            Ok(events) => Ok(final_reply(&events).map_or_else(
                || ToolOutcome::error(format!("agent '{}' gave no reply", self.agent.name())),
                |text| ToolOutcome::success(json!({ "result": text })),
            )),
            Err(RunnerError::Store(e)) => Err(e.into()),
            Err(e) => {
                tracing::warn!(agent = %self.agent.name(), error = %e, "sub-agent failed");
                Ok(ToolOutcome::error(format!("agent '{}' failed: {e}", self.agent.name())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_sessions_core::{Content, Role};

    use super::*;
    use crate::{ModelResponse, ScriptedModel, builtin};

    fn scripted(script: Vec<ModelResponse>) -> Arc<dyn Model> {
        Arc::new(ScriptedModel::new("scripted", script))
    }

    #[test]
    fn test_build_rejects_duplicate_tools() {
        let err = Agent::builder("bot", scripted(Vec::new()))
            .tool(builtin::fee_lookup_tool())
            .tool(builtin::fee_lookup_tool())
            .build()
            .unwrap_err();
        assert!(matches!(err, RunnerError::ToolRegistration(_)));
    }

    #[test]
    fn test_build_rejects_empty_name() {
        assert!(Agent::builder(" ", scripted(Vec::new())).build().is_err());
    }

    #[test]
    fn test_agent_tool_spec() {
        let calc = Arc::new(
            Agent::builder("CalculationAgent", scripted(Vec::new()))
                .description("Performs arithmetic")
                .build()
                .unwrap(),
        );
        let tool = AgentTool::new(calc);
        assert_eq!(tool.spec().name, "CalculationAgent");
        assert!(tool.spec().params[0].required);
    }

    #[tokio::test]
    async fn test_sub_agent_result_returned_to_parent() {
        let calc = Arc::new(
            Agent::builder(
                "CalculationAgent",
                scripted(vec![ModelResponse::text("0.02 * 500 = 10.0")]),
            )
            .description("Performs arithmetic")
            .build()
            .unwrap(),
        );
        let parent = Arc::new(
            Agent::builder(
                "enhanced_currency_agent",
                scripted(vec![
                    ModelResponse::call("CalculationAgent", json!({"request": "0.02 * 500"})),
                    ModelResponse::text("The fee is 10.0 USD."),
                ]),
            )
            .tool(Arc::new(AgentTool::new(calc)))
            .build()
            .unwrap(),
        );

        let runner = Runner::in_memory(parent);
        let events = runner.run_debug("What is the fee on 500 USD?").await.unwrap();

        let response = events
            .iter()
            .filter(|e| e.role == Role::Tool)
            .find_map(|e| match &e.content {
                Content::ToolResponse { response, .. } => Some(response.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            response,
            json!({"status": "success", "result": "0.02 * 500 = 10.0"})
        );
        assert_eq!(final_reply(&events), Some("The fee is 10.0 USD."));
    }

    #[tokio::test]
    async fn test_sub_agent_failure_is_outcome() {
        let broken = Arc::new(Agent::builder("broken", scripted(Vec::new())).build().unwrap());
        let parent = Arc::new(
            Agent::builder(
                "parent",
                scripted(vec![
                    ModelResponse::call("broken", json!({"request": "hi"})),
                    ModelResponse::text("It failed."),
                ]),
            )
            .tool(Arc::new(AgentTool::new(broken)))
            .build()
            .unwrap(),
        );

        let events = Runner::in_memory(parent).run_debug("go").await.unwrap();
        assert!(events.iter().any(|e| matches!(
            &e.content,
            Content::ToolResponse { response, .. } if response["status"] == "error"
        )));
    }
}
