//! Turn loop: user message in, agent/tool events out.

use std::sync::Arc;

use agent_sessions_core::{Event, Role, SessionKey, SessionStore};
use agent_sessions_store::storage::MemoryStorage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Agent, CallbackContext, ModelRequest, ModelResponse, Plugin, RunnerError, ToolCall,
    ToolContext, ToolOutcome,
};

/// User id used by `Runner::run_debug`.
pub const DEBUG_USER_ID: &str = "debug_user_id";
/// Session id used by `Runner::run_debug`.
pub const DEBUG_SESSION_ID: &str = "debug_session_id";

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// App name used for every session key this runner builds.
    pub app_name: String,
    /// Model round-trips allowed per user message.
    pub max_steps: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            app_name: "default".to_string(),
            max_steps: 8,
        }
    }
}

/// Drives one agent against a session store.
pub struct Runner {
    agent: Arc<Agent>,
    store: Arc<dyn SessionStore>,
    plugins: Vec<Arc<dyn Plugin>>,
    config: RunnerConfig,
}

impl Runner {
    /// Create a runner over an existing store.
    #[must_use]
    pub fn new(agent: Arc<Agent>, store: Arc<dyn SessionStore>, config: RunnerConfig) -> Self {
        Self {
            agent,
            store,
            plugins: Vec::new(),
            config,
        }
    }

    /// Runner with its own volatile store and default config.
    #[must_use]
    pub fn in_memory(agent: Arc<Agent>) -> Self {
        Self::new(agent, Arc::new(MemoryStorage::new()), RunnerConfig::default())
    }

    /// Register a plugin. Hooks fire in registration order.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }

    #[must_use]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Key of a session under this runner's app.
    #[must_use]
    pub fn session_key(&self, user_id: &str, session_id: &str) -> SessionKey {
        SessionKey::new(&self.config.app_name, user_id, session_id)
    }

    /// Process one user message in an existing session.
    ///
    /// Returns the events appended during this turn, starting with the
    /// user's own message.
    ///
    /// # Errors
    /// Returns `Store(NotFound)` if the session does not exist, `Model` if the
    /// model fails, and `MaxStepsExceeded` if no text reply arrives in time.
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<Vec<Event>, RunnerError> {
        let key = self.session_key(user_id, session_id);
        self.store.get_session(&key).await?;

        let invocation_id = format!("e-{}", Uuid::new_v4());
        let agent_name = self.agent.name();
        let ctx = CallbackContext {
            agent_name,
            session: &key,
            invocation_id: &invocation_id,
        };

        let mut produced = Vec::new();
        self.append(&key, Event::user_text(message), &mut produced).await?;

        for plugin in &self.plugins {
            plugin.before_agent(&ctx).await;
        }

        for step in 0..self.config.max_steps {
            let request = ModelRequest {
                agent_name: agent_name.to_string(),
                instruction: self.agent.instruction().to_string(),
                history: self.store.list_events(&key).await?,
                tools: self.agent.tools().specs(),
                retry: self.agent.retry().clone(),
            };
            for plugin in &self.plugins {
                plugin.before_model(&ctx, &request).await;
            }

            match self.agent.model().generate(&request).await? {
                ModelResponse::Text(text) => {
                    tracing::debug!(session = %key, step, "agent replied");
                    self.append(&key, Event::agent_text(agent_name, text), &mut produced)
                        .await?;
                    return Ok(produced);
                }
                ModelResponse::ToolCalls(calls) => {
                    for call in &calls {
                        let event =
                            Event::tool_call(agent_name, &call.id, &call.name, call.args.clone());
                        self.append(&key, event, &mut produced).await?;
                    }
                    for call in &calls {
                        for plugin in &self.plugins {
                            plugin.before_tool(&ctx, call).await;
                        }
                        let outcome = self.dispatch(&key, call).await?;
                        let event = Event::tool_response(
                            agent_name,
                            &call.id,
                            &call.name,
                            outcome.to_value(),
                        );
                        self.append(&key, event, &mut produced).await?;
                    }
                }
            }
        }

        tracing::warn!(session = %key, max_steps = self.config.max_steps, "no reply within step limit");
        Err(RunnerError::MaxStepsExceeded(self.config.max_steps))
    }

    /// Run against a fixed debug session, creating it on first use.
    ///
    /// # Errors
    /// Same as `run`.
    pub async fn run_debug(&self, message: &str) -> Result<Vec<Event>, RunnerError> {
        let key = self.session_key(DEBUG_USER_ID, DEBUG_SESSION_ID);
        self.store.open_session(&key).await?;
        self.run(DEBUG_USER_ID, DEBUG_SESSION_ID, message).await
    }

    async fn append(
        &self,
        key: &SessionKey,
        event: Event,
        produced: &mut Vec<Event>,
    ) -> Result<(), RunnerError> {
        self.store.append_event(key, event.clone()).await?;
        produced.push(event);
        Ok(())
    }

    /// Resolve, validate and invoke one tool call.
    async fn dispatch(&self, key: &SessionKey, call: &ToolCall) -> Result<ToolOutcome, RunnerError> {
        let Some(tool) = self.agent.tools().get(&call.name) else {
            tracing::warn!(tool = %call.name, "model called an unknown tool");
            return Ok(ToolOutcome::error(format!("Tool '{}' not found", call.name)));
        };

        let args = match tool.spec().check_args(&call.args) {
            Ok(args) => args,
            Err(message) => {
                tracing::warn!(tool = %call.name, %message, "rejected tool arguments");
                return Ok(ToolOutcome::error(message));
            }
        };

        let ctx = ToolContext::new(
            Arc::clone(&self.store),
            key.clone(),
            self.agent.name(),
            &call.id,
        );
        let outcome = tool.call(&args, &ctx).await?;
        tracing::debug!(tool = %call.name, success = outcome.is_success(), "tool finished");
        Ok(outcome)
    }
}

/// Text of the last agent reply among `events`.
#[must_use]
pub fn final_reply(events: &[Event]) -> Option<&str> {
    events
        .iter()
        .rev()
        .filter(|e| e.role == Role::Agent)
        .find_map(Event::text)
}

#[cfg(test)]
mod tests {
    use agent_sessions_core::{Content, StateKey};
    use serde_json::json;

    use super::*;
    use crate::{CountInvocationPlugin, ScriptedModel, builtin};

    fn user_info_agent(script: Vec<ModelResponse>) -> Arc<Agent> {
        Arc::new(
            Agent::builder("text_chat_bot", Arc::new(ScriptedModel::new("scripted", script)))
                .description("A text chatbot with memory tools.")
                .tool(builtin::save_userinfo_tool())
                .tool(builtin::retrieve_userinfo_tool())
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_run_requires_session() {
        let runner = Runner::in_memory(user_info_agent(vec![ModelResponse::text("hi")]));
        let err = runner.run("default", "missing", "hello").await.unwrap_err();
        assert!(matches!(err, RunnerError::Store(_)));
    }

    #[tokio::test]
    async fn test_text_reply_appends_two_events() {
        let runner = Runner::in_memory(user_info_agent(vec![ModelResponse::text(
            "The capital of India is New Delhi.",
        )]));
        let key = runner.session_key("default", "stateful-agentic-session");
        runner.store().create_session(&key).await.unwrap();

        let events = runner
            .run("default", "stateful-agentic-session", "What is the capital of India?")
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].role, Role::User);
        assert_eq!(final_reply(&events), Some("The capital of India is New Delhi."));
        assert_eq!(runner.store().list_events(&key).await.unwrap(), events);
    }

    #[tokio::test]
    async fn test_tool_state_shared_across_sessions() {
        let agent = user_info_agent(vec![
            ModelResponse::call("save_userinfo", json!({"user_name": "Manoj", "country": "India"})),
            ModelResponse::text("Nice to meet you, Manoj!"),
            ModelResponse::call("retrieve_userinfo", json!({})),
            ModelResponse::text("You are Manoj from India."),
        ]);
        let counter = Arc::new(CountInvocationPlugin::new());
        let runner = Runner::in_memory(agent).with_plugin(counter.clone());

        let first = runner.session_key("default", "state-demo-session");
        runner.store().create_session(&first).await.unwrap();
        runner
            .run("default", "state-demo-session", "My name is Manoj. I'm from India.")
            .await
            .unwrap();

        let second = runner.session_key("default", "new-isolated-session");
        runner.store().create_session(&second).await.unwrap();
        let events = runner
            .run("default", "new-isolated-session", "What is my name?")
            .await
            .unwrap();

        let response = events
            .iter()
            .find_map(|e| match &e.content {
                Content::ToolResponse { response, .. } => Some(response.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            response,
            json!({"status": "success", "user_name": "Manoj", "country": "India"})
        );
        assert_eq!(
            runner.store().get_state(&second, &StateKey::user("name")).await.unwrap(),
            Some(json!("Manoj"))
        );

        let counts = counter.counts();
        assert_eq!(counts.agent_runs, 2);
        assert_eq!(counts.model_requests, 4);
        assert_eq!(counts.tool_calls, 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_as_outcome() {
        let agent = user_info_agent(vec![
            ModelResponse::call("google_search", json!({"query": "quantum"})),
            ModelResponse::text("I could not search."),
        ]);
        let runner = Runner::in_memory(agent);
        let events = runner.run_debug("Find papers").await.unwrap();

        let response = events
            .iter()
            .find(|e| e.role == Role::Tool)
            .and_then(|e| match &e.content {
                Content::ToolResponse { response, .. } => Some(response.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(response["status"], "error");
        assert_eq!(response["error_message"], "Tool 'google_search' not found");
    }

    #[tokio::test]
    async fn test_bad_arguments_reported_as_outcome() {
        let agent = user_info_agent(vec![
            ModelResponse::call("save_userinfo", json!({"user_name": 7})),
            ModelResponse::text("Sorry."),
        ]);
        let runner = Runner::in_memory(agent);
        let events = runner.run_debug("I am 7").await.unwrap();
        assert!(events.iter().any(|e| matches!(
            &e.content,
            Content::ToolResponse { response, .. } if response["status"] == "error"
        )));
        let key = runner.session_key(DEBUG_USER_ID, DEBUG_SESSION_ID);
        assert_eq!(
            runner.store().get_state(&key, &StateKey::user("name")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_max_steps_exceeded() {
        let agent = user_info_agent(vec![ModelResponse::call("retrieve_userinfo", json!({})); 3]);
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStorage::new());
        let runner = Runner::new(
            agent,
            store,
            RunnerConfig {
                max_steps: 2,
                ..RunnerConfig::default()
            },
        );
        let err = runner.run_debug("loop").await.unwrap_err();
        assert!(matches!(err, RunnerError::MaxStepsExceeded(2)));
    }

    #[tokio::test]
    async fn test_run_debug_resumes_history() {
        let agent = user_info_agent(vec![ModelResponse::text("one"), ModelResponse::text("two")]);
        let runner = Runner::in_memory(agent);
        runner.run_debug("first").await.unwrap();
        runner.run_debug("second").await.unwrap();

        let key = runner.session_key(DEBUG_USER_ID, DEBUG_SESSION_ID);
        let texts: Vec<String> = runner
            .store()
            .list_events(&key)
            .await
            .unwrap()
            .iter()
            .filter_map(|e| e.text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["first", "one", "second", "two"]);
    }
}
