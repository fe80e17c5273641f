//! Simulated agent runner for session-backed conversations.
//!
//! Provides:
//! - `Runner` - Drives an agent turn by turn against a `SessionStore`
//! - `Agent` / `AgentTool` - Agent definitions and sub-agents as tools
//! - `Model` / `ScriptedModel` - Model seam and a deterministic stand-in
//! - Tool schemas, registry and the `ToolContext` state adapter
//! - `Plugin` hooks with invocation counting and logging
//! - Built-in demo tools

pub mod agent;
pub mod builtin;
pub mod context;
pub mod error;
pub mod model;
pub mod plugin;
pub mod runner;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentTool};
pub use context::ToolContext;
pub use error::RunnerError;
pub use model::{Model, ModelRequest, ModelResponse, ScriptedModel, ToolCall};
pub use plugin::{CallbackContext, CountInvocationPlugin, InvocationCounts, LoggingPlugin, Plugin};
pub use runner::{DEBUG_SESSION_ID, DEBUG_USER_ID, Runner, RunnerConfig, final_reply};
pub use tool::{FnTool, ParamKind, ParamSpec, Tool, ToolArgs, ToolOutcome, ToolRegistry, ToolSpec};
