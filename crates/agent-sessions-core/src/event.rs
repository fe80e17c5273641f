//! Conversation events.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Tool => "tool",
        }
    }
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text message.
    Text { text: String },
    /// Agent asks for a tool to be run.
    ToolCall {
        call_id: String,
        name: String,
        args: Value,
    },
    /// Structured result of a tool call.
    ToolResponse {
        call_id: String,
        name: String,
        response: Value,
    },
}

/// One immutable turn in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// `"user"` for user turns, otherwise the producing agent's name.
    pub author: String,
    pub role: Role,
    pub content: Content,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(author: impl Into<String>, role: Role, content: Content) -> Self {
        Self {
            id: Uuid::new_v4(),
            author: author.into(),
            role,
            content,
            timestamp: now_millis(),
        }
    }

    /// User message.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new("user", Role::User, Content::Text { text: text.into() })
    }

    /// Agent reply.
    #[must_use]
    pub fn agent_text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(author, Role::Agent, Content::Text { text: text.into() })
    }

    /// Agent-issued tool call.
    #[must_use]
    pub fn tool_call(
        author: impl Into<String>,
        call_id: impl Into<String>,
        name: impl Into<String>,
        args: Value,
    ) -> Self {
        Self::new(
            author,
            Role::Agent,
            Content::ToolCall {
                call_id: call_id.into(),
                name: name.into(),
                args,
            },
        )
    }

    /// Tool result.
    #[must_use]
    pub fn tool_response(
        author: impl Into<String>,
        call_id: impl Into<String>,
        name: impl Into<String>,
        response: Value,
    ) -> Self {
        Self::new(
            author,
            Role::Tool,
            Content::ToolResponse {
                call_id: call_id.into(),
                name: name.into(),
                response,
            },
        )
    }

    /// Text payload, if this is a text event.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
