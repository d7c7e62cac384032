//! Conversation and chat-exchange types.
//!
//! The on-wire JSON keeps the flat `{role, content, tool_calls?,
//! tool_call_id?}` shape for compatibility with chat-completion style
//! transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Roles and messages ───────────────────────────────────────────────────────

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    /// Stable id, unique within a turn. Assigned by the parser when the
    /// model did not provide one.
    pub id: String,
    /// Tool name as registered in the registry.
    pub name: String,
    /// Argument object for the tool.
    pub arguments: Value,
}

/// A message in a conversation.
///
/// Invariant: `tool_call_id` is present exactly when `role == Tool`, and
/// refers to a `ToolCallRef::id` from an earlier assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// Assistant turn that requests tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRef>) -> Self {
        let mut m = Self::base(Role::Assistant, content);
        m.tool_calls = Some(calls);
        m
    }

    /// Result of a tool execution, tied back to the requesting call.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::base(Role::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

// ─── Conversation ─────────────────────────────────────────────────────────────

/// An ordered conversation plus its system prompt. Appended to by the agent
/// loop; never mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ─── Chat exchange ────────────────────────────────────────────────────────────

/// Request passed to a [`crate::ai::ChatProvider`]. Sampling parameters are
/// caller-supplied; `None` means provider default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Tool schemas in function-calling JSON shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Context window hint for local providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            top_k: None,
            num_ctx: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Provider reply: assistant text plus any structured tool calls the
/// transport extracted itself. Providers without native tool support leave
/// `tool_calls` empty and the loop falls back to parsing the text.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRef>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
