//! Turn and Conversation domain types.
//!
//! A conversation is the ordered, append-only list of turns that one
//! in-flight exchange sends to the provider:
//! history → user prompt → (tool call → tool result)* → next stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCall, ToolOutput};

/// Unique identifier for a conversation (one exchange).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// What a turn carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnContent {
    /// Free text.
    Text(String),
    /// A tool invocation requested by the model.
    ToolCall(ToolCall),
    /// The output of an executed tool call.
    ToolResult(ToolOutput),
}

/// One role-tagged unit of conversation content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: TurnContent) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a user text turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, TurnContent::Text(text.into()))
    }

    /// Create an assistant text turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, TurnContent::Text(text.into()))
    }

    /// Create a system text turn.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, TurnContent::Text(text.into()))
    }

    /// Create an assistant turn requesting a tool call.
    pub fn tool_call(call: ToolCall) -> Self {
        Self::new(Role::Assistant, TurnContent::ToolCall(call))
    }

    /// Create a tool turn carrying a result.
    pub fn tool_result(output: ToolOutput) -> Self {
        Self::new(Role::Tool, TurnContent::ToolResult(output))
    }

    /// The text payload, if this is a text turn.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.content, TurnContent::ToolCall(_))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self.content, TurnContent::ToolResult(_))
    }
}

/// The ordered turns of one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered turns
    pub turns: Vec<Turn>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self {
            id: ConversationId::new(),
            turns: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Whether the conversation can be sent to a provider: non-empty and
    /// ending with a user turn (fresh call) or a tool result (continuation).
    pub fn ready_for_call(&self) -> bool {
        match self.turns.last() {
            Some(turn) => turn.role == Role::User || turn.is_tool_result(),
            None => false,
        }
    }

    /// Every tool-call turn has a result turn with the same call id.
    pub fn tool_calls_paired(&self) -> bool {
        let calls: Vec<&str> = self
            .turns
            .iter()
            .filter_map(|t| match &t.content {
                TurnContent::ToolCall(c) => Some(c.id.as_str()),
                _ => None,
            })
            .collect();
        let results: Vec<&str> = self
            .turns
            .iter()
            .filter_map(|t| match &t.content {
                TurnContent::ToolResult(r) => Some(r.call_id.as_str()),
                _ => None,
            })
            .collect();
        calls.len() == results.len() && calls.iter().all(|id| results.contains(id))
    }

    /// Rough token estimate (4 chars ≈ 1 token), text turns only.
    pub fn estimated_tokens(&self) -> usize {
        self.turns
            .iter()
            .filter_map(Turn::text)
            .map(|t| t.len() / 4)
            .sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
