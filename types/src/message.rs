//! Conversation history model.
//!
//! Contains the `Message` sum type and its role-specific structs.
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{ModelName, NonEmptyString, ToolCall, ToolResult};

/// Role of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    content: NonEmptyString,
    timestamp: SystemTime,
}

impl UserMessage {
    #[must_use]
    pub fn new(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self { content, timestamp }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// One model reply: optional text plus zero or more tool calls.
///
/// `content` may be empty when the model only requested tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    timestamp: SystemTime,
    #[serde(flatten)]
    model: ModelName,
}

impl AssistantMessage {
    #[must_use]
    pub fn new(
        model: ModelName,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            timestamp,
            model,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    #[must_use]
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// A history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResult),
}

impl Message {
    #[must_use]
    pub fn user(content: NonEmptyString) -> Self {
        Message::User(UserMessage::new(content, SystemTime::now()))
    }

    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::ToolResult(_) => Role::ToolResult,
        }
    }

    /// Text content of the entry (tool output for tool results).
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Message::User(m) => m.content(),
            Message::Assistant(m) => m.content(),
            Message::ToolResult(r) => &r.content,
        }
    }

    /// The id linking a tool result back to its request.
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::ToolResult(r) => Some(&r.tool_call_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Provider;

    #[test]
    fn serde_round_trip_keeps_role_tag() {
        let msg = Message::Assistant(AssistantMessage::new(
            Provider::Claude.default_model(),
            "",
            vec![ToolCall::new("c1", "add", serde_json::json!({"a": 1, "b": 2}))],
            SystemTime::UNIX_EPOCH,
        ));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["model"], "claude-sonnet-4-5-20250929");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn tool_result_exposes_call_id() {
        let msg = Message::ToolResult(ToolResult::error("c9", "add", "boom"));
        assert_eq!(msg.role(), Role::ToolResult);
        assert_eq!(msg.tool_call_id(), Some("c9"));
        assert_eq!(msg.content(), "boom");
    }
}
