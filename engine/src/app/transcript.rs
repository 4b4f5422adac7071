//! Display transcript built from history and agent events.

use gatehouse_types::{AssistantMessage, Message, ToolCall, ToolResult, sanitize_terminal_text};

const ARGS_SUMMARY_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    User(String),
    Assistant(String),
    ToolCall { name: String, summary: String },
    ToolResult { name: String, content: String, is_error: bool },
    Notice(String),
    Error(String),
}

/// One-line, display-safe rendering of a call's arguments.
#[must_use]
pub fn summarize_args(call: &ToolCall) -> String {
    let raw = match &call.arguments {
        serde_json::Value::Object(map) if map.is_empty() => String::new(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    let clean = sanitize_terminal_text(&raw).replace(['\n', '\r'], " ");
    if clean.chars().count() <= ARGS_SUMMARY_MAX_CHARS {
        return clean;
    }
    let mut cut: String = clean.chars().take(ARGS_SUMMARY_MAX_CHARS).collect();
    cut.push('…');
    cut
}

pub(crate) fn assistant_entries(message: &AssistantMessage) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();
    let text = message.content().trim();
    if !text.is_empty() {
        entries.push(TranscriptEntry::Assistant(sanitize_terminal_text(text).into_owned()));
    }
    entries.extend(message.tool_calls().iter().map(|call| TranscriptEntry::ToolCall {
        name: call.name.clone(),
        summary: summarize_args(call),
    }));
    entries
}

pub(crate) fn result_entry(result: &ToolResult) -> TranscriptEntry {
    TranscriptEntry::ToolResult {
        name: result.tool_name.clone(),
        content: sanitize_terminal_text(&result.content).into_owned(),
        is_error: result.is_error,
    }
}

/// Rebuild the transcript of a stored thread.
#[must_use]
pub fn from_history(messages: &[Message]) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();
    for message in messages {
        match message {
            Message::User(user) => {
                entries.push(TranscriptEntry::User(
                    sanitize_terminal_text(user.content()).into_owned(),
                ));
            }
            Message::Assistant(assistant) => entries.extend(assistant_entries(assistant)),
            Message::ToolResult(result) => entries.push(result_entry(result)),
        }
    }
    entries
}
