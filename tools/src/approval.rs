//! Human-readable approval requests for pending tool calls.
//!
//! Formatting dispatches on the tool *name*, never on the shape of the
//! arguments. Every argument the model supplied ends up in some section;
//! nothing is summarized away, since the user is approving exactly what will
//! run.

use gatehouse_types::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::builtins::WRITE_FILE_TOOL_NAME;
use crate::search::WEB_SEARCH_TOOL_NAME;

const TOOL_HEADING: &str = "Tool";
const ARGUMENTS_HEADING: &str = "Arguments";
const FILE_NAME_HEADING: &str = "File name";
const FILE_CONTENT_HEADING: &str = "File content";
const OTHER_ARGUMENTS_HEADING: &str = "Other arguments";
const QUERY_HEADING: &str = "Query";
const SEARCH_OPTIONS_HEADING: &str = "Search options";

const MISSING: &str = "(missing)";
const NONE: &str = "(none)";

/// One titled block of an approval card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSection {
    pub heading: String,
    pub lines: Vec<String>,
}

impl ApprovalSection {
    fn new(heading: &str, lines: Vec<String>) -> Self {
        Self {
            heading: heading.to_string(),
            lines,
        }
    }
}

/// What the user sees before deciding on a single tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub sections: Vec<ApprovalSection>,
}

impl ApprovalRequest {
    /// Bulleted plain-text rendering.
    ///
    /// ```text
    /// * Tool
    ///   - web_search
    /// * Query
    ///   - rust
    /// ```
    ///
    /// Continuation lines of a multi-line entry are indented under it.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        push_section(&mut out, TOOL_HEADING, std::slice::from_ref(&self.tool_name));
        for section in &self.sections {
            push_section(&mut out, &section.heading, &section.lines);
        }
        // Drop the trailing newline.
        out.pop();
        out
    }
}

fn push_section(out: &mut String, heading: &str, lines: &[String]) {
    out.push_str("* ");
    out.push_str(heading);
    out.push('\n');
    for line in lines {
        let mut parts = line.split('\n');
        let first = parts.next().unwrap_or_default();
        out.push_str("  - ");
        out.push_str(first);
        out.push('\n');
        for rest in parts {
            out.push_str("    ");
            out.push_str(rest);
            out.push('\n');
        }
    }
}

/// Build the approval card for `call`. Pure and total.
#[must_use]
pub fn format_approval(call: &ToolCall) -> ApprovalRequest {
    let sections = match call.name.as_str() {
        WRITE_FILE_TOOL_NAME => write_file_sections(&call.arguments),
        WEB_SEARCH_TOOL_NAME => web_search_sections(&call.arguments),
        _ => vec![ApprovalSection::new(
            ARGUMENTS_HEADING,
            argument_lines(&call.arguments),
        )],
    };

    ApprovalRequest {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        sections,
    }
}

fn write_file_sections(args: &Value) -> Vec<ApprovalSection> {
    let Value::Object(map) = args else {
        return vec![
            ApprovalSection::new(FILE_NAME_HEADING, vec![MISSING.to_string()]),
            ApprovalSection::new(FILE_CONTENT_HEADING, vec![MISSING.to_string()]),
            ApprovalSection::new(OTHER_ARGUMENTS_HEADING, argument_lines(args)),
        ];
    };

    let field = |key: &str| {
        map.get(key)
            .map_or_else(|| MISSING.to_string(), display_value)
    };
    let mut sections = vec![
        ApprovalSection::new(FILE_NAME_HEADING, vec![field("filename")]),
        ApprovalSection::new(FILE_CONTENT_HEADING, vec![field("content")]),
    ];

    let others: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "filename" | "content"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !others.is_empty() {
        sections.push(ApprovalSection::new(
            OTHER_ARGUMENTS_HEADING,
            object_lines(&others),
        ));
    }
    sections
}

/// The query leads; every other search parameter follows sorted by key.
fn web_search_sections(args: &Value) -> Vec<ApprovalSection> {
    let Value::Object(map) = args else {
        return vec![ApprovalSection::new(ARGUMENTS_HEADING, argument_lines(args))];
    };

    let query = map
        .get("query")
        .map_or_else(|| MISSING.to_string(), display_value);
    let mut sections = vec![ApprovalSection::new(QUERY_HEADING, vec![query])];

    let options: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| key.as_str() != "query")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !options.is_empty() {
        sections.push(ApprovalSection::new(
            SEARCH_OPTIONS_HEADING,
            object_lines(&options),
        ));
    }
    sections
}

fn argument_lines(args: &Value) -> Vec<String> {
    match args {
        Value::Object(map) => object_lines(map),
        Value::Null => vec![NONE.to_string()],
        other => vec![display_value(other)],
    }
}

/// `key: value` lines with keys sorted, so the card is stable regardless of
/// the map's iteration order.
fn object_lines(map: &Map<String, Value>) -> Vec<String> {
    if map.is_empty() {
        return vec![NONE.to_string()];
    }
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(key, value)| format!("{key}: {}", display_value(value)))
        .collect()
}

/// Strings render bare; everything else as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
