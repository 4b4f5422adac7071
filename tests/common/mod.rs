//! Shared test utilities and fixtures
//!
//! Builds agents wired to wiremock LLM servers, real built-in tools, and a
//! SQLite checkpoint file, the way the binary wires them.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gatehouse_engine::gatehouse_tools::builtins::register_builtins;
use gatehouse_engine::gatehouse_tools::sandbox::{Sandbox, default_sandbox_deny_patterns};
use gatehouse_engine::gatehouse_tools::{ToolSettings, ToolsConfig};
use gatehouse_engine::{
    Agent, AgentSettings, ApiConfig, HttpModelClient, Provider, SqliteCheckpointStore, ToolRegistry,
};
use gatehouse_providers::retry::RetryConfig;
use gatehouse_types::ApiKey;
use serde_json::{Value, json};
use wiremock::MockServer;

pub const CLAUDE_KEY: &str = "sk-ant-integration";
pub const OPENAI_KEY: &str = "sk-integration";

/// Built-ins that need no network: `write_file`, `add`, `multiply`.
pub fn offline_tools(report_dir: &Path) -> ToolsConfig {
    let mut tools = ToolsConfig {
        report_dir: report_dir.display().to_string(),
        ..ToolsConfig::default()
    };
    tools.web_search.enabled = false;
    tools.holidays.enabled = false;
    tools.publish.enabled = false;
    tools.calculator.enabled = true;
    tools
}

pub fn api_config(provider: Provider, server: &MockServer) -> ApiConfig {
    let (key, path) = match provider {
        Provider::Claude => (CLAUDE_KEY, "/v1/messages"),
        Provider::OpenAI => (OPENAI_KEY, "/v1/responses"),
    };
    ApiConfig::new(ApiKey::new(provider, key), provider.default_model())
        .unwrap()
        .with_endpoint(format!("{}{path}", server.uri()))
}

/// An agent over a SQLite file at `db`. Building a second one over the
/// same file stands in for a restarted process.
pub fn build_agent(provider: Provider, server: &MockServer, db: &Path, report_dir: &Path) -> Agent {
    let tools = offline_tools(report_dir);
    let mut registry = ToolRegistry::default();
    register_builtins(&mut registry, &tools).unwrap();

    let settings = AgentSettings {
        system_prompt: "You are a research assistant.".to_string(),
        max_rounds_per_turn: 8,
        tools: ToolSettings {
            sandbox: Sandbox::new(report_dir, default_sandbox_deny_patterns()).unwrap(),
            default_timeout: Duration::from_secs(10),
            max_output_bytes: tools.max_output_bytes,
        },
    };
    let model = HttpModelClient::new(api_config(provider, server), RetryConfig::none());
    let store = SqliteCheckpointStore::open(db).unwrap();
    Agent::new(Arc::new(model), Arc::new(registry), Arc::new(store), settings)
}

/// Anthropic Messages API reply requesting `calls` as `(id, name, input)`.
pub fn claude_tool_use(text: &str, calls: &[(&str, &str, Value)]) -> Value {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(json!({"type": "text", "text": text}));
    }
    for (id, name, input) in calls {
        content.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
    }
    json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": content,
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 10, "output_tokens": 20}
    })
}

pub fn claude_text(text: &str) -> Value {
    json!({
        "id": "msg_final",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 30, "output_tokens": 5}
    })
}

/// OpenAI Responses API reply requesting `calls` as `(call_id, name, arguments)`.
pub fn openai_function_calls(calls: &[(&str, &str, Value)]) -> Value {
    let output: Vec<Value> = calls
        .iter()
        .map(|(call_id, name, arguments)| {
            json!({
                "type": "function_call",
                "id": format!("fc_{call_id}"),
                "call_id": call_id,
                "name": name,
                "arguments": arguments.to_string(),
            })
        })
        .collect();
    json!({"id": "resp_tools", "status": "completed", "output": output})
}

pub fn openai_text(text: &str) -> Value {
    json!({
        "id": "resp_final",
        "status": "completed",
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}]
        }]
    })
}
