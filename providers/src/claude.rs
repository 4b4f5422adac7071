//! Anthropic Messages API.
//!
//! History maps onto alternating `user` / `assistant` turns. Assistant tool
//! calls become `tool_use` blocks; tool results become `tool_result` blocks in
//! the following `user` turn. Consecutive same-role entries are merged into
//! one turn, which keeps every result for a batch in the single user message
//! the API requires.

use serde::Deserialize;
use serde_json::{Value, json};
use std::time::SystemTime;

use gatehouse_types::{AssistantMessage, Message, ModelName, ToolCall};

use crate::retry::RetryConfig;
use crate::{ApiConfig, ModelRequest, ProviderError, http_client, post_json};

const ANTHROPIC_VERSION: &str = "2023-06-01";

fn push_block(turns: &mut Vec<Value>, role: &str, block: Value) {
    if let Some(last) = turns.last_mut()
        && last["role"] == role
        && let Some(content) = last["content"].as_array_mut()
    {
        content.push(block);
        return;
    }
    turns.push(json!({ "role": role, "content": [block] }));
}

fn build_request_body(model: &str, max_tokens: u32, request: ModelRequest<'_>) -> Value {
    let mut turns: Vec<Value> = Vec::new();

    for msg in request.messages {
        match msg {
            Message::User(user) => {
                push_block(
                    &mut turns,
                    "user",
                    json!({ "type": "text", "text": user.content() }),
                );
            }
            Message::Assistant(reply) => {
                if !reply.content().trim().is_empty() {
                    push_block(
                        &mut turns,
                        "assistant",
                        json!({ "type": "text", "text": reply.content() }),
                    );
                }
                for call in reply.tool_calls() {
                    push_block(
                        &mut turns,
                        "assistant",
                        json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }),
                    );
                }
            }
            Message::ToolResult(result) => {
                push_block(
                    &mut turns,
                    "user",
                    json!({
                        "type": "tool_result",
                        "tool_use_id": result.tool_call_id,
                        "content": result.content,
                        "is_error": result.is_error,
                    }),
                );
            }
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model));
    body.insert("max_tokens".into(), json!(max_tokens));
    body.insert("messages".into(), Value::Array(turns));

    if !request.system_prompt.trim().is_empty() {
        body.insert("system".into(), json!(request.system_prompt));
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }

    Value::Object(body)
}

mod typed {
    use super::{Deserialize, Value};

    #[derive(Debug, Deserialize)]
    pub struct Response {
        #[serde(default)]
        pub content: Vec<ContentBlock>,
        #[serde(default)]
        pub stop_reason: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ContentBlock {
        Text {
            text: String,
        },
        ToolUse {
            id: String,
            name: String,
            #[serde(default)]
            input: Value,
        },
        #[serde(other)]
        Unknown,
    }
}

fn parse_response(model: ModelName, json: Value) -> Result<AssistantMessage, ProviderError> {
    let response: typed::Response =
        serde_json::from_value(json).map_err(|e| ProviderError::Decode(e.to_string()))?;

    let mut text: Vec<String> = Vec::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    for block in response.content {
        match block {
            typed::ContentBlock::Text { text: t } => text.push(t),
            typed::ContentBlock::ToolUse { id, name, input } => {
                if id.trim().is_empty() || name.trim().is_empty() {
                    return Err(ProviderError::Decode(
                        "tool_use block missing id or name".to_string(),
                    ));
                }
                let input = if input.is_null() { json!({}) } else { input };
                calls.push(ToolCall::new(id, name, input));
            }
            typed::ContentBlock::Unknown => {}
        }
    }

    if response.stop_reason.as_deref() == Some("max_tokens") {
        tracing::warn!("Claude reply truncated at max_tokens");
    }

    Ok(AssistantMessage::new(
        model,
        text.join("\n"),
        calls,
        SystemTime::now(),
    ))
}

pub(crate) async fn send_message(
    config: &ApiConfig,
    retry: &RetryConfig,
    request: ModelRequest<'_>,
) -> Result<AssistantMessage, ProviderError> {
    let client = http_client();
    let body = build_request_body(
        config.model().as_str(),
        config.max_output_tokens(),
        request,
    );

    let json = post_json(
        || {
            client
                .post(config.endpoint())
                .timeout(config.request_timeout())
                .header("x-api-key", config.api_key())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
        },
        retry,
    )
    .await?;

    parse_response(config.model().clone(), json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_types::{
        ApiKey, NonEmptyString, Provider, ToolDefinition, ToolResult,
    };
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn history() -> Vec<Message> {
        vec![
            Message::user(NonEmptyString::new("research rust").unwrap()),
            Message::Assistant(AssistantMessage::new(
                Provider::Claude.default_model(),
                "Searching.",
                vec![
                    ToolCall::new("toolu_1", "web_search", json!({"query": "rust"})),
                    ToolCall::new("toolu_2", "write_file", json!({"filename": "a.html"})),
                ],
                SystemTime::UNIX_EPOCH,
            )),
            Message::ToolResult(ToolResult::success("toolu_1", "web_search", "results")),
            Message::ToolResult(ToolResult::error("toolu_2", "write_file", "denied")),
        ]
    }

    #[test]
    fn maps_tool_calls_and_groups_results() {
        let messages = history();
        let tools = [ToolDefinition::new("web_search", "search", json!({"type": "object"}))];
        let body = build_request_body(
            "claude-x",
            1024,
            ModelRequest {
                system_prompt: "be brief",
                messages: &messages,
                tools: &tools,
            },
        );

        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], 1024);
        let turns = body["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 3);

        assert_eq!(turns[1]["role"], "assistant");
        let blocks = turns[1]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["input"]["query"], "rust");

        assert_eq!(turns[2]["role"], "user");
        let results = turns[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["is_error"], true);

        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn empty_assistant_text_is_omitted() {
        let messages = vec![Message::Assistant(AssistantMessage::new(
            Provider::Claude.default_model(),
            "",
            vec![ToolCall::new("t", "add", json!({"a": 1, "b": 2}))],
            SystemTime::UNIX_EPOCH,
        ))];
        let body = build_request_body(
            "claude-x",
            10,
            ModelRequest {
                system_prompt: "",
                messages: &messages,
                tools: &[],
            },
        );
        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["type"], "tool_use");
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn parses_text_and_tool_use() {
        let reply = parse_response(
            Provider::Claude.default_model(),
            json!({
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "toolu_9", "name": "add", "input": {"a": 2, "b": 3}}
                ],
                "stop_reason": "tool_use"
            }),
        )
        .unwrap();

        assert_eq!(reply.content(), "Let me check.");
        assert_eq!(reply.tool_calls().len(), 1);
        assert_eq!(reply.tool_calls()[0].id, "toolu_9");
        assert_eq!(reply.tool_calls()[0].arguments["b"], 3);
    }

    #[test]
    fn rejects_tool_use_without_id() {
        let err = parse_response(
            Provider::Claude.default_model(),
            json!({"content": [{"type": "tool_use", "id": "", "name": "add", "input": {}}]}),
        );
        assert!(matches!(err, Err(ProviderError::Decode(_))));
    }

    fn config(server: &MockServer) -> ApiConfig {
        ApiConfig::new(
            ApiKey::new(Provider::Claude, "sk-ant-test"),
            Provider::Claude.default_model(),
        )
        .unwrap()
        .with_endpoint(format!("{}/v1/messages", server.uri()))
    }

    #[tokio::test]
    async fn round_trip_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "done"}],
                "stop_reason": "end_turn"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = vec![Message::user(NonEmptyString::new("hi").unwrap())];
        let reply = send_message(
            &config(&server),
            &RetryConfig::none(),
            ModelRequest {
                system_prompt: "sys",
                messages: &messages,
                tools: &[],
            },
        )
        .await
        .unwrap();

        assert_eq!(reply.content(), "done");
        assert!(!reply.has_tool_calls());
    }

    #[tokio::test]
    async fn http_error_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string("{\"error\":\"invalid x-api-key\"}"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let messages = vec![Message::user(NonEmptyString::new("hi").unwrap())];
        let err = send_message(
            &config(&server),
            &RetryConfig::none(),
            ModelRequest {
                system_prompt: "",
                messages: &messages,
                tools: &[],
            },
        )
        .await
        .unwrap_err();

        match err {
            ProviderError::Http { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid x-api-key"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
