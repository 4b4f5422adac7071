//! OpenAI Responses API.
//!
//! Plain turns become role/content input items. Tool calls and results are
//! separate `function_call` / `function_call_output` items linked by
//! `call_id`. `store` is disabled; the full history is sent each call.

use serde::Deserialize;
use serde_json::{Value, json};
use std::time::SystemTime;

use gatehouse_types::{AssistantMessage, Message, ModelName, ToolCall};

use crate::retry::RetryConfig;
use crate::{ApiConfig, ModelRequest, ProviderError, http_client, post_json};

fn build_request_body(model: &str, max_tokens: u32, request: ModelRequest<'_>) -> Value {
    let mut input: Vec<Value> = Vec::new();

    for msg in request.messages {
        match msg {
            Message::User(user) => {
                input.push(json!({ "role": "user", "content": user.content() }));
            }
            Message::Assistant(reply) => {
                if !reply.content().trim().is_empty() {
                    input.push(json!({ "role": "assistant", "content": reply.content() }));
                }
                for call in reply.tool_calls() {
                    let arguments = match &call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => serde_json::to_string(other).unwrap_or_else(|_| "{}".into()),
                    };
                    input.push(json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.name,
                        "arguments": arguments,
                    }));
                }
            }
            Message::ToolResult(result) => {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": result.tool_call_id,
                    "output": result.content,
                }));
            }
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model));
    body.insert("input".into(), Value::Array(input));
    body.insert("max_output_tokens".into(), json!(max_tokens));
    body.insert("store".into(), json!(false));

    if !request.system_prompt.trim().is_empty() {
        body.insert("instructions".into(), json!(request.system_prompt));
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }

    Value::Object(body)
}

mod typed {
    use super::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Response {
        #[serde(default)]
        pub status: Option<String>,
        #[serde(default)]
        pub output: Vec<OutputItem>,
        #[serde(default)]
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum OutputItem {
        Message {
            #[serde(default)]
            content: Vec<ContentPart>,
        },
        FunctionCall {
            #[serde(default)]
            call_id: Option<String>,
            #[serde(default)]
            id: Option<String>,
            name: String,
            #[serde(default)]
            arguments: String,
        },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ContentPart {
        OutputText {
            text: String,
        },
        Refusal {
            refusal: String,
        },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default)]
        pub message: String,
    }
}

fn parse_response(model: ModelName, json: Value) -> Result<AssistantMessage, ProviderError> {
    let response: typed::Response =
        serde_json::from_value(json).map_err(|e| ProviderError::Decode(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(ProviderError::Decode(format!(
            "response failed: {}",
            error.message
        )));
    }
    if response.status.as_deref() == Some("incomplete") {
        tracing::warn!("OpenAI response incomplete; using partial output");
    }

    let mut text = String::new();
    let mut calls: Vec<ToolCall> = Vec::new();
    for item in response.output {
        match item {
            typed::OutputItem::Message { content } => {
                for part in content {
                    match part {
                        typed::ContentPart::OutputText { text: t }
                        | typed::ContentPart::Refusal { refusal: t } => text.push_str(&t),
                        typed::ContentPart::Unknown => {}
                    }
                }
            }
            typed::OutputItem::FunctionCall {
                call_id,
                id,
                name,
                arguments,
            } => {
                let Some(call_id) = call_id.or(id).filter(|s| !s.trim().is_empty()) else {
                    return Err(ProviderError::Decode("function_call missing call_id".into()));
                };
                let arguments = if arguments.trim().is_empty() {
                    json!({})
                } else {
                    match serde_json::from_str(&arguments) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            // Kept as raw text; argument validation rejects it as a tool error.
                            tracing::warn!(
                                tool = %name,
                                call_id = %call_id,
                                error = %e,
                                "function_call arguments are not valid JSON"
                            );
                            Value::String(arguments)
                        }
                    }
                };
                calls.push(ToolCall::new(call_id, name, arguments));
            }
            typed::OutputItem::Unknown => {}
        }
    }

    Ok(AssistantMessage::new(model, text, calls, SystemTime::now()))
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
    let auth_header = format!("Bearer {}", config.api_key());

    let json = post_json(
        || {
            client
                .post(config.endpoint())
                .timeout(config.request_timeout())
                .header("Authorization", &auth_header)
                .header("content-type", "application/json")
                .json(&body)
        },
        retry,
    )
    .await?;

    parse_response(config.model().clone(), json)
}
