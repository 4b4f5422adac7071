//! Streamable-HTTP MCP client and tool proxies.
//!
//! Each configured server is initialized once at startup and its
//! `tools/list` result is registered as ordinary [`ToolExecutor`]s. Calls go
//! through `tools/call`. Servers may answer a POST either with a JSON body or
//! with a `text/event-stream` carrying the JSON-RPC response as an event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use gatehouse_providers::{http_client, read_capped_error_body, sse};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::config::McpServerConfig;
use super::{
    ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, sanitize_output, truncate_output,
};

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

const SESSION_HEADER: &str = "mcp-session-id";
/// Guards against servers that paginate forever.
const MAX_LIST_PAGES: usize = 32;
/// Largest JSON-RPC reply read into memory.
const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP server {server} request failed: {message}")]
    Transport { server: String, message: String },
    #[error("MCP server {server} returned HTTP {status}: {body}")]
    Http {
        server: String,
        status: u16,
        body: String,
    },
    #[error("MCP server {server} error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("MCP server {server} sent an invalid response: {message}")]
    Protocol { server: String, message: String },
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// One entry of a `tools/list` result.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object"})
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpToolInfo>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    Text {
        text: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct EmbeddedResource {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    text: Option<String>,
}

/// Decoded `tools/call` result.
#[derive(Debug, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text content joined with blank lines; non-text items are named, not dropped.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.clone(),
                ContentItem::Resource { resource } => resource
                    .text
                    .clone()
                    .unwrap_or_else(|| format!("[resource {}]", resource.uri)),
                ContentItem::Other => "[non-text content omitted]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// JSON-RPC session with one MCP server.
#[derive(Debug)]
pub struct McpClient {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    max_response_bytes: usize,
}

impl McpClient {
    #[must_use]
    pub fn new(config: &McpServerConfig, timeout: Duration) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            headers: config.headers.clone(),
            timeout,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.name
    }

    /// `initialize` handshake followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "gatehouse",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await?;
        let server_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(
            server = %self.name,
            protocol = server_version,
            "MCP server initialized"
        );
        self.notify("notifications/initialized").await
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| self.protocol(e.to_string()))?;
            tools.extend(page.tools);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::info!(server = %self.name, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| self.protocol(e.to_string()))
    }

    fn protocol(&self, message: String) -> McpError {
        McpError::Protocol {
            server: self.name.clone(),
            message,
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn build(&self, body: &RpcRequest<'_>) -> reqwest::RequestBuilder {
        let mut builder = http_client()
            .post(&self.url)
            .timeout(self.timeout)
            .header("accept", "application/json, text/event-stream")
            .header("content-type", "application/json");
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder.json(body)
    }

    async fn send(&self, body: &RpcRequest<'_>) -> Result<reqwest::Response, McpError> {
        let response = self
            .build(body)
            .send()
            .await
            .map_err(|e| McpError::Transport {
                server: self.name.clone(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http {
                server: self.name.clone(),
                status: status.as_u16(),
                body: read_capped_error_body(response).await,
            });
        }
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self
                .session_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(session.to_string());
        }
        Ok(response)
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        };
        self.send(&body).await.map(drop)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };
        tracing::debug!(server = %self.name, method, id, "MCP request");

        let response = self.send(&body).await?;
        let is_event_stream = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = self.read_body(response).await?;

        let reply = if is_event_stream {
            find_response_in_stream(&text, id).ok_or_else(|| {
                self.protocol(format!("no response for request {id} in event stream"))
            })?
        } else {
            serde_json::from_str::<RpcResponse>(&text).map_err(|e| self.protocol(e.to_string()))?
        };

        if let Some(error) = reply.error {
            return Err(McpError::Rpc {
                server: self.name.clone(),
                code: error.code,
                message: error.message,
            });
        }
        reply
            .result
            .ok_or_else(|| self.protocol(format!("{method} returned no result")))
    }

    /// Read a reply body, refusing anything past `max_response_bytes`.
    async fn read_body(&self, mut response: reqwest::Response) -> Result<String, McpError> {
        let limit = self.max_response_bytes;
        let too_large = || self.protocol(format!("response exceeds {limit} bytes"));
        let limit_u64 = u64::try_from(limit).unwrap_or(u64::MAX);
        if response.content_length().is_some_and(|len| len > limit_u64) {
            return Err(too_large());
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| McpError::Transport {
            server: self.name.clone(),
            message: e.to_string(),
        })? {
            if body.len() + chunk.len() > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        String::from_utf8(body).map_err(|e| self.protocol(format!("response is not UTF-8: {e}")))
    }
}

/// The JSON-RPC response for `id` among the events of an SSE body.
///
/// Servers may interleave notifications and requests of their own; anything
/// that is not a response to `id` is skipped.
fn find_response_in_stream(body: &str, id: u64) -> Option<RpcResponse> {
    sse::data_payloads(body)
        .into_iter()
        .filter_map(|data| serde_json::from_str::<RpcResponse>(&data).ok())
        .find(|reply| reply.id.as_ref().and_then(Value::as_u64) == Some(id))
}

/// Proxy for one remote tool.
#[derive(Debug)]
pub struct McpTool {
    client: Arc<McpClient>,
    info: McpToolInfo,
    description: String,
}

impl McpTool {
    #[must_use]
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        let description = info
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool provided by MCP server {}", client.server_name()));
        Self {
            client,
            info,
            description,
        }
    }
}

impl ToolExecutor for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let result = self
                .client
                .call_tool(&self.info.name, args)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool: self.info.name.clone(),
                    message: e.to_string(),
                })?;
            let text = truncate_output(sanitize_output(&result.text()), ctx.max_output_bytes);
            if result.is_error {
                return Err(ToolError::ExecutionFailed {
                    tool: self.info.name.clone(),
                    message: text,
                });
            }
            Ok(text)
        })
    }
}

/// Connect to `config`, list its tools, and register a proxy for each.
///
/// Returns the number of tools registered.
pub async fn connect_and_register(
    registry: &mut ToolRegistry,
    config: &McpServerConfig,
    timeout: Duration,
) -> anyhow::Result<usize> {
    let client = Arc::new(McpClient::new(config, timeout));
    client
        .initialize()
        .await
        .with_context(|| format!("failed to initialize MCP server '{}'", config.name))?;
    let tools = client
        .list_tools()
        .await
        .with_context(|| format!("failed to list tools of MCP server '{}'", config.name))?;

    let count = tools.len();
    for info in tools {
        registry
            .register(Box::new(McpTool::new(Arc::clone(&client), info)))
            .with_context(|| format!("MCP server '{}' tool name conflict", config.name))?;
    }
    Ok(count)
}
