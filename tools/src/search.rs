//! Web search backed by the Tavily search API.

use gatehouse_providers::{http_client, read_capped_error_body};
use serde::Deserialize;
use serde_json::json;

use super::config::WebSearchConfig;
use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args, sanitize_output, truncate_output};

pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

const MAX_RESULTS_CAP: u32 = 20;

#[derive(Debug)]
pub struct WebSearchTool {
    config: WebSearchConfig,
    api_key: String,
}

impl WebSearchTool {
    #[must_use]
    pub fn new(config: WebSearchConfig, api_key: String) -> Self {
        Self { config, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<u32>,
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

fn render_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results for \"{query}\".");
    }
    let mut out = String::new();
    for (idx, hit) in hits.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "{}. {}\n   {}\n   {}\n",
            idx + 1,
            hit.title.trim(),
            hit.url.trim(),
            hit.content.trim()
        ));
    }
    out
}

impl ToolExecutor for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web. Returns ranked results with title, URL, and a content snippet."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1, "description": "Search query." },
                "max_results": { "type": "integer", "minimum": 1, "maximum": MAX_RESULTS_CAP },
                "topic": { "type": "string", "enum": ["general", "news", "finance"] }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: SearchArgs = parse_args(&args)?;
            let max_results = typed
                .max_results
                .unwrap_or(self.config.max_results)
                .clamp(1, MAX_RESULTS_CAP);
            let topic = typed.topic.unwrap_or_else(|| self.config.topic.clone());

            let failed = |message: String| ToolError::ExecutionFailed {
                tool: WEB_SEARCH_TOOL_NAME.to_string(),
                message,
            };

            let response = http_client()
                .post(&self.config.endpoint)
                .timeout(ctx.default_timeout)
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "query": typed.query,
                    "max_results": max_results,
                    "topic": topic,
                }))
                .send()
                .await
                .map_err(|e| failed(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = read_capped_error_body(response).await;
                return Err(failed(format!("HTTP {}: {body}", status.as_u16())));
            }

            let parsed: SearchResponse = response
                .json()
                .await
                .map_err(|e| failed(format!("invalid response: {e}")))?;
            tracing::debug!(hits = parsed.results.len(), "Web search completed");

            let rendered = render_hits(&typed.query, &parsed.results);
            Ok(truncate_output(sanitize_output(&rendered), ctx.max_output_bytes))
        })
    }
}
