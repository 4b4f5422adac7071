//! Configuration types used by tool executors.
//!
//! These live here rather than in `gatehouse-engine::config` so tools can be
//! built without depending on the engine. The engine embeds [`ToolsConfig`]
//! as its `[tools]` table.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Serde helper for fields that default to `true`.
#[must_use]
pub const fn default_true() -> bool {
    true
}

pub const DEFAULT_REPORT_DIR: &str = "report";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
pub const TAVILY_API_KEY_ENV: &str = "TAVILY_API_KEY";
pub const JP_HOLIDAYS_URL: &str = "https://holidays-jp.github.io/api/v1/date.json";

/// `[tools]` table.
///
/// ```toml
/// [tools]
/// report_dir = "report"
/// timeout_secs = 60
///
/// [tools.web_search]
/// max_results = 2
/// topic = "general"
///
/// [[tools.mcp]]
/// name = "aws-knowledge"
/// url = "https://knowledge-mcp.global.api.aws"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub report_dir: String,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub web_search: WebSearchConfig,
    pub publish: PublishConfig,
    pub holidays: HolidaysConfig,
    pub calculator: CalculatorConfig,
    pub mcp: Vec<McpServerConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            report_dir: DEFAULT_REPORT_DIR.to_string(),
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            web_search: WebSearchConfig::default(),
            publish: PublishConfig::default(),
            holidays: HolidaysConfig::default(),
            calculator: CalculatorConfig::default(),
            mcp: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    /// Falls back to `TAVILY_API_KEY`.
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: u32,
    pub topic: String,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            endpoint: TAVILY_SEARCH_URL.to_string(),
            max_results: 2,
            topic: "general".to_string(),
        }
    }
}

impl WebSearchConfig {
    /// Configured key, else the environment. Blank values count as missing.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(TAVILY_API_KEY_ENV).ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// SNS notification tool. Credentials always come from the standard AWS
/// environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,
    /// Falls back to `AWS_SNS_TOPIC_ARN`.
    pub topic_arn: Option<String>,
    /// Falls back to `AWS_REGION`, then the region in the topic ARN.
    pub region: Option<String>,
    /// Override for the regional SNS endpoint.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HolidaysConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for HolidaysConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: JP_HOLIDAYS_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    pub enabled: bool,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One streamable-HTTP MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}
