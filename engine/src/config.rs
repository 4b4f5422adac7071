use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;

use gatehouse_providers::retry::RetryConfig;
use gatehouse_providers::{ApiConfig, ApiConfigError};
use gatehouse_tools::ToolsConfig;
use gatehouse_tools::publish::{self, PublishConfigError};
use gatehouse_types::{ApiKey, ModelName, ModelParseError, Provider};

pub const CONFIG_PATH_ENV: &str = "GATEHOUSE_CONFIG";
pub const DEFAULT_MAX_ROUNDS_PER_TURN: u32 = 16;
pub const DEFAULT_LLM_MAX_RETRIES: u32 = 0;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a research assistant working in a terminal. Use the available tools to \
search the web, look up reference data, and write your findings to report files. \
A human reviews every tool call before it runs and may deny it. When a call is \
denied, do not retry it; continue the task with the information you already have. \
Finish with a concise summary of what you did.";

#[derive(Debug, Default, Deserialize)]
pub struct GatehouseConfig {
    pub app: Option<AppConfig>,
    pub api_keys: Option<ApiKeys>,
    pub agent: Option<AgentConfig>,
    pub storage: Option<StorageConfig>,
    pub tools: Option<ToolsConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// A required setting is missing or malformed. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown provider '{0}' (expected claude or openai)")]
    UnknownProvider(String),
    #[error("invalid model '{model}': {source}")]
    InvalidModel {
        model: String,
        source: ModelParseError,
    },
    #[error("no API key for {provider}: set {env_var} or [api_keys].{table_key}")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
        table_key: &'static str,
    },
    #[error("web_search is enabled but no Tavily key is configured: set {env_var} or [tools.web_search].api_key")]
    MissingSearchKey { env_var: &'static str },
    #[error("publish_notification is enabled but misconfigured: {0}")]
    Publish(#[from] PublishConfigError),
    #[error(transparent)]
    Api(#[from] ApiConfigError),
    #[error("[agent].max_rounds_per_turn must be at least 1")]
    ZeroRounds,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// `claude` or `openai`. Inferred from `model` when absent.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// ASCII-only glyphs for terminals without Unicode fonts.
    #[serde(default)]
    pub ascii_only: bool,
    #[serde(default)]
    pub high_contrast: bool,
}

#[derive(Default, Deserialize)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(opt: Option<&String>) -> &'static str {
            if opt.is_some() { "[REDACTED]" } else { "None" }
        }
        f.debug_struct("ApiKeys")
            .field("anthropic", &mask(self.anthropic.as_ref()))
            .field("openai", &mask(self.openai.as_ref()))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentConfig {
    pub max_rounds_per_turn: Option<u32>,
    /// Retries for a failed LLM request. Defaults to none.
    pub llm_max_retries: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    /// Override the provider endpoint (proxies, local gateways).
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite checkpoint database. `~/` is expanded.
    pub checkpoint_path: Option<String>,
}

/// Validated runtime settings derived from [`GatehouseConfig`] and the
/// environment.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub system_prompt: String,
    pub max_rounds_per_turn: u32,
    pub checkpoint_path: PathBuf,
    pub tools: ToolsConfig,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            // Unclosed reference stays literal.
            out.push_str(&rest[open..]);
            return out;
        };
        let var = &after[..close];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| expand_env_vars(v).trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_non_blank(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl GatehouseConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    fn provider(&self) -> Result<Provider, ConfigurationError> {
        let app = self.app.as_ref();
        if let Some(raw) = app.and_then(|a| a.provider.as_deref()) {
            return Provider::parse(raw).ok_or_else(|| ConfigurationError::UnknownProvider(raw.to_string()));
        }
        Ok(app
            .and_then(|a| a.model.as_deref())
            .and_then(Provider::from_model_name)
            .unwrap_or_default())
    }

    fn api_key(&self, provider: Provider) -> Result<ApiKey, ConfigurationError> {
        let keys = self.api_keys.as_ref();
        let (configured, table_key) = match provider {
            Provider::Claude => (keys.and_then(|k| k.anthropic.as_ref()), "anthropic"),
            Provider::OpenAI => (keys.and_then(|k| k.openai.as_ref()), "openai"),
        };
        non_blank(configured)
            .or_else(|| env_non_blank(provider.env_var()))
            .map(|key| ApiKey::new(provider, key))
            .ok_or(ConfigurationError::MissingApiKey {
                provider: provider.display_name(),
                env_var: provider.env_var(),
                table_key,
            })
    }

    /// Tools config with `${VAR}` references expanded.
    fn expanded_tools(&self) -> ToolsConfig {
        let mut tools = self.tools.clone().unwrap_or_default();
        tools.web_search.api_key = non_blank(tools.web_search.api_key.as_ref());
        tools.publish.topic_arn = non_blank(tools.publish.topic_arn.as_ref());
        for server in &mut tools.mcp {
            server.url = expand_env_vars(&server.url);
            for value in server.headers.values_mut() {
                *value = expand_env_vars(value);
            }
        }
        tools
    }

    /// Validate everything the agent needs before the first run.
    ///
    /// Every missing credential for an enabled capability is reported here
    /// rather than at first use.
    pub fn resolve(&self) -> Result<RuntimeSettings, ConfigurationError> {
        let provider = self.provider()?;
        let app = self.app.as_ref();
        let model = match app.and_then(|a| a.model.as_deref()) {
            Some(raw) => ModelName::parse(provider, raw).map_err(|source| ConfigurationError::InvalidModel {
                model: raw.to_string(),
                source,
            })?,
            None => provider.default_model(),
        };
        let api_key = self.api_key(provider)?;

        let agent = self.agent.as_ref();
        let max_rounds_per_turn = agent
            .and_then(|a| a.max_rounds_per_turn)
            .unwrap_or(DEFAULT_MAX_ROUNDS_PER_TURN);
        if max_rounds_per_turn == 0 {
            return Err(ConfigurationError::ZeroRounds);
        }

        let mut api = ApiConfig::new(api_key, model)?
            .with_max_output_tokens(agent.and_then(|a| a.max_output_tokens).unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS))
            .with_request_timeout(Duration::from_secs(
                agent
                    .and_then(|a| a.request_timeout_secs)
                    .unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
            ));
        if let Some(endpoint) = agent.and_then(|a| non_blank(a.endpoint.as_ref())) {
            api = api.with_endpoint(endpoint);
        }
        let retry = RetryConfig::default()
            .with_max_retries(agent.and_then(|a| a.llm_max_retries).unwrap_or(DEFAULT_LLM_MAX_RETRIES));

        let tools = self.expanded_tools();
        if tools.web_search.enabled && tools.web_search.resolved_api_key().is_none() {
            return Err(ConfigurationError::MissingSearchKey {
                env_var: gatehouse_tools::config::TAVILY_API_KEY_ENV,
            });
        }
        if tools.publish.enabled {
            publish::PublishTool::from_config(&tools.publish)?;
        }

        let system_prompt = app
            .and_then(|a| a.system_prompt.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .to_string();

        let checkpoint_path = self
            .storage
            .as_ref()
            .and_then(|s| s.checkpoint_path.as_deref())
            .map_or_else(|| gatehouse_dir().join("checkpoints.db"), expand_home);

        Ok(RuntimeSettings {
            api,
            retry,
            system_prompt,
            max_rounds_per_turn,
            checkpoint_path,
            tools,
        })
    }
}

/// `~/.gatehouse`, or `./.gatehouse` when no home directory is known.
#[must_use]
pub fn gatehouse_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".gatehouse"), |home| home.join(".gatehouse"))
}

#[must_use]
pub fn log_dir() -> PathBuf {
    gatehouse_dir().join("logs")
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = env_non_blank(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(explicit));
    }
    dirs::home_dir().map(|home| home.join(".gatehouse").join("config.toml"))
}

fn expand_home(raw: &str) -> PathBuf {
    let expanded = expand_env_vars(raw);
    if let Some(rest) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> GatehouseConfig {
        toml::from_str(toml_str).unwrap()
    }

    // Keyed config with optional tools off, so tests never read the environment.
    const OFFLINE: &str = r#"
[api_keys]
anthropic = "sk-ant-test"
openai = "sk-openai-test"

[tools.web_search]
enabled = false
"#;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            std::env::set_var("GATEHOUSE_TEST_CONFIG_VAR", "replaced");
        }
        let result = expand_env_vars("prefix ${GATEHOUSE_TEST_CONFIG_VAR} suffix");
        assert_eq!(result, "prefix replaced suffix");
        unsafe {
            std::env::remove_var("GATEHOUSE_TEST_CONFIG_VAR");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            std::env::remove_var("GATEHOUSE_MISSING_VAR_FOR_TEST");
        }
        let result = expand_env_vars("before ${GATEHOUSE_MISSING_VAR_FOR_TEST} after");
        assert_eq!(result, "before  after");
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("a ${UNCLOSED"), "a ${UNCLOSED");
    }

    #[test]
    fn expand_env_vars_empty_var_name_dropped() {
        assert_eq!(expand_env_vars("x${}y"), "xy");
    }

    #[test]
    fn expand_env_vars_unicode_content() {
        assert_eq!(expand_env_vars("レポート ${}完了"), "レポート 完了");
    }

    #[test]
    fn parse_empty_config() {
        let config = parse("");
        assert!(config.app.is_none());
        assert!(config.api_keys.is_none());
        assert!(config.tools.is_none());
    }

    #[test]
    fn api_keys_debug_redacts_values() {
        let config = parse(OFFLINE);
        let debug = format!("{:?}", config.api_keys.unwrap());
        assert!(!debug.contains("sk-ant-test"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn resolve_applies_defaults() {
        let settings = parse(OFFLINE).resolve().unwrap();
        assert_eq!(settings.api.provider(), Provider::Claude);
        assert_eq!(settings.api.model(), &Provider::Claude.default_model());
        assert_eq!(settings.max_rounds_per_turn, DEFAULT_MAX_ROUNDS_PER_TURN);
        assert_eq!(settings.retry.max_retries, 0);
        assert_eq!(settings.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(settings.checkpoint_path.ends_with("checkpoints.db"));
        assert_eq!(settings.tools.report_dir, "report");
    }

    #[test]
    fn provider_is_inferred_from_model() {
        let config = parse(&format!("{OFFLINE}\n[app]\nmodel = \"gpt-5.2\"\n"));
        let settings = config.resolve().unwrap();
        assert_eq!(settings.api.provider(), Provider::OpenAI);
        assert_eq!(settings.api.api_key(), "sk-openai-test");
    }

    #[test]
    fn mismatched_model_is_rejected() {
        let config = parse(&format!(
            "{OFFLINE}\n[app]\nprovider = \"claude\"\nmodel = \"gpt-5.2\"\n"
        ));
        assert!(matches!(
            config.resolve(),
            Err(ConfigurationError::InvalidModel { .. })
        ));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = parse(&format!("{OFFLINE}\n[app]\nprovider = \"mistral\"\n"));
        assert!(matches!(
            config.resolve(),
            Err(ConfigurationError::UnknownProvider(p)) if p == "mistral"
        ));
    }

    #[test]
    fn missing_llm_key_is_a_configuration_error() {
        unsafe {
            std::env::remove_var("OPENAI_API_KEY");
        }
        let config = parse(
            r#"
[app]
provider = "openai"

[api_keys]
openai = "${GATEHOUSE_UNSET_KEY_FOR_TEST}"

[tools.web_search]
enabled = false
"#,
        );
        let err = config.resolve().unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingApiKey { env_var: "OPENAI_API_KEY", .. }));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn enabled_search_without_key_is_a_configuration_error() {
        unsafe {
            std::env::remove_var(gatehouse_tools::config::TAVILY_API_KEY_ENV);
        }
        let config = parse(
            r#"
[api_keys]
anthropic = "sk-ant-test"
"#,
        );
        assert!(matches!(
            config.resolve(),
            Err(ConfigurationError::MissingSearchKey { .. })
        ));
    }

    #[test]
    fn search_key_from_config_is_expanded() {
        unsafe {
            std::env::set_var("GATEHOUSE_TEST_TAVILY", "tvly-from-env");
        }
        let config = parse(
            r#"
[api_keys]
anthropic = "sk-ant-test"

[tools.web_search]
api_key = "${GATEHOUSE_TEST_TAVILY}"
"#,
        );
        let settings = config.resolve().unwrap();
        assert_eq!(settings.tools.web_search.api_key.as_deref(), Some("tvly-from-env"));
        unsafe {
            std::env::remove_var("GATEHOUSE_TEST_TAVILY");
        }
    }

    #[test]
    fn enabled_publish_without_topic_is_a_configuration_error() {
        unsafe {
            std::env::remove_var(publish::TOPIC_ARN_ENV);
        }
        let config = parse(&format!("{OFFLINE}\n[tools.publish]\nenabled = true\n"));
        assert!(matches!(
            config.resolve(),
            Err(ConfigurationError::Publish(PublishConfigError::MissingTopicArn))
        ));
    }

    #[test]
    fn zero_rounds_is_rejected() {
        let config = parse(&format!("{OFFLINE}\n[agent]\nmax_rounds_per_turn = 0\n"));
        assert!(matches!(config.resolve(), Err(ConfigurationError::ZeroRounds)));
    }

    #[test]
    fn agent_section_overrides() {
        let config = parse(&format!(
            r#"{OFFLINE}
[app]
system_prompt = "Be brief."

[agent]
max_rounds_per_turn = 4
llm_max_retries = 3
max_output_tokens = 1024
endpoint = "http://127.0.0.1:9/v1/messages"

[storage]
checkpoint_path = "/tmp/gatehouse-test/cp.db"
"#
        ));
        let settings = config.resolve().unwrap();
        assert_eq!(settings.max_rounds_per_turn, 4);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.api.max_output_tokens(), 1024);
        assert_eq!(settings.api.endpoint(), "http://127.0.0.1:9/v1/messages");
        assert_eq!(settings.system_prompt, "Be brief.");
        assert_eq!(settings.checkpoint_path, PathBuf::from("/tmp/gatehouse-test/cp.db"));
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[app\nmodel = 1").unwrap();
        let err = GatehouseConfig::load_from(path.clone()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }
}
