//! LLM provider clients behind a single [`ModelClient`] seam.
//!
//! # Architecture
//!
//! - [`ModelClient`] - one call in, one complete [`AssistantMessage`] out
//! - [`HttpModelClient`] - dispatches on the configured provider:
//!   - `claude` - Anthropic Messages API (`tool_use` / `tool_result` blocks)
//!   - `openai` - OpenAI Responses API (`function_call` / `function_call_output` items)
//!
//! Requests are non-streaming. The agent loop needs the whole reply (text and
//! every tool call) before it can decide whether to suspend for approval.
//!
//! # Configuration
//!
//! [`ApiConfig`] bundles the key and model. The constructor rejects a key and
//! model that belong to different providers.
//!
//! # Errors
//!
//! Every failure is a [`ProviderError`]. Retries follow [`retry::RetryConfig`];
//! the engine passes `max_retries = 0` unless configured otherwise.

pub mod retry;
pub mod sse;

mod claude;
mod openai;

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use gatehouse_types::{
    ApiKey, AssistantMessage, Message, ModelName, Provider, ToolDefinition,
};
use thiserror::Error;

pub use gatehouse_types;

/// Canonical Anthropic Messages API endpoint.
pub const CLAUDE_MESSAGES_API_URL: &str = "https://api.anthropic.com/v1/messages";
/// Canonical OpenAI Responses API endpoint.
pub const OPENAI_RESPONSES_API_URL: &str = "https://api.openai.com/v1/responses";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

// Note: reqwest only exposes tcp_keepalive (idle time); interval/retries use platform defaults.
const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_MAX_IDLE_PER_HOST: usize = 32;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTP client for every outbound call (LLM, search, MCP, SNS).
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("Failed to build hardened HTTP client: {e}. Using defaults.");
            reqwest::Client::new()
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .user_agent(concat!("gatehouse/", env!("CARGO_PKG_VERSION")))
}

/// Read at most 32 KiB of an error body.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Transport-level failure talking to an LLM provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Decode(String),
}

/// Unwrap a successful response or convert the failure into a [`ProviderError`].
pub async fn expect_success(outcome: retry::RetryOutcome) -> Result<reqwest::Response, ProviderError> {
    match outcome {
        retry::RetryOutcome::Success(resp) => Ok(resp),
        retry::RetryOutcome::HttpError(resp) => {
            let status = resp.status().as_u16();
            let body = read_capped_error_body(resp).await;
            Err(ProviderError::Http { status, body })
        }
        retry::RetryOutcome::ConnectionError { attempts, source } => Err(ProviderError::Connection {
            attempts,
            message: source.to_string(),
        }),
        retry::RetryOutcome::NonRetryable(source) => Err(ProviderError::Connection {
            attempts: 1,
            message: source.to_string(),
        }),
    }
}

/// Provider + model configuration.
///
/// The constructor enforces that the API key and model belong to the same provider.
///
/// ```rust
/// use gatehouse_providers::ApiConfig;
/// use gatehouse_types::{ApiKey, Provider};
///
/// let config = ApiConfig::new(
///     ApiKey::new(Provider::OpenAI, "test"),
///     Provider::OpenAI.default_model(),
/// )
/// .unwrap()
/// .with_max_output_tokens(2048);
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct ApiConfig {
    api_key: ApiKey,
    model: ModelName,
    max_output_tokens: u32,
    request_timeout: Duration,
    endpoint: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiConfigError {
    #[error("API key provider {key:?} does not match model provider {model:?}")]
    ProviderMismatch { key: Provider, model: Provider },
}

impl ApiConfig {
    pub fn new(api_key: ApiKey, model: ModelName) -> Result<Self, ApiConfigError> {
        let key_provider = api_key.provider();
        let model_provider = model.provider();
        if key_provider != model_provider {
            return Err(ApiConfigError::ProviderMismatch {
                key: key_provider,
                model: model_provider,
            });
        }

        Ok(Self {
            api_key,
            model,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            endpoint: None,
        })
    }

    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens.max(1);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the API endpoint (proxies, local gateways, tests).
    #[must_use]
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.api_key.provider()
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    #[must_use]
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    #[must_use]
    pub const fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(match self.provider() {
            Provider::Claude => CLAUDE_MESSAGES_API_URL,
            Provider::OpenAI => OPENAI_RESPONSES_API_URL,
        })
    }
}

/// Everything one LLM invocation sees.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
}

pub type ModelFut<'a> =
    Pin<Box<dyn Future<Output = Result<AssistantMessage, ProviderError>> + Send + 'a>>;

/// The LLM invocation seam used by the agent loop.
pub trait ModelClient: Send + Sync {
    fn model(&self) -> &ModelName;

    fn invoke<'a>(&'a self, request: ModelRequest<'a>) -> ModelFut<'a>;
}

/// [`ModelClient`] over HTTP, dispatching on the configured provider.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    config: ApiConfig,
    retry: retry::RetryConfig,
}

impl HttpModelClient {
    #[must_use]
    pub fn new(config: ApiConfig, retry: retry::RetryConfig) -> Self {
        Self { config, retry }
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }
}

impl ModelClient for HttpModelClient {
    fn model(&self) -> &ModelName {
        self.config.model()
    }

    fn invoke<'a>(&'a self, request: ModelRequest<'a>) -> ModelFut<'a> {
        Box::pin(async move {
            tracing::debug!(
                provider = self.config.provider().as_str(),
                model = %self.config.model(),
                messages = request.messages.len(),
                tools = request.tools.len(),
                "Invoking model"
            );
            match self.config.provider() {
                Provider::Claude => claude::send_message(&self.config, &self.retry, request).await,
                Provider::OpenAI => openai::send_message(&self.config, &self.retry, request).await,
            }
        })
    }
}

/// POST `body` with retries and decode the JSON reply.
async fn post_json<F>(
    build_request: F,
    retry_config: &retry::RetryConfig,
) -> Result<serde_json::Value, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let outcome = retry::send_with_retry(build_request, retry_config).await;
    let response = expect_success(outcome).await?;
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}
