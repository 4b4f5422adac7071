//! Core engine for Gatehouse: the approval-gated agent loop and orchestration.
//!
//! This crate contains the loop controller, configuration, and the `App`
//! presentation state without TUI dependencies.

mod agent;
mod app;
mod config;
mod locks;
mod state;

pub use agent::{Agent, AgentError, AgentEvent, AgentSettings, RunOutcome};
pub use app::{App, Phase, TranscriptEntry, from_history, summarize_args};
pub use config::{
    AgentConfig, ApiKeys, AppConfig, CONFIG_PATH_ENV, ConfigError, ConfigurationError, DEFAULT_SYSTEM_PROMPT,
    GatehouseConfig, RuntimeSettings, StorageConfig, config_path, expand_env_vars, gatehouse_dir, log_dir,
};
pub use locks::{ThreadGuard, ThreadLocks};
pub use state::{DecidedBatch, LoopInput, LoopState, TransitionError, transition};

// Re-export from crates for public API
pub use gatehouse_context::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use gatehouse_providers::{self, ApiConfig, HttpModelClient, ModelClient};
pub use gatehouse_tools::{self, ApprovalRequest, ApprovalSection, ToolRegistry};
pub use gatehouse_types::{ApprovalDecision, Message, ModelName, NonEmptyString, Provider, ThreadId, ThreadSummary};
