//! The approval-gated agent loop.
//!
//! [`Agent::start`] appends a user message and drives the loop until the
//! model answers without tools or a tool call needs a human decision. A
//! suspension persists the whole [`RunState`] and returns; nothing is held in
//! memory across it. [`Agent::resume`] reloads the checkpoint (possibly in a
//! different process), applies the decision, and keeps driving.
//!
//! A decided batch is checkpointed before its approved calls run. If the
//! process dies mid-execution, the next `start` or `resume` closes that
//! batch with interrupted-error results instead of running the calls again.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout as tokio_timeout;

use gatehouse_context::CheckpointStore;
use gatehouse_providers::{ModelClient, ModelRequest, ProviderError};
use gatehouse_tools::sandbox::{Sandbox, default_sandbox_deny_patterns};
use gatehouse_tools::{
    ApprovalRequest, ToolError, ToolRegistry, ToolSettings, format_approval, sanitize_output, truncate_output,
    validate_args,
};
use gatehouse_types::{
    ApprovalDecision, AssistantMessage, Message, ModelName, NonEmptyString, RunState, ThreadId, ThreadSummary,
    ToolCall, ToolDefinition, ToolResult,
};

use crate::config::RuntimeSettings;
use crate::locks::{ThreadGuard, ThreadLocks};
use crate::state::{DecidedBatch, LoopInput, LoopState, TransitionError, transition};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Transport(#[from] ProviderError),
    #[error("thread {0} has no tool call awaiting approval")]
    NoPendingApproval(ThreadId),
    #[error("thread {0} is waiting for an approval decision; approve or deny it first")]
    AlreadySuspended(ThreadId),
    #[error("thread {0} already has a run in progress")]
    ThreadBusy(ThreadId),
    #[error("stopped after {0} model calls without a final answer")]
    RoundLimit(u32),
    #[error("checkpoint store failed: {0:#}")]
    Checkpoint(anyhow::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Where a `start` or `resume` call left the thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Suspended; the request describes the call awaiting a decision.
    AwaitingApproval(ApprovalRequest),
    Completed(AssistantMessage),
}

/// Progress notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ModelReplied {
        thread_id: ThreadId,
        message: AssistantMessage,
    },
    ToolStarted {
        thread_id: ThreadId,
        call: ToolCall,
    },
    ToolFinished {
        thread_id: ThreadId,
        result: ToolResult,
    },
    Suspended {
        thread_id: ThreadId,
        tool_name: String,
    },
    Completed {
        thread_id: ThreadId,
    },
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub system_prompt: String,
    pub max_rounds_per_turn: u32,
    pub tools: ToolSettings,
}

impl AgentSettings {
    /// Build agent settings, creating the report directory that bounds
    /// file-writing tools.
    pub fn from_runtime(runtime: &RuntimeSettings) -> Result<Self, ToolError> {
        let sandbox = Sandbox::new(&runtime.tools.report_dir, default_sandbox_deny_patterns())?;
        Ok(Self {
            system_prompt: runtime.system_prompt.clone(),
            max_rounds_per_turn: runtime.max_rounds_per_turn,
            tools: ToolSettings {
                sandbox,
                default_timeout: Duration::from_secs(runtime.tools.timeout_secs),
                max_output_bytes: runtime.tools.max_output_bytes,
            },
        })
    }
}

pub struct Agent {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    definitions: Vec<ToolDefinition>,
    store: Arc<dyn CheckpointStore>,
    settings: AgentSettings,
    locks: ThreadLocks,
    events: Option<mpsc::Sender<AgentEvent>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", self.model.model())
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Agent {
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
        settings: AgentSettings,
    ) -> Self {
        let definitions = registry.definitions();
        Self {
            model,
            registry,
            definitions,
            store,
            settings,
            locks: ThreadLocks::new(),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn model_name(&self) -> &ModelName {
        self.model.model()
    }

    #[must_use]
    pub fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Begin a new turn on `thread_id` with the user's `input`.
    pub async fn start(&self, thread_id: &ThreadId, input: NonEmptyString) -> Result<RunOutcome, AgentError> {
        let _guard = self.lock(thread_id)?;
        let mut run = match self.store.load(thread_id).map_err(AgentError::Checkpoint)? {
            Some(run) => run,
            None => RunState::new(thread_id.clone()),
        };
        self.recover_interrupted(&mut run)?;
        if run.is_suspended() {
            return Err(AgentError::AlreadySuspended(thread_id.clone()));
        }

        tracing::info!(thread = %thread_id, history = run.messages.len(), "Starting run");
        run.messages.push(Message::user(input));
        run.rounds_this_turn = 0;
        self.drive(&mut run, LoopState::InvokingLlm).await
    }

    /// Apply a decision to the call the thread is suspended on.
    pub async fn resume(&self, thread_id: &ThreadId, decision: ApprovalDecision) -> Result<RunOutcome, AgentError> {
        let _guard = self.lock(thread_id)?;
        let Some(mut run) = self.store.load(thread_id).map_err(AgentError::Checkpoint)? else {
            return Err(AgentError::NoPendingApproval(thread_id.clone()));
        };
        if self.recover_interrupted(&mut run)? {
            tracing::warn!(
                thread = %thread_id,
                decision = %decision,
                "No call awaits a decision; continuing the interrupted run"
            );
            return self.drive(&mut run, LoopState::InvokingLlm).await;
        }
        let Some(batch) = run.pending.take() else {
            return Err(AgentError::NoPendingApproval(thread_id.clone()));
        };

        if let Some(call) = batch.current() {
            tracing::info!(
                thread = %thread_id,
                tool = %call.name,
                tool_call_id = %call.id,
                decision = %decision,
                "Applying approval decision"
            );
        }
        let state = transition(LoopState::AwaitingApproval(batch), LoopInput::Decision(decision))?;
        self.drive(&mut run, state).await
    }

    pub fn load(&self, thread_id: &ThreadId) -> Result<Option<RunState>, AgentError> {
        self.store.load(thread_id).map_err(AgentError::Checkpoint)
    }

    /// The approval request a suspended thread is waiting on.
    pub fn pending_request(&self, thread_id: &ThreadId) -> Result<Option<ApprovalRequest>, AgentError> {
        Ok(self
            .load(thread_id)?
            .and_then(|run| run.pending)
            .and_then(|batch| batch.current().map(format_approval)))
    }

    pub fn list_suspended(&self) -> Result<Vec<ThreadSummary>, AgentError> {
        self.store.list_suspended().map_err(AgentError::Checkpoint)
    }

    /// Forget a thread. Refused while a run on it is in progress.
    pub fn delete(&self, thread_id: &ThreadId) -> Result<(), AgentError> {
        let _guard = self.lock(thread_id)?;
        tracing::info!(thread = %thread_id, "Deleting thread");
        self.store.delete(thread_id).map_err(AgentError::Checkpoint)
    }

    fn lock(&self, thread_id: &ThreadId) -> Result<ThreadGuard, AgentError> {
        self.locks
            .try_acquire(thread_id)
            .ok_or_else(|| AgentError::ThreadBusy(thread_id.clone()))
    }

    async fn drive(&self, run: &mut RunState, mut state: LoopState) -> Result<RunOutcome, AgentError> {
        loop {
            tracing::debug!(thread = %run.thread_id, state = state.name(), "Loop state");
            state = match state {
                LoopState::InvokingLlm => {
                    let reply = self.invoke_model(run).await?;
                    transition(LoopState::InvokingLlm, LoopInput::ModelReplied(reply))?
                }
                LoopState::AwaitingApproval(batch) => {
                    let request = batch.current().map(format_approval);
                    match request {
                        Some(request) => {
                            let tool_name = request.tool_name.clone();
                            run.pending = Some(batch);
                            self.checkpoint(run)?;
                            tracing::info!(thread = %run.thread_id, tool = %tool_name, "Suspended for approval");
                            self.emit(AgentEvent::Suspended {
                                thread_id: run.thread_id.clone(),
                                tool_name,
                            });
                            return Ok(RunOutcome::AwaitingApproval(request));
                        }
                        None => LoopState::ExecutingTools(DecidedBatch::from_pending(batch)),
                    }
                }
                LoopState::ExecutingTools(decided) => {
                    run.pending = Some(decided.as_pending().clone());
                    self.checkpoint(run)?;
                    let results = self.execute_batch(&run.thread_id, &decided).await;
                    run.messages.extend(results.into_iter().map(Message::ToolResult));
                    run.pending = None;
                    self.checkpoint(run)?;
                    transition(LoopState::ExecutingTools(decided), LoopInput::ResultsMerged)?
                }
                LoopState::Done(reply) => {
                    run.pending = None;
                    self.checkpoint(run)?;
                    tracing::info!(thread = %run.thread_id, rounds = run.rounds_this_turn, "Run completed");
                    self.emit(AgentEvent::Completed {
                        thread_id: run.thread_id.clone(),
                    });
                    return Ok(RunOutcome::Completed(reply));
                }
            };
        }
    }

    /// Close a batch that was executing when the last process stopped.
    ///
    /// Approved calls are not run again: whether they took effect is
    /// unknown, so each gets an error result saying so. Returns whether a
    /// batch was closed.
    fn recover_interrupted(&self, run: &mut RunState) -> Result<bool, AgentError> {
        let Some(batch) = run.pending.take_if(|batch| batch.is_fully_decided()) else {
            return Ok(false);
        };
        tracing::warn!(
            thread = %run.thread_id,
            calls = batch.calls().len(),
            approved = batch.approved().len(),
            "Closing tool batch interrupted during execution"
        );
        run.messages
            .extend(batch.interrupted_results().into_iter().map(Message::ToolResult));
        self.checkpoint(run)?;
        Ok(true)
    }

    async fn invoke_model(&self, run: &mut RunState) -> Result<AssistantMessage, AgentError> {
        let limit = self.settings.max_rounds_per_turn;
        if run.rounds_this_turn >= limit {
            tracing::warn!(thread = %run.thread_id, limit, "Round limit reached");
            return Err(AgentError::RoundLimit(limit));
        }
        run.rounds_this_turn += 1;

        let request = ModelRequest {
            system_prompt: &self.settings.system_prompt,
            messages: &run.messages,
            tools: &self.definitions,
        };
        let reply = match self.model.invoke(request).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(thread = %run.thread_id, "Model invocation failed: {}", gatehouse_utils::redact(&err.to_string()));
                return Err(err.into());
            }
        };

        tracing::debug!(
            thread = %run.thread_id,
            round = run.rounds_this_turn,
            tool_calls = reply.tool_calls().len(),
            "Model replied"
        );
        run.messages.push(Message::Assistant(reply.clone()));
        self.emit(AgentEvent::ModelReplied {
            thread_id: run.thread_id.clone(),
            message: reply.clone(),
        });
        Ok(reply)
    }

    /// Run the approved calls concurrently and return one result per call of
    /// the batch, in the order the model issued them.
    async fn execute_batch(&self, thread_id: &ThreadId, decided: &DecidedBatch) -> Vec<ToolResult> {
        let executed = join_all(decided.approved().iter().map(|call| self.run_tool(thread_id, call))).await;

        let mut pool: Vec<ToolResult> = executed.into_iter().chain(decided.refusals().iter().cloned()).collect();
        decided
            .calls()
            .iter()
            .map(|call| match pool.iter().position(|r| r.tool_call_id == call.id) {
                Some(idx) => pool.remove(idx),
                None => ToolResult::error(&call.id, &call.name, "Tool call produced no result"),
            })
            .collect()
    }

    async fn run_tool(&self, thread_id: &ThreadId, call: &ToolCall) -> ToolResult {
        self.emit(AgentEvent::ToolStarted {
            thread_id: thread_id.clone(),
            call: call.clone(),
        });
        let result = self.execute_call(call).await;
        tracing::info!(
            tool = %call.name,
            tool_call_id = %call.id,
            is_error = result.is_error,
            "Tool call finished"
        );
        self.emit(AgentEvent::ToolFinished {
            thread_id: thread_id.clone(),
            result: result.clone(),
        });
        result
    }

    async fn execute_call(&self, call: &ToolCall) -> ToolResult {
        let exec = match self.registry.lookup(&call.name) {
            Ok(exec) => exec,
            Err(err) => return tool_error_result(call, &err),
        };
        if let Err(err) = validate_args(&exec.schema(), &call.arguments) {
            return tool_error_result(call, &err);
        }

        let mut ctx = self.settings.tools.ctx_for(&call.id);
        let timeout = exec.timeout().unwrap_or(ctx.default_timeout);
        let max_output_bytes = ctx.max_output_bytes;
        let exec_future = exec.execute(call.arguments.clone(), &mut ctx);
        let exec_future = AssertUnwindSafe(exec_future).catch_unwind();

        match tokio_timeout(timeout, exec_future).await {
            Err(_) => tool_error_result(
                call,
                &ToolError::Timeout {
                    tool: call.name.clone(),
                    elapsed: timeout,
                },
            ),
            Ok(Err(panic_payload)) => {
                let message = format!("Tool panicked: {}", panic_payload_to_string(&panic_payload));
                ToolResult::error(&call.id, &call.name, sanitize_output(&message))
            }
            Ok(Ok(Ok(output))) => ToolResult::success(
                &call.id,
                &call.name,
                truncate_output(sanitize_output(&output), max_output_bytes),
            ),
            Ok(Ok(Err(err))) => tool_error_result(call, &err),
        }
    }

    fn checkpoint(&self, run: &mut RunState) -> Result<(), AgentError> {
        run.touch();
        self.store.save(run).map_err(AgentError::Checkpoint)
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events
            && let Err(err) = tx.try_send(event)
        {
            tracing::debug!("Dropped agent event: {err}");
        }
    }
}

fn tool_error_result(call: &ToolCall, err: &ToolError) -> ToolResult {
    ToolResult::error(&call.id, &call.name, sanitize_output(&err.to_string()))
}

fn panic_payload_to_string(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
