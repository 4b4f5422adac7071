//! Loop controller state machine.
//!
//! ```text
//! InvokingLlm ──reply w/o calls──▶ Done
//!      │                            ▲
//!  reply w/ calls                   │
//!      ▼                            │
//! AwaitingApproval ◀─decision─┐     │
//!      │ (all decided)        │     │
//!      ▼                      │     │
//! ExecutingTools ──merged──▶ InvokingLlm
//! ```
//!
//! [`transition`] is pure. The agent performs the I/O each state calls for
//! and feeds the outcome back in as a [`LoopInput`].

use gatehouse_types::{ApprovalDecision, AssistantMessage, PendingBatch, ToolCall, ToolResult};
use thiserror::Error;

/// A batch whose every call has been approved or denied.
#[derive(Debug, Clone, PartialEq)]
pub struct DecidedBatch {
    batch: PendingBatch,
}

impl DecidedBatch {
    /// Close out a pending batch. Calls that never received a decision are
    /// treated as denied so every call still gets exactly one result.
    #[must_use]
    pub fn from_pending(mut batch: PendingBatch) -> Self {
        while batch.decide(ApprovalDecision::Deny) {}
        Self { batch }
    }

    /// Every call of the batch in the order the model issued them.
    #[must_use]
    pub fn calls(&self) -> &[ToolCall] {
        self.batch.calls()
    }

    #[must_use]
    pub fn approved(&self) -> &[ToolCall] {
        self.batch.approved()
    }

    #[must_use]
    pub fn refusals(&self) -> &[ToolResult] {
        self.batch.denied()
    }

    /// The fully decided batch, as checkpointed while it executes.
    #[must_use]
    pub fn as_pending(&self) -> &PendingBatch {
        &self.batch
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<ToolCall>, Vec<ToolCall>, Vec<ToolResult>) {
        self.batch.into_parts()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    InvokingLlm,
    /// Suspended on the batch's current call.
    AwaitingApproval(PendingBatch),
    ExecutingTools(DecidedBatch),
    /// Terminal: the model answered without requesting tools.
    Done(AssistantMessage),
}

impl LoopState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvokingLlm => "INVOKING_LLM",
            Self::AwaitingApproval(_) => "AWAITING_APPROVAL",
            Self::ExecutingTools(_) => "EXECUTING_TOOLS",
            Self::Done(_) => "DONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopInput {
    ModelReplied(AssistantMessage),
    Decision(ApprovalDecision),
    /// Every result of the executing batch is in history.
    ResultsMerged,
}

impl LoopInput {
    const fn name(&self) -> &'static str {
        match self {
            Self::ModelReplied(_) => "model reply",
            Self::Decision(_) => "approval decision",
            Self::ResultsMerged => "merged results",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid loop transition: {input} while {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub input: &'static str,
}

pub fn transition(state: LoopState, input: LoopInput) -> Result<LoopState, TransitionError> {
    match (state, input) {
        (LoopState::InvokingLlm, LoopInput::ModelReplied(reply)) => {
            match PendingBatch::new(reply.tool_calls().to_vec()) {
                Some(batch) => Ok(LoopState::AwaitingApproval(batch)),
                None => Ok(LoopState::Done(reply)),
            }
        }
        (LoopState::AwaitingApproval(mut batch), LoopInput::Decision(decision)) => {
            batch.decide(decision);
            if batch.is_fully_decided() {
                Ok(LoopState::ExecutingTools(DecidedBatch::from_pending(batch)))
            } else {
                Ok(LoopState::AwaitingApproval(batch))
            }
        }
        (LoopState::ExecutingTools(_), LoopInput::ResultsMerged) => Ok(LoopState::InvokingLlm),
        (state, input) => Err(TransitionError {
            state: state.name(),
            input: input.name(),
        }),
    }
}
