//! Durable per-thread run state.
//!
//! A [`RunState`] is the unit persisted by the checkpoint store. When it
//! carries a [`PendingBatch`] with a call still awaiting a decision, the
//! thread is suspended on a human. A fully decided batch is stored just
//! before its approved calls run; finding one on load means execution was
//! cut short.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{ApprovalDecision, Message, ThreadId, ToolCall, ToolResult};

/// Synthetic tool output for a call the human refused.
pub const REFUSAL_TEXT: &str =
    "Tool use was denied by the user. Do not retry this tool; finish the task without it.";

/// Synthetic tool output for an approved call whose execution was cut short.
pub const INTERRUPTED_TEXT: &str = "Tool execution was interrupted before its result was recorded. \
     It may or may not have taken effect; check before retrying.";

/// Tool calls from one assistant message, decided one at a time.
///
/// `calls[cursor]` is awaiting a decision. Decided calls are split into
/// `approved` (to execute) and `denied` (refusal results already built).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatch {
    calls: Vec<ToolCall>,
    cursor: usize,
    approved: Vec<ToolCall>,
    denied: Vec<ToolResult>,
}

impl PendingBatch {
    /// Returns `None` for an empty batch; there is nothing to approve.
    #[must_use]
    pub fn new(calls: Vec<ToolCall>) -> Option<Self> {
        if calls.is_empty() {
            return None;
        }
        Some(Self {
            calls,
            cursor: 0,
            approved: Vec::new(),
            denied: Vec::new(),
        })
    }

    /// The call awaiting a decision, or `None` once every call is decided.
    #[must_use]
    pub fn current(&self) -> Option<&ToolCall> {
        self.calls.get(self.cursor)
    }

    /// Apply a decision to the current call and advance.
    ///
    /// Returns `false` if the batch was already fully decided.
    pub fn decide(&mut self, decision: ApprovalDecision) -> bool {
        let Some(call) = self.calls.get(self.cursor) else {
            return false;
        };
        match decision {
            ApprovalDecision::Approve => self.approved.push(call.clone()),
            ApprovalDecision::Deny => self.denied.push(ToolResult::error(
                call.id.clone(),
                call.name.clone(),
                REFUSAL_TEXT,
            )),
        }
        self.cursor += 1;
        true
    }

    #[must_use]
    pub fn is_fully_decided(&self) -> bool {
        self.cursor >= self.calls.len()
    }

    #[must_use]
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    #[must_use]
    pub fn approved(&self) -> &[ToolCall] {
        &self.approved
    }

    #[must_use]
    pub fn denied(&self) -> &[ToolResult] {
        &self.denied
    }

    /// Position of the current call, 1-based, and the batch size.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        ((self.cursor + 1).min(self.calls.len()), self.calls.len())
    }

    /// One result per call, in call order, for a batch whose execution was
    /// cut short. Refusals are kept; every other call is reported as
    /// interrupted rather than re-run.
    #[must_use]
    pub fn interrupted_results(&self) -> Vec<ToolResult> {
        self.calls
            .iter()
            .map(|call| {
                self.denied
                    .iter()
                    .find(|refusal| refusal.tool_call_id == call.id)
                    .cloned()
                    .unwrap_or_else(|| ToolResult::error(call.id.clone(), call.name.clone(), INTERRUPTED_TEXT))
            })
            .collect()
    }

    /// Consume the batch, yielding the original calls, the approved calls,
    /// and the refusals.
    #[must_use]
    pub fn into_parts(self) -> (Vec<ToolCall>, Vec<ToolCall>, Vec<ToolResult>) {
        (self.calls, self.approved, self.denied)
    }
}

/// Everything needed to continue a thread in a fresh process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub thread_id: ThreadId,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub pending: Option<PendingBatch>,
    #[serde(default)]
    pub rounds_this_turn: u32,
    pub updated_at: SystemTime,
}

impl RunState {
    #[must_use]
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            messages: Vec::new(),
            pending: None,
            rounds_this_turn: 0,
            updated_at: SystemTime::now(),
        }
    }

    /// Waiting on a human decision.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.pending.as_ref().is_some_and(|batch| !batch.is_fully_decided())
    }

    /// A decided batch was executing when the last process stopped.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.pending.as_ref().is_some_and(PendingBatch::is_fully_decided)
    }

    pub fn touch(&mut self) {
        self.updated_at = SystemTime::now();
    }

    /// Tool calls in history that have no matching tool result.
    ///
    /// Outside a suspended batch this is always empty.
    #[must_use]
    pub fn unanswered_calls(&self) -> Vec<&ToolCall> {
        let mut open: Vec<&ToolCall> = Vec::new();
        for msg in &self.messages {
            match msg {
                Message::Assistant(a) => open.extend(a.tool_calls()),
                Message::ToolResult(r) => open.retain(|c| c.id != r.tool_call_id),
                Message::User(_) => {}
            }
        }
        open
    }

    /// First line of the most recent user message, for listings.
    #[must_use]
    pub fn preview(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::User(u) => u.content().lines().next(),
            _ => None,
        })
    }
}

/// Listing entry for a thread that is waiting on a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub pending_tool: Option<String>,
    pub preview: Option<String>,
    pub updated_at: SystemTime,
}

impl From<&RunState> for ThreadSummary {
    fn from(state: &RunState) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            pending_tool: state
                .pending
                .as_ref()
                .and_then(PendingBatch::current)
                .map(|c| c.name.clone()),
            preview: state.preview().map(str::to_string),
            updated_at: state.updated_at,
        }
    }
}
