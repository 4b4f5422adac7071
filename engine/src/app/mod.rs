//! Presentation state for one terminal session.
//!
//! `App` never blocks: runs execute on spawned tasks, and [`App::tick`]
//! drains agent events and collects finished runs once per frame.

mod transcript;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gatehouse_tools::ApprovalRequest;
use gatehouse_types::{ApprovalDecision, ModelName, NonEmptyString, ThreadId, ThreadSummary};
use gatehouse_utils::redact;

pub use transcript::{TranscriptEntry, from_history, summarize_args};

use crate::agent::{Agent, AgentError, AgentEvent, RunOutcome};

const SPINNER_INTERVAL: Duration = Duration::from_millis(100);

type RunHandle = JoinHandle<Result<RunOutcome, AgentError>>;

/// What the session is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    AwaitingApproval(ApprovalRequest),
}

pub struct App {
    agent: Arc<Agent>,
    events: mpsc::Receiver<AgentEvent>,
    thread_id: ThreadId,
    transcript: Vec<TranscriptEntry>,
    input: String,
    phase: Phase,
    task: Option<RunHandle>,
    status: Option<String>,
    should_quit: bool,
    spinner: usize,
    last_spinner_tick: Instant,
}

impl App {
    /// Open `thread_id`, restoring its transcript and any pending approval.
    pub fn new(agent: Arc<Agent>, events: mpsc::Receiver<AgentEvent>, thread_id: ThreadId) -> Result<Self, AgentError> {
        let mut app = Self {
            agent,
            events,
            thread_id: thread_id.clone(),
            transcript: Vec::new(),
            input: String::new(),
            phase: Phase::Idle,
            task: None,
            status: None,
            should_quit: false,
            spinner: 0,
            last_spinner_tick: Instant::now(),
        };
        app.open_thread(thread_id)?;
        Ok(app)
    }

    #[must_use]
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    #[must_use]
    pub fn model_name(&self) -> &ModelName {
        self.agent.model_name()
    }

    #[must_use]
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    #[must_use]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    #[must_use]
    pub fn pending_approval(&self) -> Option<&ApprovalRequest> {
        match &self.phase {
            Phase::AwaitingApproval(request) => Some(request),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running)
    }

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    #[must_use]
    pub fn spinner_frame(&self) -> usize {
        self.spinner
    }

    pub fn request_quit(&mut self) {
        self.should_quit = true;
    }

    pub fn insert_char(&mut self, c: char) {
        if !c.is_control() {
            self.input.push(c);
        }
    }

    pub fn backspace(&mut self) {
        self.input.pop();
    }

    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// Suspended threads other than the open one, newest first.
    pub fn other_suspended_threads(&self) -> Result<Vec<ThreadSummary>, AgentError> {
        Ok(self
            .agent
            .list_suspended()?
            .into_iter()
            .filter(|s| s.thread_id != self.thread_id)
            .collect())
    }

    /// Switch the session to `thread_id`. Refused while a run is active.
    pub fn open_thread(&mut self, thread_id: ThreadId) -> Result<(), AgentError> {
        if self.task.is_some() {
            self.status = Some("Wait for the current run to finish".to_string());
            return Ok(());
        }
        let run = self.agent.load(&thread_id)?;
        self.transcript = run.as_ref().map(|r| from_history(&r.messages)).unwrap_or_default();
        self.thread_id = thread_id;
        self.refresh_phase()?;
        self.status = Some(match (&run, &self.phase) {
            (None, _) => format!("New thread {}", self.thread_id.short()),
            (Some(_), Phase::AwaitingApproval(_)) => {
                format!("Resumed thread {}: approval pending", self.thread_id.short())
            }
            (Some(_), _) => format!("Opened thread {}", self.thread_id.short()),
        });
        Ok(())
    }

    /// Start a fresh thread. The previous one stays in the checkpoint store.
    pub fn new_thread(&mut self) -> Result<(), AgentError> {
        self.open_thread(ThreadId::generate())
    }

    /// Send the input line as a new turn.
    pub fn submit(&mut self) {
        match &self.phase {
            Phase::Running => {
                self.status = Some("A run is already in progress".to_string());
                return;
            }
            Phase::AwaitingApproval(_) => {
                self.status = Some("Approve (a) or deny (d) the pending tool call first".to_string());
                return;
            }
            Phase::Idle => {}
        }
        let Ok(text) = NonEmptyString::new(self.input.trim()) else {
            return;
        };
        self.input.clear();
        self.transcript.push(TranscriptEntry::User(text.as_str().to_string()));

        let agent = Arc::clone(&self.agent);
        let thread_id = self.thread_id.clone();
        self.spawn(async move { agent.start(&thread_id, text).await });
    }

    /// Answer the pending approval card.
    pub fn decide(&mut self, decision: ApprovalDecision) {
        let Phase::AwaitingApproval(request) = &self.phase else {
            return;
        };
        self.transcript.push(TranscriptEntry::Notice(format!(
            "{} {}",
            match decision {
                ApprovalDecision::Approve => "Approved",
                ApprovalDecision::Deny => "Denied",
            },
            request.tool_name
        )));

        let agent = Arc::clone(&self.agent);
        let thread_id = self.thread_id.clone();
        self.spawn(async move { agent.resume(&thread_id, decision).await });
    }

    fn spawn<F>(&mut self, run: F)
    where
        F: Future<Output = Result<RunOutcome, AgentError>> + Send + 'static,
    {
        self.phase = Phase::Running;
        self.status = None;
        self.task = Some(tokio::spawn(run));
    }

    pub fn tick(&mut self) {
        self.poll_events();
        self.poll_run();

        let now = Instant::now();
        if now.duration_since(self.last_spinner_tick) >= SPINNER_INTERVAL {
            self.last_spinner_tick = now;
            self.spinner = self.spinner.wrapping_add(1);
        }
    }

    fn poll_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::ModelReplied { thread_id, message } if thread_id == self.thread_id => {
                self.transcript.extend(transcript::assistant_entries(&message));
            }
            AgentEvent::ToolStarted { thread_id, call } if thread_id == self.thread_id => {
                self.status = Some(format!("Running {}", call.name));
            }
            AgentEvent::ToolFinished { thread_id, result } if thread_id == self.thread_id => {
                self.transcript.push(transcript::result_entry(&result));
            }
            _ => {}
        }
    }

    fn poll_run(&mut self) {
        let Some(handle) = self.task.as_mut() else {
            return;
        };
        if !handle.is_finished() {
            return;
        }
        // is_finished() can be true a moment before the output is ready.
        let Some(result) = handle.now_or_never() else {
            return;
        };
        self.task = None;
        // Events produced just before completion belong before the outcome.
        self.poll_events();

        match result {
            Ok(Ok(RunOutcome::AwaitingApproval(request))) => {
                self.reconcile_transcript();
                self.status = Some(format!("Approval needed: {}", request.tool_name));
                self.phase = Phase::AwaitingApproval(request);
            }
            Ok(Ok(RunOutcome::Completed(message))) => {
                self.reconcile_transcript();
                let text = message.content().trim();
                let shown = matches!(
                    self.transcript.last(),
                    Some(TranscriptEntry::Assistant(last)) if last == text
                );
                if !shown && !text.is_empty() {
                    self.transcript.extend(transcript::assistant_entries(&message));
                }
                if text.is_empty() {
                    self.transcript.push(TranscriptEntry::Notice("(model returned no text)".to_string()));
                }
                self.phase = Phase::Idle;
            }
            Ok(Err(err)) => {
                tracing::warn!(thread = %self.thread_id, "Run failed: {}", redact(&err.to_string()));
                self.transcript.push(TranscriptEntry::Error(redact(&err.to_string())));
                self.restore_phase_after_failure();
            }
            Err(join_err) => {
                tracing::error!(thread = %self.thread_id, "Run task failed: {join_err}");
                self.transcript.push(TranscriptEntry::Error(format!("Run task failed: {join_err}")));
                self.restore_phase_after_failure();
            }
        }
    }

    /// Events are best-effort; the checkpoint is not. Rebuild the transcript
    /// from stored history when the events left it behind.
    fn reconcile_transcript(&mut self) {
        let run = match self.agent.load(&self.thread_id) {
            Ok(Some(run)) => run,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(thread = %self.thread_id, "Could not reload history: {}", redact(&err.to_string()));
                return;
            }
        };
        let stored = from_history(&run.messages);
        let shown: Vec<&TranscriptEntry> = self
            .transcript
            .iter()
            .filter(|entry| !matches!(entry, TranscriptEntry::Notice(_) | TranscriptEntry::Error(_)))
            .collect();
        if shown.len() != stored.len() || shown.iter().zip(&stored).any(|(a, b)| *a != b) {
            tracing::debug!(
                thread = %self.thread_id,
                shown = shown.len(),
                stored = stored.len(),
                "Transcript missed events; rebuilding from history"
            );
            self.transcript = stored;
        }
    }

    fn restore_phase_after_failure(&mut self) {
        if let Err(err) = self.refresh_phase() {
            self.transcript.push(TranscriptEntry::Error(redact(&err.to_string())));
            self.phase = Phase::Idle;
        }
    }

    /// Derive the phase from the stored checkpoint.
    fn refresh_phase(&mut self) -> Result<(), AgentError> {
        self.phase = match self.agent.pending_request(&self.thread_id)? {
            Some(request) => Phase::AwaitingApproval(request),
            None => Phase::Idle,
        };
        Ok(())
    }
}
