//! Gatehouse CLI - binary entry point and terminal session management.
//!
//! # Architecture
//!
//! The CLI wires [`gatehouse_engine`] (agent loop and presentation state) to
//! [`gatehouse_tui`] (rendering), and owns the terminal through an RAII guard.
//!
//! ```text
//! main() -> config resolve -> Agent -> App(thread) -> TerminalSession -> run_app()
//! ```
//!
//! # Event Loop
//!
//! A fixed 8ms render cadence:
//!
//! 1. Wait for frame tick
//! 2. Drain input queue (non-blocking via [`gatehouse_tui::InputPump`])
//! 3. Advance application state (`app.tick()`): agent events, run completion
//! 4. Render frame

mod crash_hardening;

use anyhow::{Context, Result, bail};
use crossterm::{
    event::{DisableBracketedPaste, EnableBracketedPaste},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::{Backend, CrosstermBackend},
};
use std::{
    env,
    fs::{self, OpenOptions},
    io::{Stdout, Write, stdout},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gatehouse_engine::gatehouse_tools::{builtins::register_builtins, mcp::connect_and_register};
use gatehouse_engine::{
    Agent, AgentSettings, App, GatehouseConfig, HttpModelClient, SqliteCheckpointStore, ThreadId, ToolRegistry,
    log_dir,
};
use gatehouse_tui::{InputPump, UiOptions, draw, handle_events};

const EVENT_CHANNEL_CAPACITY: usize = 256;

const USAGE: &str = "\
Usage: gatehouse [OPTIONS]

Options:
  --thread <ID>   Open (and resume) the given thread
  --new           Start a fresh thread even if one is awaiting approval
  --list          List threads awaiting approval and exit
  -h, --help      Show this help
";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than write over the TUI.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!("Failed to create log dir {}: {e}", parent.display()));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!("Failed to open log file {}: {e}", candidate.display()));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    vec![
        log_dir().join("gatehouse.log"),
        PathBuf::from(".gatehouse").join("logs").join("gatehouse.log"),
    ]
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    thread: Option<String>,
    new_thread: bool,
    list: bool,
    help: bool,
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--thread" => {
                    let Some(id) = args.next() else {
                        bail!("--thread requires a thread id");
                    };
                    parsed.thread = Some(id);
                }
                "--new" => parsed.new_thread = true,
                "--list" => parsed.list = true,
                "-h" | "--help" => parsed.help = true,
                other => {
                    if let Some(id) = other.strip_prefix("--thread=") {
                        parsed.thread = Some(id.to_string());
                    } else {
                        bail!("unknown argument: {other}");
                    }
                }
            }
        }
        if parsed.thread.is_some() && parsed.new_thread {
            bail!("--thread and --new cannot be combined");
        }
        Ok(parsed)
    }
}

/// RAII wrapper for terminal state with guaranteed cleanup on drop.
///
/// Enables raw mode, bracketed paste, and the alternate screen (with
/// alternate scroll mode 1007 so the wheel maps to arrow keys without mouse
/// capture). Everything is restored on drop, including after a panic.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn new() -> Result<Self> {
        enable_raw_mode()?;

        let mut out = stdout();
        if let Err(err) = execute!(out, EnableBracketedPaste, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            let _ = execute!(out, LeaveAlternateScreen, DisableBracketedPaste);
            return Err(err.into());
        }
        // CSI ? 1007 h
        let _ = out.write_all(b"\x1b[?1007h");
        let _ = out.flush();

        match Terminal::new(CrosstermBackend::new(out)) {
            Ok(terminal) => Ok(Self { terminal }),
            Err(err) => {
                restore_terminal(&mut stdout());
                Err(err.into())
            }
        }
    }
}

fn restore_terminal(out: &mut impl Write) {
    let _ = disable_raw_mode();
    // CSI ? 1007 l
    let _ = out.write_all(b"\x1b[?1007l");
    let _ = out.flush();
    let _ = execute!(out, LeaveAlternateScreen, DisableBracketedPaste);
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        restore_terminal(self.terminal.backend_mut());
        let _ = self.terminal.show_cursor();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    if let Err(err) = crash_hardening::apply() {
        tracing::warn!("{err:#}");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("gatehouse: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = CliArgs::parse(env::args().skip(1))?;
    if args.help {
        print!("{USAGE}");
        return Ok(());
    }

    let config = GatehouseConfig::load()?.unwrap_or_default();
    let runtime = config.resolve()?;
    let options = ui_options(&config);

    let store = SqliteCheckpointStore::open(&runtime.checkpoint_path)
        .with_context(|| format!("failed to open checkpoint store {}", runtime.checkpoint_path.display()))?;

    let mut registry = ToolRegistry::default();
    register_builtins(&mut registry, &runtime.tools).context("failed to register built-in tools")?;
    let mcp_timeout = Duration::from_secs(runtime.tools.timeout_secs);
    for server in runtime.tools.mcp.iter().filter(|server| server.enabled) {
        let count = connect_and_register(&mut registry, server, mcp_timeout)
            .await
            .with_context(|| format!("MCP server '{}' is unavailable", server.name))?;
        tracing::info!(server = %server.name, tools = count, "Registered MCP tools");
    }

    let settings = AgentSettings::from_runtime(&runtime).context("failed to prepare the report directory")?;
    let model = HttpModelClient::new(runtime.api.clone(), runtime.retry.clone());
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let agent = Arc::new(
        Agent::new(Arc::new(model), Arc::new(registry), Arc::new(store), settings).with_events(events_tx),
    );

    if args.list {
        let suspended = agent.list_suspended()?;
        if suspended.is_empty() {
            println!("No threads are waiting for approval.");
        }
        for summary in suspended {
            println!(
                "{}  {:>8}  {}  {}",
                summary.thread_id,
                age(summary.updated_at),
                summary.pending_tool.as_deref().unwrap_or("-"),
                summary.preview.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    }

    let thread_id = match (args.thread, args.new_thread) {
        (Some(raw), _) => ThreadId::new(raw).context("invalid --thread value")?,
        (None, true) => ThreadId::generate(),
        // Pick up where the last session stopped: the newest suspended thread.
        (None, false) => agent
            .list_suspended()?
            .into_iter()
            .next()
            .map_or_else(ThreadId::generate, |summary| summary.thread_id),
    };
    tracing::info!(thread = %thread_id, model = %agent.model_name(), "Opening thread");

    let mut app = App::new(agent, events_rx, thread_id)?;

    let result = {
        let mut session = TerminalSession::new()?;
        run_app(&mut session.terminal, &mut app, options).await
    };

    if app.pending_approval().is_some() {
        println!(
            "Thread {} is waiting for approval. Resume with: gatehouse --thread {}",
            app.thread_id(),
            app.thread_id()
        );
    }

    result
}

fn age(updated_at: SystemTime) -> String {
    let secs = updated_at.elapsed().map_or(0, |elapsed| elapsed.as_secs());
    match secs {
        0..60 => format!("{secs}s ago"),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn ui_options(config: &GatehouseConfig) -> UiOptions {
    config.app.as_ref().map_or_else(UiOptions::default, |app| UiOptions {
        ascii_only: app.ascii_only,
        high_contrast: app.high_contrast,
    })
}

const FRAME_DURATION: Duration = Duration::from_millis(8);

async fn run_app<B>(terminal: &mut Terminal<B>, app: &mut App, options: UiOptions) -> Result<()>
where
    B: Backend,
    B::Error: Send + Sync + 'static,
{
    let mut input = InputPump::new();
    let mut frames = tokio::time::interval(FRAME_DURATION);
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let result: Result<()> = loop {
        frames.tick().await;

        // Non-blocking input (drain queue only)
        match handle_events(app, &mut input) {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(e) => break Err(e),
        }

        app.tick();

        if let Err(e) = terminal.draw(|frame| draw(frame, app, options)) {
            break Err(e.into());
        }
    };

    input.shutdown().await;
    result
}
