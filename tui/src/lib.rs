//! TUI rendering for Gatehouse using ratatui.

mod approval;
mod input;
mod theme;

pub use input::{InputPump, apply_event, handle_events};
pub use theme::{Glyphs, Palette, UiOptions, glyphs, palette, spinner_frame, styles};

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthStr;

use gatehouse_engine::{App, Phase, TranscriptEntry};

/// Tool output lines shown inline before eliding the rest.
const TOOL_RESULT_PREVIEW_LINES: usize = 6;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App, options: UiOptions) {
    let palette = palette(options);
    let glyphs = glyphs(options);
    let bg_block = Block::default().style(Style::default().bg(palette.bg_dark));
    frame.render_widget(bg_block, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Min(1),    // Transcript
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    draw_transcript(frame, app, chunks[0], &palette, &glyphs);
    draw_input(frame, app, chunks[1], &palette, &glyphs);
    draw_status_bar(frame, app, chunks[2], &palette, options);

    if let Some(request) = app.pending_approval() {
        approval::draw_approval_card(frame, request, &palette, &glyphs);
    }
}

fn transcript_lines(entries: &[TranscriptEntry], palette: &Palette, glyphs: &Glyphs) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for entry in entries {
        match entry {
            TranscriptEntry::User(text) => {
                lines.push(Line::from(Span::styled(
                    format!("{} You", glyphs.user),
                    styles::user_name(palette),
                )));
                push_body(&mut lines, text, Style::default().fg(palette.text_primary), usize::MAX);
            }
            TranscriptEntry::Assistant(text) => {
                lines.push(Line::from(Span::styled(
                    format!("{} Assistant", glyphs.assistant),
                    styles::assistant_name(palette),
                )));
                push_body(&mut lines, text, Style::default().fg(palette.text_primary), usize::MAX);
            }
            TranscriptEntry::ToolCall { name, summary } => {
                lines.push(Line::from(vec![
                    Span::styled(
                        format!("{} {name}", glyphs.tool),
                        Style::default().fg(palette.accent).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(format!(" {summary}"), Style::default().fg(palette.text_muted)),
                ]));
            }
            TranscriptEntry::ToolResult { name, content, is_error } => {
                let (glyph, color) = if *is_error {
                    (glyphs.tool_result_err, palette.error)
                } else {
                    (glyphs.tool_result_ok, palette.success)
                };
                lines.push(Line::from(Span::styled(
                    format!("  {glyph} {name}"),
                    Style::default().fg(color),
                )));
                push_body(
                    &mut lines,
                    content,
                    Style::default().fg(palette.text_muted),
                    TOOL_RESULT_PREVIEW_LINES,
                );
            }
            TranscriptEntry::Notice(text) => {
                lines.push(Line::from(Span::styled(
                    format!("{} {text}", glyphs.notice),
                    Style::default()
                        .fg(palette.text_muted)
                        .add_modifier(Modifier::ITALIC),
                )));
            }
            TranscriptEntry::Error(text) => {
                lines.push(Line::from(Span::styled(
                    format!("Error: {text}"),
                    Style::default().fg(palette.error).add_modifier(Modifier::BOLD),
                )));
            }
        }
        lines.push(Line::from(""));
    }
    lines
}

fn push_body(lines: &mut Vec<Line<'static>>, text: &str, style: Style, max_lines: usize) {
    let total = text.lines().count();
    for line in text.lines().take(max_lines) {
        lines.push(Line::from(Span::styled(format!("  {line}"), style)));
    }
    if total > max_lines {
        lines.push(Line::from(Span::styled(
            format!("  … {} more line(s)", total - max_lines),
            style.add_modifier(Modifier::ITALIC),
        )));
    }
}

fn wrapped_line_count(lines: &[Line], width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let mut total: u16 = 0;

    for line in lines {
        let line_width = line.width();
        let rows = if line_width == 0 {
            1
        } else {
            ((line_width - 1) / width) + 1
        };
        total = total.saturating_add(u16::try_from(rows).unwrap_or(u16::MAX));
    }

    total
}

fn draw_transcript(frame: &mut Frame, app: &App, area: Rect, palette: &Palette, glyphs: &Glyphs) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(palette.text_muted))
        .title(Span::styled(
            format!(" Thread {} ", app.thread_id().short()),
            Style::default().fg(palette.text_secondary),
        ));
    let inner = block.inner(area);

    if app.transcript().is_empty() {
        frame.render_widget(welcome(palette).block(block), area);
        return;
    }

    let lines = transcript_lines(app.transcript(), palette, glyphs);
    // Stick to the bottom: newest output is what matters while approving.
    let total = wrapped_line_count(&lines, inner.width);
    let scroll = total.saturating_sub(inner.height);

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    frame.render_widget(paragraph, area);
}

fn welcome(palette: &Palette) -> Paragraph<'static> {
    Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(
            "  Gatehouse",
            Style::default().fg(palette.primary).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            "  Ask for research. Every tool call waits for your approval.",
            Style::default().fg(palette.text_secondary),
        )),
    ])
}

fn draw_input(frame: &mut Frame, app: &App, area: Rect, palette: &Palette, glyphs: &Glyphs) {
    let (border_color, hints) = match app.phase() {
        Phase::Idle => (
            palette.success,
            vec![
                Span::styled("Enter", styles::key_highlight(palette)),
                Span::styled(" send  ", styles::key_hint(palette)),
                Span::styled("Ctrl+N", styles::key_highlight(palette)),
                Span::styled(" new thread  ", styles::key_hint(palette)),
                Span::styled("Ctrl+C", styles::key_highlight(palette)),
                Span::styled(" quit ", styles::key_hint(palette)),
            ],
        ),
        Phase::Running => (
            palette.primary,
            vec![
                Span::styled("Ctrl+C", styles::key_highlight(palette)),
                Span::styled(" quit ", styles::key_hint(palette)),
            ],
        ),
        Phase::AwaitingApproval(_) => (
            palette.warning,
            vec![
                Span::styled("a/Enter", styles::key_highlight(palette)),
                Span::styled(" approve  ", styles::key_hint(palette)),
                Span::styled("d/Esc", styles::key_highlight(palette)),
                Span::styled(" deny ", styles::key_hint(palette)),
            ],
        ),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border_color))
        .title_bottom(Line::from(hints).right_aligned());

    let prompt = format!("{} ", glyphs.prompt);
    let input = app.input();
    let inner = block.inner(area);

    // Keep the cursor end of a long draft visible.
    let available = usize::from(inner.width).saturating_sub(UnicodeWidthStr::width(prompt.as_str()) + 1);
    let mut visible = input;
    while UnicodeWidthStr::width(visible) > available {
        let mut chars = visible.chars();
        chars.next();
        visible = chars.as_str();
    }

    let line = Line::from(vec![
        Span::styled(prompt.clone(), Style::default().fg(border_color)),
        Span::styled(visible.to_string(), Style::default().fg(palette.text_primary)),
    ]);
    frame.render_widget(Paragraph::new(line).block(block), area);

    if matches!(app.phase(), Phase::Idle) {
        let cursor_offset = UnicodeWidthStr::width(prompt.as_str()) + UnicodeWidthStr::width(visible);
        let cursor_x = inner.x.saturating_add(u16::try_from(cursor_offset).unwrap_or(u16::MAX));
        frame.set_cursor_position((cursor_x.min(inner.right().saturating_sub(1)), inner.y));
    }
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect, palette: &Palette, options: UiOptions) {
    let (text, style) = match (app.phase(), app.status()) {
        (Phase::Running, status) => (
            format!(
                "{} {}",
                spinner_frame(app.spinner_frame(), options),
                status.unwrap_or("Working...")
            ),
            Style::default().fg(palette.primary),
        ),
        (Phase::AwaitingApproval(request), _) => (
            format!("Waiting for approval: {}", request.tool_name),
            Style::default().fg(palette.warning),
        ),
        (Phase::Idle, Some(status)) => (status.to_string(), Style::default().fg(palette.text_secondary)),
        (Phase::Idle, None) => (
            format!("{} │ {}", app.model_name().provider().display_name(), app.model_name()),
            Style::default().fg(palette.success),
        ),
    };

    let status = Paragraph::new(Line::from(vec![Span::raw(" "), Span::styled(text, style)]));
    frame.render_widget(status, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_engine::gatehouse_providers::{ModelFut, ModelRequest, ProviderError};
    use gatehouse_engine::gatehouse_tools::sandbox::Sandbox;
    use gatehouse_engine::gatehouse_tools::{ToolRegistry, ToolSettings};
    use gatehouse_engine::{
        Agent, AgentSettings, CheckpointStore, InMemoryCheckpointStore, ModelClient, ModelName, NonEmptyString,
        Provider, ThreadId,
    };
    use gatehouse_types::{Message, PendingBatch, RunState, ToolCall};
    use ratatui::{Terminal, backend::TestBackend, buffer::Buffer};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Silent(ModelName);

    impl ModelClient for Silent {
        fn model(&self) -> &ModelName {
            &self.0
        }

        fn invoke<'a>(&'a self, _request: ModelRequest<'a>) -> ModelFut<'a> {
            Box::pin(async { Err(ProviderError::Decode("unused".into())) })
        }
    }

    fn app_for(store: Arc<dyn CheckpointStore>, thread: &str, dir: &tempfile::TempDir) -> App {
        let settings = AgentSettings {
            system_prompt: String::new(),
            max_rounds_per_turn: 4,
            tools: ToolSettings {
                sandbox: Sandbox::new(dir.path(), vec![]).unwrap(),
                default_timeout: Duration::from_secs(1),
                max_output_bytes: 1024,
            },
        };
        let agent = Agent::new(
            Arc::new(Silent(Provider::Claude.default_model())),
            Arc::new(ToolRegistry::default()),
            store,
            settings,
        );
        let (_tx, rx) = mpsc::channel(1);
        App::new(Arc::new(agent), rx, ThreadId::new(thread).unwrap()).unwrap()
    }

    fn render(app: &App, width: u16, height: u16) -> Buffer {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal
            .draw(|frame| draw(frame, app, UiOptions::default()))
            .unwrap();
        terminal.backend().buffer().clone()
    }

    fn text_of(buffer: &Buffer) -> String {
        let area = buffer.area;
        let mut out = String::new();
        for y in 0..area.height {
            for x in 0..area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    fn suspended_store(thread: &str) -> Arc<dyn CheckpointStore> {
        let store = InMemoryCheckpointStore::new();
        let mut state = RunState::new(ThreadId::new(thread).unwrap());
        state
            .messages
            .push(Message::user(NonEmptyString::new("write a report").unwrap()));
        state.pending = PendingBatch::new(vec![ToolCall::new(
            "c1",
            "write_file",
            json!({"filename": "summary.md", "content": "# Findings\nAll good."}),
        )]);
        store.save(&state).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn empty_thread_shows_welcome_and_key_hints() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_for(Arc::new(InMemoryCheckpointStore::new()), "tui-empty", &dir);
        let screen = text_of(&render(&app, 100, 20));
        assert!(screen.contains("Gatehouse"));
        assert!(screen.contains("Ctrl+N"));
        assert!(screen.contains("Thread tui-empt"));
    }

    #[tokio::test]
    async fn pending_call_renders_the_approval_card() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_for(suspended_store("tui-card"), "tui-card", &dir);
        let screen = text_of(&render(&app, 100, 30));

        assert!(screen.contains("Tool approval required"));
        assert!(screen.contains("* Tool"));
        assert!(screen.contains("- write_file"));
        assert!(screen.contains("* File name"));
        assert!(screen.contains("summary.md"));
        assert!(screen.contains("# Findings"));
        assert!(screen.contains("a/Enter"));
        assert!(screen.contains("d/Esc"));
        assert!(screen.contains("Waiting for approval: write_file"));
    }

    #[tokio::test]
    async fn approval_card_fits_a_small_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_for(suspended_store("tui-small"), "tui-small", &dir);
        let screen = text_of(&render(&app, 40, 12));
        assert!(screen.contains("approval"));
        assert!(screen.contains("more line(s)"));
    }

    #[test]
    fn long_tool_output_is_elided() {
        let palette = Palette::standard();
        let glyphs = glyphs(UiOptions::default());
        let content = (1..=10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let lines = transcript_lines(
            &[TranscriptEntry::ToolResult {
                name: "web_search".into(),
                content,
                is_error: false,
            }],
            &palette,
            &glyphs,
        );
        let rendered: Vec<String> = lines.iter().map(ToString::to_string).collect();
        assert!(rendered.iter().any(|l| l.contains("line 6")));
        assert!(!rendered.iter().any(|l| l.contains("line 7")));
        assert!(rendered.iter().any(|l| l.contains("4 more line(s)")));
    }

    #[test]
    fn wrapped_line_count_accounts_for_width() {
        let lines = vec![Line::from("abcdef"), Line::from(""), Line::from("abc")];
        assert_eq!(wrapped_line_count(&lines, 3), 4);
        assert_eq!(wrapped_line_count(&lines, 10), 3);
    }
}
