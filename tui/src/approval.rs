use ratatui::{
    Frame,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Padding, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthStr;

use gatehouse_engine::ApprovalRequest;
use gatehouse_types::sanitize_terminal_text;

use crate::theme::{Glyphs, Palette, styles};

const MIN_CARD_WIDTH: u16 = 30;
const MAX_CARD_WIDTH: u16 = 96;

/// Body lines of the card: the formatter's text, made terminal-safe.
pub(crate) fn card_body(request: &ApprovalRequest) -> Vec<String> {
    request
        .render_text()
        .lines()
        .map(|line| sanitize_terminal_text(line).replace('\t', "    "))
        .collect()
}

pub(crate) fn draw_approval_card(frame: &mut Frame, request: &ApprovalRequest, palette: &Palette, glyphs: &Glyphs) {
    let area = frame.area();
    let body = card_body(request);

    let width = body
        .iter()
        .map(|line| UnicodeWidthStr::width(line.as_str()))
        .max()
        .unwrap_or(0)
        .saturating_add(6);
    let width = u16::try_from(width)
        .unwrap_or(u16::MAX)
        .clamp(MIN_CARD_WIDTH, MAX_CARD_WIDTH)
        .min(area.width.saturating_sub(2));
    let inner_width = usize::from(width.saturating_sub(4)).max(1);

    // Title, blank, body, blank, hints, plus border and padding rows.
    let chrome: u16 = 4 + 4;
    let max_body_rows = usize::from(area.height.saturating_sub(chrome + 2)).max(1);

    let mut lines: Vec<Line> = vec![
        Line::from(Span::styled(
            format!("{} Tool approval required ", glyphs.paused),
            Style::default()
                .fg(palette.text_primary)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];

    let heights: Vec<usize> = body
        .iter()
        .map(|text| UnicodeWidthStr::width(text.as_str()).max(1).div_ceil(inner_width))
        .collect();
    let total: usize = heights.iter().sum();
    // Keep a row for the overflow marker when the body does not fit.
    let budget = if total > max_body_rows {
        max_body_rows.saturating_sub(1)
    } else {
        total
    };

    let mut rows = 0usize;
    let mut shown = 0usize;
    for (text, needed) in body.iter().zip(&heights) {
        if rows + needed > budget {
            break;
        }
        rows += needed;
        shown += 1;
        let style = if text.starts_with('*') {
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(palette.text_secondary)
        };
        lines.push(Line::from(Span::styled(text.clone(), style)));
    }
    if shown < body.len() {
        lines.push(Line::from(Span::styled(
            format!("… {} more line(s)", body.len() - shown),
            Style::default().fg(palette.warning),
        )));
        rows += 1;
    }

    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("a/Enter", styles::key_highlight(palette)),
        Span::styled(" approve  ", styles::key_hint(palette)),
        Span::styled("d/Esc", styles::key_highlight(palette)),
        Span::styled(" deny", styles::key_hint(palette)),
    ]));

    let height = u16::try_from(rows)
        .unwrap_or(u16::MAX)
        .saturating_add(chrome)
        .min(area.height);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(palette.warning))
        .style(Style::default().bg(palette.bg_panel))
        .padding(Padding::horizontal(1));

    let rect = Rect {
        x: area.x + (area.width.saturating_sub(width) / 2),
        y: area.y + (area.height.saturating_sub(height) / 2),
        width,
        height,
    };

    frame.render_widget(Clear, rect);
    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        rect,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_engine::gatehouse_tools::format_approval;
    use gatehouse_types::ToolCall;
    use serde_json::json;

    #[test]
    fn body_strips_escape_sequences() {
        let request = format_approval(&ToolCall::new(
            "c1",
            "write_file",
            json!({"filename": "a.md", "content": "ok\u{1b}[2Jhidden"}),
        ));
        let body = card_body(&request);
        assert!(body.iter().all(|line| !line.contains('\u{1b}')));
        assert!(body.iter().any(|line| line.contains("okhidden")));
    }
}
