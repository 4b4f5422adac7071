//! Colors and glyphs.
//!
//! The default palette is Kanagawa Wave; `high_contrast` swaps in the basic
//! ANSI colors so the card stays readable on any terminal theme.

use ratatui::style::{Color, Modifier, Style};

/// Display options that do not affect behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiOptions {
    /// Use ASCII-only glyphs for icons and spinners.
    pub ascii_only: bool,
    pub high_contrast: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub bg_dark: Color,
    pub bg_panel: Color,
    pub text_primary: Color,
    pub text_secondary: Color,
    pub text_muted: Color,
    pub primary: Color,
    pub accent: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub peach: Color,
}

impl Palette {
    const KANAGAWA: Self = Self {
        bg_dark: Color::Rgb(22, 22, 29),
        bg_panel: Color::Rgb(31, 31, 40),
        text_primary: Color::Rgb(220, 215, 186),
        text_secondary: Color::Rgb(200, 192, 147),
        text_muted: Color::Rgb(114, 113, 105),
        primary: Color::Rgb(149, 127, 184),
        accent: Color::Rgb(127, 180, 202),
        success: Color::Rgb(152, 187, 108),
        warning: Color::Rgb(230, 195, 132),
        error: Color::Rgb(255, 93, 98),
        peach: Color::Rgb(255, 160, 102),
    };

    const ANSI: Self = Self {
        bg_dark: Color::Black,
        bg_panel: Color::Black,
        text_primary: Color::White,
        text_secondary: Color::Gray,
        text_muted: Color::DarkGray,
        primary: Color::White,
        accent: Color::Cyan,
        success: Color::Green,
        warning: Color::Yellow,
        error: Color::Red,
        peach: Color::Yellow,
    };

    #[must_use]
    pub const fn standard() -> Self {
        Self::KANAGAWA
    }

    #[must_use]
    pub const fn high_contrast() -> Self {
        Self::ANSI
    }
}

#[must_use]
pub fn palette(options: UiOptions) -> Palette {
    if options.high_contrast {
        Palette::high_contrast()
    } else {
        Palette::standard()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Glyphs {
    pub user: &'static str,
    pub assistant: &'static str,
    pub tool: &'static str,
    pub tool_result_ok: &'static str,
    pub tool_result_err: &'static str,
    pub notice: &'static str,
    pub paused: &'static str,
    pub prompt: &'static str,
    pub spinner_frames: &'static [&'static str],
}

const UNICODE_GLYPHS: Glyphs = Glyphs {
    user: "○",
    assistant: "◇",
    tool: "⊙",
    tool_result_ok: "✓",
    tool_result_err: "✗",
    notice: "·",
    paused: "⏸",
    prompt: "❯",
    spinner_frames: &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
};

const ASCII_GLYPHS: Glyphs = Glyphs {
    user: "U",
    assistant: "A",
    tool: "T",
    tool_result_ok: "OK",
    tool_result_err: "ERR",
    notice: "-",
    paused: "||",
    prompt: ">",
    spinner_frames: &["|", "/", "-", "\\"],
};

#[must_use]
pub fn glyphs(options: UiOptions) -> Glyphs {
    if options.ascii_only { ASCII_GLYPHS } else { UNICODE_GLYPHS }
}

#[must_use]
pub fn spinner_frame(tick: usize, options: UiOptions) -> &'static str {
    let frames = glyphs(options).spinner_frames;
    frames[tick % frames.len()]
}

/// Shared text styles.
pub mod styles {
    use super::{Color, Modifier, Palette, Style};

    fn bold(color: Color) -> Style {
        Style::default().fg(color).add_modifier(Modifier::BOLD)
    }

    #[must_use]
    pub fn user_name(palette: &Palette) -> Style {
        bold(palette.success)
    }

    #[must_use]
    pub fn assistant_name(palette: &Palette) -> Style {
        bold(palette.primary)
    }

    #[must_use]
    pub fn key_hint(palette: &Palette) -> Style {
        Style::default().fg(palette.text_muted)
    }

    #[must_use]
    pub fn key_highlight(palette: &Palette) -> Style {
        bold(palette.peach)
    }
}
