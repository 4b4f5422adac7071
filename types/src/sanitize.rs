//! Terminal text sanitization.
//!
//! Tool arguments and model output are untrusted. Before they reach the
//! approval view they pass through [`sanitize_terminal_text`], so an argument
//! cannot repaint the screen, hide text behind cursor movement, or smuggle
//! OSC sequences (clipboard writes, hyperlinks) past the human reviewer.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';
const C1_CSI: char = '\u{9b}';
const C1_OSC: char = '\u{9d}';

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Text,
    /// Saw ESC, waiting for the introducer.
    Escape,
    /// Inside CSI parameters, ends at a final byte in `@`..=`~`.
    Csi,
    /// Inside an OSC/DCS/APC/PM/SOS string, ends at BEL or ST.
    String,
    /// Saw ESC inside a string; `\` completes ST.
    StringEscape,
}

/// Strip escape sequences and control characters.
///
/// `\n`, `\t`, and `\r` are kept. Returns `Cow::Borrowed` when the input is
/// already clean.
///
/// ```
/// use gatehouse_types::sanitize_terminal_text;
///
/// assert_eq!(sanitize_terminal_text("plain"), "plain");
/// assert_eq!(sanitize_terminal_text("a\x1b[2Jb"), "ab");
/// ```
#[must_use]
pub fn sanitize_terminal_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(is_unsafe) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut state = Scan::Text;

    for c in input.chars() {
        state = match state {
            Scan::Text => match c {
                ESC => Scan::Escape,
                C1_CSI => Scan::Csi,
                C1_OSC => Scan::String,
                c if is_unsafe(c) => Scan::Text,
                c => {
                    out.push(c);
                    Scan::Text
                }
            },
            Scan::Escape => match c {
                '[' => Scan::Csi,
                ']' | 'P' | '_' | '^' | 'X' => Scan::String,
                // Two-byte escapes (ESC c, ESC 7, ...) consume one char.
                _ => Scan::Text,
            },
            Scan::Csi => {
                if ('@'..='~').contains(&c) {
                    Scan::Text
                } else {
                    Scan::Csi
                }
            }
            Scan::String => match c {
                BEL | '\u{9c}' => Scan::Text,
                ESC => Scan::StringEscape,
                _ => Scan::String,
            },
            Scan::StringEscape => {
                if c == '\\' {
                    Scan::Text
                } else {
                    Scan::String
                }
            }
        };
    }

    Cow::Owned(out)
}

fn is_unsafe(c: char) -> bool {
    match c {
        '\n' | '\t' | '\r' => false,
        '\u{0}'..='\u{1f}' | '\u{7f}'..='\u{9f}' => true,
        _ => false,
    }
}
