//! Console Rendering
//!
//! [`ConsoleRenderer`] is the terminal's [`RenderSink`]: prose fragments are
//! printed as they arrive in the theme's response color, fences in the info
//! color, and code lines are highlighted with syntect and written as 24-bit
//! ANSI escapes, one line per segment.
//!
//! The renderer also owns every other write to the console (prompt, notices,
//! errors) so output from the shell and the stream never interleaves.

use std::io::Write;
use std::sync::OnceLock;

use crossterm::queue;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use gpterm_core::{RenderSink, Segment, SegmentKind, ThemeMode};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::as_24_bit_terminal_escaped;

use crate::theme::{ThemeColors, ERROR_RED, NOTICE_RED};

/// Language assumed for fenced code
const CODE_LANGUAGE: &str = "Python";

static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
static THEME_SET: OnceLock<ThemeSet> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAX_SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme_set() -> &'static ThemeSet {
    THEME_SET.get_or_init(ThemeSet::load_defaults)
}

fn code_syntax() -> &'static SyntaxReference {
    let ss = syntax_set();
    ss.find_syntax_by_name(CODE_LANGUAGE)
        .unwrap_or_else(|| ss.find_syntax_plain_text())
}

fn code_theme(name: &str) -> Option<&'static Theme> {
    let ts = theme_set();
    ts.themes.get(name).or_else(|| ts.themes.values().next())
}

/// Streams classified segments to a terminal
pub struct ConsoleRenderer<W: Write> {
    out: W,
    colors: ThemeColors,
    /// Created on the first code line of a block
    highlighter: Option<HighlightLines<'static>>,
    at_line_start: bool,
}

impl<W: Write> ConsoleRenderer<W> {
    /// Create a renderer writing to `out`
    pub fn new(out: W, mode: ThemeMode) -> Self {
        Self {
            out,
            colors: ThemeColors::for_mode(mode),
            highlighter: None,
            at_line_start: true,
        }
    }

    /// Switch palette
    pub fn set_theme(&mut self, mode: ThemeMode) {
        self.colors = ThemeColors::for_mode(mode);
    }

    /// The underlying writer
    #[cfg(test)]
    pub fn writer(&self) -> &W {
        &self.out
    }

    /// Print the shell prompt showing the remaining budget
    pub fn prompt(&mut self, remaining: i64) {
        let color = self.colors.prompt;
        self.emit(color, &format!("🌴 {remaining} > "), false);
    }

    /// Print the intro banner
    pub fn banner(&mut self) {
        let (title, info) = (self.colors.title, self.colors.info);
        self.emit(title, "## GPTerm - Interact with a GPT model via a terminal\n", true);
        self.emit(title, "Type ", false);
        self.emit(info, "/help", true);
        self.emit(title, " to list available commands. ", false);
        self.emit(info, "/exit", true);
        self.emit(title, " or ", false);
        self.emit(info, "^C", true);
        self.emit(title, " to quit.\n\n", false);
    }

    /// Print an informational message followed by a blank line
    pub fn info(&mut self, message: &str) {
        let color = self.colors.console_info;
        self.emit(color, &format!("{message}\n\n"), false);
    }

    /// Print a message submitted on the user's behalf
    pub fn message(&mut self, message: &str) {
        let color = self.colors.message;
        self.emit(color, &format!("{}\n", message.trim_start()), false);
    }

    /// Print a highlighted notice (context reset, abort)
    pub fn notice(&mut self, message: &str) {
        self.emit(NOTICE_RED, &format!("*** {message} ***\n"), true);
    }

    /// Print an error
    pub fn error(&mut self, message: &str) {
        self.emit(ERROR_RED, &format!("*** got error: {message} ***\n"), true);
    }

    /// Print plain text, as-is
    pub fn plain(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|()| self.out.flush()) {
            tracing::debug!(error = %e, "Console write failed");
        }
    }

    fn emit(&mut self, color: Color, text: &str, bold: bool) {
        let result = (|| -> std::io::Result<()> {
            if bold {
                queue!(self.out, SetAttribute(Attribute::Bold))?;
            }
            queue!(
                self.out,
                SetForegroundColor(color),
                Print(text),
                ResetColor,
                SetAttribute(Attribute::Reset)
            )?;
            self.out.flush()
        })();

        if let Err(e) = result {
            tracing::debug!(error = %e, "Console write failed");
        }
    }

    fn ensure_line_start(&mut self) {
        if !self.at_line_start {
            self.plain("\n");
            self.at_line_start = true;
        }
    }

    fn highlight(&mut self, line: &str) -> String {
        if self.highlighter.is_none() {
            self.highlighter = code_theme(self.colors.code_theme)
                .map(|theme| HighlightLines::new(code_syntax(), theme));
        }
        let Some(highlighter) = self.highlighter.as_mut() else {
            return line.to_string();
        };

        let with_newline = format!("{line}\n");
        match highlighter.highlight_line(&with_newline, syntax_set()) {
            Ok(ranges) => as_24_bit_terminal_escaped(&ranges, false)
                .trim_end_matches('\n')
                .to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "Highlighting failed, printing plain");
                line.to_string()
            }
        }
    }
}

impl<W: Write + Send> RenderSink for ConsoleRenderer<W> {
    fn begin_response(&mut self) {
        self.highlighter = None;
        self.at_line_start = true;
    }

    fn display(&mut self, segment: &Segment) {
        match segment.kind {
            SegmentKind::Display => {
                if !segment.is_code_context {
                    self.highlighter = None;
                }
                let color = self.colors.response;
                self.emit(color, &segment.text, false);
                self.at_line_start = segment.text.ends_with('\n');
            }
            SegmentKind::Delimiter => {
                self.ensure_line_start();
                let color = self.colors.console_info;
                self.emit(color, &segment.text, false);
                // Each block starts from a fresh parse state
                self.highlighter = None;
                self.at_line_start = true;
            }
            SegmentKind::CodeLine => {
                self.ensure_line_start();
                let highlighted = if segment.is_code_context {
                    self.highlight(&segment.text)
                } else {
                    segment.text.clone()
                };
                self.plain(&format!("{highlighted}\x1b[0m\n"));
                self.at_line_start = true;
            }
            SegmentKind::Speech => {}
        }
    }

    fn end_response(&mut self) {
        self.highlighter = None;
        self.ensure_line_start();
        self.plain("\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str, kind: SegmentKind, is_code_context: bool) -> Segment {
        Segment {
            text: text.to_string(),
            kind,
            is_code_context,
        }
    }

    fn output(renderer: &ConsoleRenderer<Vec<u8>>) -> String {
        String::from_utf8_lossy(renderer.writer()).into_owned()
    }

    #[test]
    fn test_prose_is_printed_verbatim() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Dark);
        renderer.begin_response();
        renderer.display(&segment("Hello", SegmentKind::Display, false));
        renderer.display(&segment(" world.", SegmentKind::Display, false));
        renderer.end_response();

        let out = output(&renderer);
        assert!(out.contains("Hello"));
        assert!(out.contains(" world."));
        assert!(out.ends_with("\n\n"));
    }

    #[test]
    fn test_code_lines_are_highlighted() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Dark);
        renderer.begin_response();
        renderer.display(&segment("```\n", SegmentKind::Delimiter, true));
        renderer.display(&segment("print(1)", SegmentKind::CodeLine, true));
        renderer.display(&segment("```\n", SegmentKind::Delimiter, true));
        renderer.end_response();

        let out = output(&renderer);
        assert!(out.contains("\x1b[38;2;"));
        assert!(out.contains("print"));
        assert!(out.contains("\x1b[0m\n"));
    }

    #[test]
    fn test_code_context_comes_from_segment() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Light);
        renderer.begin_response();

        // No fence seen, yet the segment says it is code
        renderer.display(&segment("x = 1", SegmentKind::CodeLine, true));
        assert!(renderer.highlighter.is_some());
        assert!(output(&renderer).contains("\x1b[38;2;"));

        renderer.display(&segment("Done.", SegmentKind::Display, false));
        assert!(renderer.highlighter.is_none());
    }

    #[test]
    fn test_code_line_without_code_context_is_plain() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Light);
        renderer.display(&segment("x = 1", SegmentKind::CodeLine, false));
        assert_eq!(output(&renderer), "x = 1\x1b[0m\n");
        assert!(renderer.highlighter.is_none());
    }

    #[test]
    fn test_stray_closing_fence_does_not_flip_highlighting() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Dark);
        renderer.begin_response();
        renderer.display(&segment("```\n", SegmentKind::Delimiter, true));
        renderer.display(&segment("```\n", SegmentKind::Delimiter, true));
        renderer.display(&segment("print(2)", SegmentKind::CodeLine, true));

        assert!(output(&renderer).contains("\x1b[38;2;"));
    }

    #[test]
    fn test_speech_segments_are_not_rendered() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Dark);
        renderer.display(&segment("Hello.", SegmentKind::Speech, false));
        assert!(output(&renderer).is_empty());
    }

    #[test]
    fn test_fence_starts_on_new_line() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Dark);
        renderer.begin_response();
        renderer.display(&segment("Here:", SegmentKind::Display, false));
        renderer.display(&segment("```\n", SegmentKind::Delimiter, true));

        let out = output(&renderer);
        let here = out.find("Here:").unwrap();
        let fence = out.find("```").unwrap();
        assert!(out[here..fence].contains('\n'));
    }

    #[test]
    fn test_prompt_shows_budget() {
        let mut renderer = ConsoleRenderer::new(Vec::new(), ThemeMode::Dark);
        renderer.prompt(4082);
        assert!(output(&renderer).contains("🌴 4082 > "));
    }
}
