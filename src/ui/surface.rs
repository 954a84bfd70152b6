// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::{PrintStyledContent, StyledContent};
use std::io::{self, Write};

use super::style::{Style, StyleTable};

/// One piece of text to draw at a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCommand {
    /// Screen row.
    pub row: u16,
    /// Screen column.
    pub col: u16,
    /// Text, already fitted to the available width.
    pub text: String,
    /// Symbolic style.
    pub style: Style,
}

impl DrawCommand {
    /// Creates a command.
    #[must_use]
    pub fn new(row: u16, col: u16, text: impl Into<String>, style: Style) -> Self {
        Self {
            row,
            col,
            text: text.into(),
            style,
        }
    }
}

/// Something text can be drawn on.
pub trait Surface {
    /// Draws `text` starting at (`row`, `col`).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying output fails.
    fn draw_text(&mut self, row: u16, col: u16, text: &str, style: Style) -> io::Result<()>;

    /// Makes queued output visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying output fails.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Draws every command in order.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first draw error.
    fn draw_all(&mut self, commands: &[DrawCommand]) -> io::Result<()> {
        for command in commands {
            self.draw_text(command.row, command.col, &command.text, command.style)?;
        }
        Ok(())
    }
}

/// Terminal surface writing crossterm escape sequences to `W`.
pub struct TerminalSurface<W: Write> {
    out: W,
    styles: StyleTable,
}

impl<W: Write> TerminalSurface<W> {
    /// Wraps a writer with the given style table.
    pub const fn new(out: W, styles: StyleTable) -> Self {
        Self { out, styles }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Surface for TerminalSurface<W> {
    fn draw_text(&mut self, row: u16, col: u16, text: &str, style: Style) -> io::Result<()> {
        let content = StyledContent::new(self.styles.get(style), text);
        queue!(self.out, MoveTo(col, row), PrintStyledContent(content))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Surface that records draws instead of performing them (plain-text
/// reports and tests).
#[derive(Debug, Default, Clone)]
pub struct RecordingSurface {
    commands: Vec<DrawCommand>,
}

impl RecordingSurface {
    /// Creates an empty recording.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything drawn so far, in order.
    #[must_use]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }
}

impl Surface for RecordingSurface {
    fn draw_text(&mut self, row: u16, col: u16, text: &str, style: Style) -> io::Result<()> {
        self.commands.push(DrawCommand::new(row, col, text, style));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for clear failure messages")]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_surface_positions_and_prints() {
        let mut surface = TerminalSurface::new(Vec::new(), StyleTable::monochrome());
        surface.draw_text(2, 4, "abc", Style::Plain).unwrap();
        surface.flush().unwrap();

        let out = String::from_utf8(surface.into_inner()).unwrap();
        // MoveTo is 1-based on the wire.
        assert!(out.contains("\x1b[3;5H"));
        assert!(out.contains("abc"));
    }

    #[test]
    fn test_draw_all_keeps_order() {
        let commands = vec![
            DrawCommand::new(0, 0, "a", Style::Selected),
            DrawCommand::new(1, 0, "b", Style::Suggestion),
        ];
        let mut surface = RecordingSurface::new();
        surface.draw_all(&commands).unwrap();
        assert_eq!(surface.commands(), commands.as_slice());
    }
}
