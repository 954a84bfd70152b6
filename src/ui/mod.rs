// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Rendering primitives shared by the completion popup and inline
//! diagnostics.
//!
//! Components never touch the terminal directly: they compute a list of
//! [`DrawCommand`]s against a [`Viewport`] and hand them to a [`Surface`].
//! Colors live in the renderer-owned [`StyleTable`]; components only pick a
//! symbolic [`Style`].

/// Symbolic styles and the table that realizes them.
pub mod style;
/// Draw targets.
pub mod surface;
/// Width-aware text helpers.
pub mod text;

pub use style::{Style, StyleTable};
pub use surface::{DrawCommand, RecordingSurface, Surface, TerminalSurface};
pub use text::truncate;

/// Visible area of the editor window, in terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
}

impl Viewport {
    /// Creates a viewport.
    #[must_use]
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

/// Cursor cell within the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    /// Screen row.
    pub row: u16,
    /// Screen column.
    pub col: u16,
}

impl Cursor {
    /// Creates a cursor.
    #[must_use]
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}
