/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crossterm::style::{Attribute, Attributes, Color, ContentStyle};
use lsp_types::DiagnosticSeverity;
use std::collections::HashMap;

/// What a piece of text is, as far as the renderer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Style {
    /// Default text; also diagnostics without a severity.
    Plain,
    /// The highlighted completion entry.
    Selected,
    /// An unselected completion entry.
    Suggestion,
    /// Error diagnostics.
    Error,
    /// Warning diagnostics.
    Warning,
    /// Information and hint diagnostics.
    Info,
}

impl Style {
    /// Every style, in a fixed order.
    pub const ALL: [Self; 6] = [
        Self::Plain,
        Self::Selected,
        Self::Suggestion,
        Self::Error,
        Self::Warning,
        Self::Info,
    ];

    /// Display class for a diagnostic severity.
    ///
    /// `None` (severity absent) is the only input that maps to `Plain`.
    #[must_use]
    pub fn for_severity(severity: Option<DiagnosticSeverity>) -> Self {
        match severity {
            Some(DiagnosticSeverity::ERROR) => Self::Error,
            Some(DiagnosticSeverity::WARNING) => Self::Warning,
            Some(_) => Self::Info,
            None => Self::Plain,
        }
    }
}

/// Maps symbolic styles to terminal styles. Built once by the renderer.
#[derive(Debug, Clone)]
pub struct StyleTable {
    styles: HashMap<Style, ContentStyle>,
}

impl Default for StyleTable {
    fn default() -> Self {
        let colored = |fg: Color| ContentStyle {
            foreground_color: Some(fg),
            ..ContentStyle::default()
        };

        let styles = HashMap::from([
            (Style::Plain, ContentStyle::default()),
            (
                Style::Selected,
                ContentStyle {
                    foreground_color: Some(Color::Black),
                    background_color: Some(Color::Cyan),
                    attributes: Attributes::from(Attribute::Bold),
                    ..ContentStyle::default()
                },
            ),
            (
                Style::Suggestion,
                ContentStyle {
                    foreground_color: Some(Color::White),
                    background_color: Some(Color::DarkGrey),
                    ..ContentStyle::default()
                },
            ),
            (Style::Error, colored(Color::Red)),
            (Style::Warning, colored(Color::Yellow)),
            (Style::Info, colored(Color::Blue)),
        ]);
        Self { styles }
    }
}

impl StyleTable {
    /// Table with no colors at all (`--no-color`, non-TTY output).
    #[must_use]
    pub fn monochrome() -> Self {
        let mut table = Self::default();
        for style in Style::ALL {
            table.styles.insert(style, ContentStyle::default());
        }
        table.styles.insert(
            Style::Selected,
            ContentStyle {
                attributes: Attributes::from(Attribute::Reverse),
                ..ContentStyle::default()
            },
        );
        table
    }

    /// Overrides one entry.
    pub fn set(&mut self, style: Style, content: ContentStyle) {
        self.styles.insert(style, content);
    }

    /// Terminal style for `style`; plain if never set.
    #[must_use]
    pub fn get(&self, style: Style) -> ContentStyle {
        self.styles.get(&style).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classes() {
        assert_eq!(Style::for_severity(Some(DiagnosticSeverity::ERROR)), Style::Error);
        assert_eq!(
            Style::for_severity(Some(DiagnosticSeverity::WARNING)),
            Style::Warning
        );
        assert_eq!(
            Style::for_severity(Some(DiagnosticSeverity::INFORMATION)),
            Style::Info
        );
        assert_eq!(Style::for_severity(Some(DiagnosticSeverity::HINT)), Style::Info);
        assert_eq!(Style::for_severity(None), Style::Plain);
    }

    #[test]
    fn test_default_table_covers_every_style() {
        let table = StyleTable::default();
        assert_eq!(table.get(Style::Plain), ContentStyle::default());
        assert_eq!(table.get(Style::Error).foreground_color, Some(Color::Red));
        for style in Style::ALL {
            assert!(table.styles.contains_key(&style));
        }
    }

    #[test]
    fn test_monochrome_keeps_selection_visible() {
        let table = StyleTable::monochrome();
        assert!(table.get(Style::Error).foreground_color.is_none());
        assert!(table.get(Style::Selected).attributes.has(Attribute::Reverse));
    }
}
