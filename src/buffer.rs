// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The editor buffer as seen by the rendering code: lines by index.

/// Read-only line access into an editor buffer.
pub trait LineSource {
    /// Text of line `index` without its line terminator, or `None` past the end.
    fn line(&self, index: usize) -> Option<&str>;

    /// Number of lines.
    fn line_count(&self) -> usize;

    /// Length of line `index` in characters.
    fn line_len(&self, index: usize) -> Option<usize> {
        self.line(index).map(|line| line.chars().count())
    }
}

impl<T: AsRef<str>> LineSource for [T] {
    fn line(&self, index: usize) -> Option<&str> {
        self.get(index).map(AsRef::as_ref)
    }

    fn line_count(&self) -> usize {
        self.len()
    }
}

impl<T: AsRef<str>> LineSource for Vec<T> {
    fn line(&self, index: usize) -> Option<&str> {
        self.as_slice().line(index)
    }

    fn line_count(&self) -> usize {
        self.len()
    }
}

/// Splits file text into the owned line list the renderer consumes.
#[must_use]
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_line_source() {
        let lines = ["fn main() {", "}"];
        assert_eq!(lines[..].line(0), Some("fn main() {"));
        assert_eq!(lines[..].line(2), None);
        assert_eq!(lines[..].line_count(), 2);
    }

    #[test]
    fn test_line_len_counts_chars() {
        let lines = split_lines("héllo\r\nworld\n");
        assert_eq!(lines.line_count(), 2);
        assert_eq!(lines.line_len(0), Some(5));
        assert_eq!(lines.line_len(5), None);
    }
}
