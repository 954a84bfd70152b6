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

use lsp_types::Uri;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::error::{LspError, Result};

/// The single document currently open on a client.
///
/// The version starts at 0 on open and grows by one per change sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    path: PathBuf,
    uri: Uri,
    language_id: &'static str,
    version: i32,
}

impl DocumentHandle {
    /// Builds a handle for an absolute `path` at version 0.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::InvalidPath`] if the path has no URI form.
    pub fn new(path: PathBuf) -> Result<Self> {
        let uri = path_to_uri(&path)?;
        let language_id = detect_language_id(&path);
        Ok(Self {
            path,
            uri,
            language_id,
            version: 0,
        })
    }

    /// Absolute path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `file://` URI of the document.
    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    /// LSP language id derived from the file extension.
    #[must_use]
    pub const fn language_id(&self) -> &'static str {
        self.language_id
    }

    /// Version of the last text sent to the server.
    #[must_use]
    pub const fn version(&self) -> i32 {
        self.version
    }

    /// Increments the version and returns the new value.
    pub const fn bump_version(&mut self) -> i32 {
        self.version += 1;
        self.version
    }
}

/// Resolves `path` to an absolute form without requiring it to exist.
///
/// # Errors
///
/// Returns an error if the current directory cannot be read.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(_) => Ok(std::path::absolute(path)?),
    }
}

/// Converts an absolute path to a `file://` URI.
///
/// # Errors
///
/// Returns [`LspError::InvalidPath`] for relative paths or paths the URI
/// parser rejects.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| LspError::InvalidPath(path.display().to_string()))?;
    Uri::from_str(url.as_str())
        .map_err(|e| LspError::InvalidPath(format!("{}: {e}", path.display())))
}

/// Maps a file extension to an LSP language id.
#[must_use]
pub fn detect_language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("go") => "go",
        Some("py" | "pyi") => "python",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("jsx") => "javascriptreact",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("c" | "h") => "c",
        Some("cc" | "cpp" | "cxx" | "hpp" | "hh") => "cpp",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("lua") => "lua",
        Some("sh" | "bash") => "shellscript",
        Some("json") => "json",
        Some("toml") => "toml",
        Some("yaml" | "yml") => "yaml",
        Some("md") => "markdown",
        _ => "plaintext",
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_starts_at_version_zero() {
        let handle = DocumentHandle::new(PathBuf::from("/tmp/x.py")).unwrap();
        assert_eq!(handle.version(), 0);
        assert_eq!(handle.language_id(), "python");
        assert_eq!(handle.uri().as_str(), "file:///tmp/x.py");
    }

    #[test]
    fn test_bump_version() {
        let mut handle = DocumentHandle::new(PathBuf::from("/tmp/x.py")).unwrap();
        assert_eq!(handle.bump_version(), 1);
        assert_eq!(handle.bump_version(), 2);
        assert_eq!(handle.version(), 2);
    }

    #[test]
    fn test_path_to_uri_escapes_spaces() {
        let uri = path_to_uri(Path::new("/tmp/my file.rs")).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/my%20file.rs");
    }

    #[test]
    fn test_relative_path_is_rejected() {
        assert!(matches!(
            path_to_uri(Path::new("relative.rs")),
            Err(LspError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_absolute_path_for_missing_file() {
        let resolved = absolute_path(Path::new("does-not-exist.py")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("does-not-exist.py"));
    }

    #[test]
    fn test_detect_language_id() {
        assert_eq!(detect_language_id(Path::new("main.rs")), "rust");
        assert_eq!(detect_language_id(Path::new("app.tsx")), "typescriptreact");
        assert_eq!(detect_language_id(Path::new("README")), "plaintext");
    }
}
