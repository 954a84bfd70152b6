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

use anyhow::{Context, Result};
use lsp_types::TraceValue;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::lsp::ClientOptions;

/// Directory name under the user config dir.
pub const CONFIG_DIR: &str = "editor-lsp";

/// Prefix of environment overrides (`EDITOR_LSP_LOCALE`,
/// `EDITOR_LSP_SERVER__COMMAND`, ...).
pub const ENV_PREFIX: &str = "EDITOR_LSP";

/// Settings for the editor's LSP integration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// The language server to run. Without one, LSP features are disabled.
    #[serde(default)]
    pub server: Option<ServerConfig>,

    /// Locale sent to the server (default: "en")
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Trace level sent to the server (default: verbose)
    #[serde(default = "default_trace")]
    pub trace: TraceValue,

    /// How long to wait for the `initialize` response, in milliseconds
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// How long `shutdown` waits for the server to exit, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// How to launch the language server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "pylsp")
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

fn default_locale() -> String {
    "en".to_string()
}

const fn default_trace() -> TraceValue {
    TraceValue::Verbose
}

const fn default_ready_timeout_ms() -> u64 {
    10_000
}

const fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            locale: default_locale(),
            trace: default_trace(),
            ready_timeout_ms: default_ready_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// Later sources win: defaults, the user config file, `explicit_file`,
    /// then `EDITOR_LSP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value has the wrong
    /// type.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("locale", default_locale())?
            .set_default("trace", "verbose")?
            .set_default("ready_timeout_ms", default_ready_timeout_ms())?
            .set_default("shutdown_timeout_ms", default_shutdown_timeout_ms())?;

        // 2. Load from user config directory (~/.config/editor-lsp/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(CONFIG_DIR).join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Bound on waiting for the server to become ready.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Bound on waiting for the server to exit.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Client settings derived from this configuration.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            locale: self.locale.clone(),
            trace: self.trace,
            initialization_options: self
                .server
                .as_ref()
                .and_then(|s| s.initialization_options.clone()),
            shutdown_timeout: self.shutdown_timeout(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;

    fn load_from(contents: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        Config::load(Some(path)).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.server.is_none());
        assert_eq!(config.locale, "en");
        assert_eq!(config.trace, TraceValue::Verbose);
        assert_eq!(config.ready_timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_explicit_file() {
        let config = load_from(
            r#"
locale = "de"
trace = "off"
shutdown_timeout_ms = 250

[server]
command = "pylsp"
args = ["-v"]
initialization_options = { plugins = { pyflakes = { enabled = true } } }
"#,
        );

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.command, "pylsp");
        assert_eq!(server.args, vec!["-v"]);
        assert_eq!(config.locale, "de");
        assert_eq!(config.trace, TraceValue::Off);
        assert_eq!(config.ready_timeout_ms, 10_000);

        let options = config.client_options();
        assert_eq!(options.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(
            options.initialization_options.unwrap()["plugins"]["pyflakes"]["enabled"],
            serde_json::Value::Bool(true)
        );
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ready_timeout_ms = \"soon\"\n").unwrap();
        assert!(Config::load(Some(path)).is_err());
    }
}
