// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Editor-facing owner of one language server integration.
//!
//! [`LspSession::Disabled`] accepts every call and does nothing, so the
//! editor never branches on whether LSP is configured or still alive.

use lsp_types::Position;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::client::{LspClient, default_capabilities};
use super::document::{absolute_path, path_to_uri};
use super::error::{LspError, Result};
use crate::buffer::LineSource;
use crate::completion::CompletionSession;
use crate::config::Config;
use crate::diagnostics::DiagnosticStore;
use crate::progress::ProgressTracker;
use crate::ui::{Cursor, Surface, Viewport};

/// A live client with its consumers registered as listeners.
pub struct ActiveSession {
    client: LspClient,
    completion: CompletionSession,
    diagnostics: DiagnosticStore,
    progress: ProgressTracker,
}

impl ActiveSession {
    /// Wires fresh consumers to `client`.
    #[must_use]
    pub fn attach(client: LspClient) -> Self {
        let completion = CompletionSession::new();
        let diagnostics = DiagnosticStore::new();
        let progress = ProgressTracker::new();

        client.register_listener(Arc::new(completion.clone()));
        client.register_listener(Arc::new(diagnostics.clone()));
        client.register_listener(Arc::new(progress.clone()));

        Self {
            client,
            completion,
            diagnostics,
            progress,
        }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &LspClient {
        &self.client
    }

    /// Runs the handshake (`initialize`, wait for the response,
    /// `initialized`) and opens `path`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub async fn handshake(&mut self, path: &Path, config: &Config) -> Result<()> {
        self.client.initialize(default_capabilities()).await?;
        self.client.wait_until_ready(config.ready_timeout()).await?;
        self.client.initialized().await?;
        // Scope the store first so a publish racing the open is kept.
        self.diagnostics
            .track_document(path_to_uri(&absolute_path(path)?)?);
        self.client.open_document(path).await
    }
}

/// LSP integration that is either running or switched off.
pub enum LspSession {
    /// A server is running.
    Enabled(Box<ActiveSession>),
    /// No server configured, or the connection was lost.
    Disabled,
}

impl LspSession {
    /// Spawns the configured server, completes the handshake and opens
    /// `path`. Without a configured server the session is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be spawned or any handshake
    /// step fails. The server is shut down before returning.
    pub async fn start(config: &Config, path: &Path) -> Result<Self> {
        let Some(server) = &config.server else {
            info!("No language server configured, LSP features disabled");
            return Ok(Self::Disabled);
        };

        let client = LspClient::spawn(&server.command, &server.args, config.client_options())?;
        let mut session = ActiveSession::attach(client);

        if let Err(e) = session.handshake(path, config).await {
            warn!("Language server handshake failed: {}", e);
            if let Err(shutdown) = session.client.shutdown().await {
                warn!("Shutdown after failed handshake failed: {}", shutdown);
            }
            return Err(e);
        }

        info!("LSP session ready for {}", path.display());
        Ok(Self::Enabled(Box::new(session)))
    }

    /// Whether a server is running.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// The running session, if any.
    #[must_use]
    pub fn active(&self) -> Option<&ActiveSession> {
        match self {
            Self::Enabled(session) => Some(session),
            Self::Disabled => None,
        }
    }

    /// Completion state, if enabled.
    #[must_use]
    pub fn completion(&self) -> Option<&CompletionSession> {
        self.active().map(|s| &s.completion)
    }

    /// Diagnostic store, if enabled.
    #[must_use]
    pub fn diagnostics(&self) -> Option<&DiagnosticStore> {
        self.active().map(|s| &s.diagnostics)
    }

    /// Progress tracker, if enabled.
    #[must_use]
    pub fn progress(&self) -> Option<&ProgressTracker> {
        self.active().map(|s| &s.progress)
    }

    /// Starts a completion at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::AlreadyActive`] or the client's error.
    pub async fn start_completion(&self, position: Position) -> Result<()> {
        match self {
            Self::Enabled(s) => s.completion.start(position, &s.client).await.map(|_| ()),
            Self::Disabled => Ok(()),
        }
    }

    /// Moves the completion selection down.
    pub fn select_next(&self) {
        if let Some(completion) = self.completion() {
            completion.select_next();
        }
    }

    /// Moves the completion selection up.
    pub fn select_previous(&self) {
        if let Some(completion) = self.completion() {
            completion.select_previous();
        }
    }

    /// Cancels the completion.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NotActive`] if no completion is active.
    pub fn stop_completion(&self) -> Result<()> {
        self.completion().map_or(Ok(()), CompletionSession::stop)
    }

    /// Accepts the selected suggestion, returning the text to insert.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NotActive`] if there is nothing to accept.
    pub fn accept_completion(&self) -> Result<Option<String>> {
        self.completion()
            .map(CompletionSession::accept)
            .transpose()
    }

    /// Sends the document's new full text.
    ///
    /// # Errors
    ///
    /// Returns the client's error.
    pub async fn change_document(&mut self, text: &str) -> Result<()> {
        match self {
            Self::Enabled(s) => s.client.change_document(text).await.map(|_| ()),
            Self::Disabled => Ok(()),
        }
    }

    /// Pulls diagnostics for the open document.
    ///
    /// # Errors
    ///
    /// Returns the client's error.
    pub async fn request_diagnostics(&self) -> Result<()> {
        match self {
            Self::Enabled(s) => s.diagnostics.request(&s.client).await.map(|_| ()),
            Self::Disabled => Ok(()),
        }
    }

    /// Status line text for in-flight server work.
    #[must_use]
    pub fn progress_summary(&self) -> String {
        self.progress()
            .map(ProgressTracker::summary)
            .unwrap_or_default()
    }

    /// Draws inline diagnostics, then the completion popup over them.
    ///
    /// # Errors
    ///
    /// Returns the surface's error.
    pub fn render<S, L>(
        &self,
        surface: &mut S,
        top: usize,
        cursor: Cursor,
        viewport: Viewport,
        lines: &L,
    ) -> io::Result<()>
    where
        S: Surface + ?Sized,
        L: LineSource + ?Sized,
    {
        let Self::Enabled(session) = self else {
            return Ok(());
        };
        session.diagnostics.render(surface, top, viewport, lines)?;
        session.completion.render(surface, cursor, viewport)?;
        surface.flush()
    }

    /// Reports a lost connection exactly once, then disables the session.
    ///
    /// Returns the framing error that killed the read loop, or
    /// [`LspError::Closed`] if the server simply went away.
    pub fn poll_connection_error(&mut self) -> Option<LspError> {
        let Self::Enabled(session) = self else {
            return None;
        };
        if session.client.is_alive() {
            return None;
        }

        let lost = session
            .client
            .take_connection_error()
            .map_or(LspError::Closed, LspError::Framing);
        error!("Language server connection lost: {}", lost);
        *self = Self::Disabled;
        Some(lost)
    }

    /// Shuts the server down and disables the session.
    ///
    /// # Errors
    ///
    /// Returns the client's shutdown error; the session is disabled anyway.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Self::Enabled(mut session) = std::mem::replace(self, Self::Disabled) else {
            return Ok(());
        };

        if session.completion.is_active() {
            session.completion.stop()?;
        }
        if session.client.document().is_some()
            && let Err(e) = session.client.close_document().await
        {
            warn!("Failed to close document: {}", e);
        }
        session.client.shutdown().await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use crate::lsp::{ClientOptions, Transport};
    use crate::ui::RecordingSurface;

    #[tokio::test]
    async fn test_disabled_session_is_a_noop() {
        let mut session = LspSession::start(&Config::default(), Path::new("/tmp/x.py"))
            .await
            .unwrap();
        assert!(!session.is_enabled());

        session.start_completion(Position::new(0, 0)).await.unwrap();
        session.select_next();
        session.select_previous();
        session.stop_completion().unwrap();
        assert_eq!(session.accept_completion().unwrap(), None);
        session.change_document("x").await.unwrap();
        session.request_diagnostics().await.unwrap();
        assert_eq!(session.progress_summary(), "");
        assert!(session.poll_connection_error().is_none());

        let mut surface = RecordingSurface::new();
        let lines = vec!["x".to_string()];
        session
            .render(&mut surface, 0, Cursor::default(), Viewport::new(80, 24), &lines)
            .unwrap();
        assert!(surface.commands().is_empty());

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_connection_is_reported_once() {
        let (client_out, _server_in) = tokio::io::duplex(1024);
        let (server_out, client_in) = tokio::io::duplex(1024);
        let (transport, reader) = Transport::from_io(Box::new(client_in), Box::new(client_out));
        let client = LspClient::from_transport(transport, reader, ClientOptions::default());
        let mut session = LspSession::Enabled(Box::new(ActiveSession::attach(client)));

        drop(server_out);
        for _ in 0..200 {
            if !session.active().unwrap().client().is_alive() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(matches!(
            session.poll_connection_error(),
            Some(LspError::Closed)
        ));
        assert!(!session.is_enabled());
        assert!(session.poll_connection_error().is_none());
    }
}
