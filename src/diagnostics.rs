// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Latest diagnostic set for the open document, and its inline layout.
//!
//! The store is fed by `textDocument/publishDiagnostics` (push) and by
//! responses to `textDocument/diagnostic` (pull). Either way a new set
//! replaces the old one wholesale.

use anyhow::Context;
use lsp_types::{Diagnostic, DocumentDiagnosticReport, PublishDiagnosticsParams, Uri};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

use crate::buffer::LineSource;
use crate::lsp::{LspClient, Message, MessageListener, RequestId, ResponseMessage, Result};
use crate::ui::{DrawCommand, Style, Surface, Viewport, truncate};

/// Below this many free columns after the line text nothing is drawn.
pub const MIN_READABLE_WIDTH: usize = 5;

#[derive(Debug, Default)]
struct StoreState {
    tracked: Option<Uri>,
    diagnostics: Vec<Diagnostic>,
    version: Option<i32>,
    pending_pull: Option<RequestId>,
}

/// Holds the most recent diagnostic set.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticStore {
    state: Arc<Mutex<StoreState>>,
}

impl DiagnosticStore {
    /// Creates an empty store that accepts publishes for any document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scopes the store to `uri` and clears the current set.
    ///
    /// Publishes for other documents are ignored from now on.
    pub fn track_document(&self, uri: Uri) {
        let mut state = self.lock();
        state.tracked = Some(uri);
        state.diagnostics.clear();
        state.version = None;
        state.pending_pull = None;
    }

    /// Document the store is scoped to.
    #[must_use]
    pub fn tracked_document(&self) -> Option<Uri> {
        self.lock().tracked.clone()
    }

    /// Empties the set.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.diagnostics.clear();
        state.version = None;
    }

    /// Replaces the stored set.
    pub fn on_diagnostics_published(&self, diagnostics: Vec<Diagnostic>) {
        let mut state = self.lock();
        state.diagnostics = diagnostics;
    }

    /// Snapshot of the current set, in server order.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().diagnostics.clone()
    }

    /// Document version the current set was published for, if the server
    /// sent one.
    #[must_use]
    pub fn version(&self) -> Option<i32> {
        self.lock().version
    }

    /// Number of stored diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().diagnostics.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pulls diagnostics for the client's open document. The response
    /// replaces the set when it arrives.
    ///
    /// # Errors
    ///
    /// Returns the client's error if the request cannot be sent.
    pub async fn request(&self, client: &LspClient) -> Result<RequestId> {
        let state = self.state.clone();
        client
            .request_diagnostics_with(move |id| {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pending_pull = Some(id.clone());
            })
            .await
            .inspect_err(|_| self.lock().pending_pull = None)
    }

    fn accept_publish(&self, params: PublishDiagnosticsParams) {
        let mut state = self.lock();
        if let Some(tracked) = &state.tracked
            && *tracked != params.uri
        {
            trace!(
                "Ignoring diagnostics for untracked document {}",
                params.uri.as_str()
            );
            return;
        }
        debug!(
            "Received {} diagnostics for {}",
            params.diagnostics.len(),
            params.uri.as_str()
        );
        state.diagnostics = params.diagnostics;
        state.version = params.version;
    }

    fn accept_pull_response(&self, response: &ResponseMessage) -> anyhow::Result<()> {
        {
            let mut state = self.lock();
            if state.pending_pull.is_none() || state.pending_pull.as_ref() != response.id.as_ref() {
                return Ok(());
            }
            state.pending_pull = None;
        }

        if let Some(error) = &response.error {
            warn!("Pull diagnostics failed: {} {}", error.code, error.message);
            return Ok(());
        }
        let Some(result) = &response.result else {
            return Ok(());
        };

        let report: DocumentDiagnosticReport = serde_json::from_value(result.clone())
            .context("malformed textDocument/diagnostic report")?;
        match report {
            DocumentDiagnosticReport::Full(full) => {
                let items = full.full_document_diagnostic_report.items;
                debug!("Pulled {} diagnostics", items.len());
                self.on_diagnostics_published(items);
            }
            DocumentDiagnosticReport::Unchanged(_) => {
                trace!("Pulled diagnostics unchanged");
            }
        }
        Ok(())
    }

    /// Inline messages for the lines `[top, top + viewport.height)`.
    ///
    /// One message per line, drawn one column after the line's text: the
    /// first diagnostic starting there, with `(+N more)` when others share
    /// the line. Lines with too little room, or missing from `lines`, get
    /// nothing.
    #[must_use]
    pub fn layout<L>(&self, top: usize, viewport: Viewport, lines: &L) -> Vec<DrawCommand>
    where
        L: LineSource + ?Sized,
    {
        let state = self.lock();
        let bottom = top + usize::from(viewport.height);
        let width = usize::from(viewport.width);

        let mut by_line: BTreeMap<usize, Vec<&Diagnostic>> = BTreeMap::new();
        for diagnostic in &state.diagnostics {
            let Ok(line) = usize::try_from(diagnostic.range.start.line) else {
                continue;
            };
            if (top..bottom).contains(&line) {
                by_line.entry(line).or_default().push(diagnostic);
            }
        }

        let mut commands = Vec::with_capacity(by_line.len());
        for (line, group) in by_line {
            let Some(line_len) = lines.line_len(line) else {
                continue;
            };
            let available = width.saturating_sub(line_len + 1);
            if available < MIN_READABLE_WIDTH {
                continue;
            }

            let first = group[0];
            let mut message = collapse_whitespace(&first.message);
            if group.len() > 1 {
                message = format!("{message} (+{} more)", group.len() - 1);
            }

            let (Ok(row), Ok(col)) = (u16::try_from(line - top), u16::try_from(line_len + 1))
            else {
                continue;
            };
            commands.push(DrawCommand::new(
                row,
                col,
                truncate(&message, available),
                Style::for_severity(first.severity),
            ));
        }
        commands
    }

    /// Draws [`layout`](Self::layout) onto `surface`.
    ///
    /// # Errors
    ///
    /// Returns the surface's error.
    pub fn render<S, L>(
        &self,
        surface: &mut S,
        top: usize,
        viewport: Viewport,
        lines: &L,
    ) -> io::Result<()>
    where
        S: Surface + ?Sized,
        L: LineSource + ?Sized,
    {
        surface.draw_all(&self.layout(top, viewport, lines))
    }
}

fn collapse_whitespace(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl MessageListener for DiagnosticStore {
    fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        if let Some(params) = message.notification_params("textDocument/publishDiagnostics") {
            let params: PublishDiagnosticsParams = serde_json::from_value(params.clone())
                .context("malformed publishDiagnostics params")?;
            self.accept_publish(params);
            return Ok(());
        }
        if let Message::Response(response) = message {
            self.accept_pull_response(response)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use crate::lsp::NotificationMessage;
    use lsp_types::{DiagnosticSeverity, Position, Range};
    use serde_json::json;

    fn diagnostic(line: u32, message: &str, severity: Option<DiagnosticSeverity>) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(line, 0), Position::new(line, 1)),
            severity,
            message: message.to_string(),
            ..Default::default()
        }
    }

    fn buffer(lines: usize) -> Vec<String> {
        (0..lines).map(|i| format!("line{i}")).collect()
    }

    fn publish(uri: &str, diagnostics: serde_json::Value) -> Message {
        Message::Notification(NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: "textDocument/publishDiagnostics".to_string(),
            params: json!({"uri": uri, "diagnostics": diagnostics}),
        })
    }

    #[test]
    fn test_same_line_diagnostics_are_grouped() {
        let store = DiagnosticStore::new();
        store.on_diagnostics_published(vec![
            diagnostic(5, "a", Some(DiagnosticSeverity::ERROR)),
            diagnostic(5, "b", Some(DiagnosticSeverity::WARNING)),
        ]);

        let commands = store.layout(0, Viewport::new(80, 24), &buffer(10));
        assert_eq!(
            commands,
            vec![DrawCommand::new(5, 6, "a (+1 more)", Style::Error)]
        );
    }

    #[test]
    fn test_only_visible_lines_are_laid_out() {
        let store = DiagnosticStore::new();
        store.on_diagnostics_published(vec![
            diagnostic(1, "above", None),
            diagnostic(3, "top", Some(DiagnosticSeverity::HINT)),
            diagnostic(7, "bottom", Some(DiagnosticSeverity::INFORMATION)),
            diagnostic(8, "below", None),
        ]);

        let commands = store.layout(3, Viewport::new(80, 5), &buffer(20));
        let rows: Vec<(u16, &str, Style)> = commands
            .iter()
            .map(|c| (c.row, c.text.as_str(), c.style))
            .collect();
        assert_eq!(rows, vec![(0, "top", Style::Info), (4, "bottom", Style::Info)]);
    }

    #[test]
    fn test_narrow_space_skips_line() {
        let store = DiagnosticStore::new();
        store.on_diagnostics_published(vec![diagnostic(0, "unused", None)]);
        let lines = vec!["0123456789".to_string()];

        // 15 - 10 - 1 = 4 columns left.
        assert!(store.layout(0, Viewport::new(15, 5), &lines).is_empty());
        // 16 - 10 - 1 = 5 columns left.
        let commands = store.layout(0, Viewport::new(16, 5), &lines);
        assert_eq!(commands[0].text, "un...");
        assert_eq!(commands[0].col, 11);
        assert_eq!(commands[0].style, Style::Plain);
    }

    #[test]
    fn test_skipped_line_does_not_hide_later_lines() {
        let store = DiagnosticStore::new();
        store.on_diagnostics_published(vec![
            diagnostic(0, "crowded", None),
            diagnostic(1, "roomy", None),
        ]);
        let lines = vec!["x".repeat(30), "y".to_string()];
        let commands = store.layout(0, Viewport::new(32, 5), &lines);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].text, "roomy");
    }

    #[test]
    fn test_line_missing_from_buffer_is_skipped() {
        let store = DiagnosticStore::new();
        store.on_diagnostics_published(vec![diagnostic(50, "stale", None)]);
        assert!(store.layout(40, Viewport::new(80, 24), &buffer(45)).is_empty());
    }

    #[test]
    fn test_multiline_message_is_flattened() {
        let store = DiagnosticStore::new();
        store.on_diagnostics_published(vec![diagnostic(0, "expected `;`\n  found `}`", None)]);
        let commands = store.layout(0, Viewport::new(80, 5), &buffer(1));
        assert_eq!(commands[0].text, "expected `;` found `}`");
    }

    #[test]
    fn test_publish_replaces_set() {
        let store = DiagnosticStore::new();
        store
            .on_message(&publish(
                "file:///tmp/x.py",
                json!([
                    {"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}, "message": "one"},
                    {"range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 1}}, "message": "two"}
                ]),
            ))
            .unwrap();
        assert_eq!(store.len(), 2);

        store
            .on_message(&publish(
                "file:///tmp/x.py",
                json!([{"range": {"start": {"line": 2, "character": 0}, "end": {"line": 2, "character": 1}}, "message": "three"}]),
            ))
            .unwrap();
        let stored = store.diagnostics();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, "three");
    }

    #[test]
    fn test_tracked_document_filters_publishes() {
        let store = DiagnosticStore::new();
        store.on_diagnostics_published(vec![diagnostic(0, "old", None)]);
        store.track_document("file:///tmp/x.py".parse().unwrap());
        assert!(store.is_empty());

        store
            .on_message(&publish(
                "file:///tmp/other.py",
                json!([{"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}, "message": "nope"}]),
            ))
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_pull_response_matched_by_id() {
        let store = DiagnosticStore::new();
        store.lock().pending_pull = Some(RequestId::Number(4));
        store.on_diagnostics_published(vec![diagnostic(0, "pushed", None)]);

        let response = |id: i64, result: serde_json::Value| {
            Message::from_value(json!({"jsonrpc": "2.0", "id": id, "result": result})).unwrap()
        };

        // Another request's response is not a report.
        store
            .on_message(&response(3, json!({"kind": "full", "items": []})))
            .unwrap();
        assert_eq!(store.len(), 1);

        store
            .on_message(&response(4, json!({"kind": "unchanged", "resultId": "r1"})))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.lock().pending_pull.is_none());

        store.lock().pending_pull = Some(RequestId::Number(5));
        store
            .on_message(&response(
                5,
                json!({"kind": "full", "items": [
                    {"range": {"start": {"line": 4, "character": 0}, "end": {"line": 4, "character": 2}}, "message": "pulled", "severity": 2}
                ]}),
            ))
            .unwrap();
        let stored = store.diagnostics();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, "pulled");
        assert_eq!(stored[0].severity, Some(DiagnosticSeverity::WARNING));
    }
}
