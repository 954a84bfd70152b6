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

//! Completion session: one outstanding `textDocument/completion` request,
//! the suggestions it returned, and the popup that shows them.

use anyhow::Context;
use lsp_types::{CompletionItem, CompletionResponse, Position};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

use crate::lsp::{
    LspClient, LspError, Message, MessageListener, RequestId, ResponseMessage, Result,
};
use crate::ui::{Cursor, DrawCommand, Style, Surface, Viewport, truncate};

/// One completion candidate, in server order.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion(CompletionItem);

impl Suggestion {
    /// Text shown in the popup.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Server-provided detail, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.0.detail.as_deref()
    }

    /// Text to insert: `insertText` when present, the label otherwise.
    #[must_use]
    pub fn insert_text(&self) -> &str {
        self.0.insert_text.as_deref().unwrap_or(&self.0.label)
    }

    /// The item as the server sent it.
    #[must_use]
    pub const fn item(&self) -> &CompletionItem {
        &self.0
    }
}

impl From<CompletionItem> for Suggestion {
    fn from(item: CompletionItem) -> Self {
        Self(item)
    }
}

#[derive(Debug)]
struct ActiveSession {
    anchor: Position,
    pending: Option<RequestId>,
    suggestions: Option<Vec<Suggestion>>,
    selected: usize,
}

/// Completion state shared between the UI and the read loop.
///
/// Inactive until [`start`](Self::start); suggestions stay unset until the
/// response to the session's own request arrives. Cloning yields another
/// handle to the same session.
#[derive(Debug, Clone, Default)]
pub struct CompletionSession {
    state: Arc<Mutex<Option<ActiveSession>>>,
}

impl CompletionSession {
    /// Creates an inactive session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn activate(&self, position: Position) -> Result<()> {
        let mut state = self.lock();
        if state.is_some() {
            return Err(LspError::AlreadyActive);
        }
        *state = Some(ActiveSession {
            anchor: position,
            pending: None,
            suggestions: None,
            selected: 0,
        });
        Ok(())
    }

    /// Activates the session at `position` and requests completions.
    ///
    /// The session's request id is recorded before the request is written,
    /// so the response cannot be missed.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::AlreadyActive`] if a session is active, or the
    /// client's error if the request cannot be sent (the session is then
    /// inactive again).
    pub async fn start(&self, position: Position, client: &LspClient) -> Result<RequestId> {
        self.activate(position)?;

        let state = self.state.clone();
        let sent = client
            .request_completion_with(position, move |id| {
                if let Some(active) = state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_mut()
                {
                    active.pending = Some(id.clone());
                }
            })
            .await;

        match sent {
            Ok(id) => {
                debug!(
                    "Completion requested at {}:{} (id {})",
                    position.line, position.character, id
                );
                Ok(id)
            }
            Err(e) => {
                self.lock().take();
                Err(e)
            }
        }
    }

    /// Stores `items` and selects the first. Ignored when inactive.
    pub fn on_completion_result(&self, items: Vec<CompletionItem>) {
        let mut state = self.lock();
        match state.as_mut() {
            Some(active) => {
                trace!("Received {} completion items", items.len());
                active.pending = None;
                active.suggestions = Some(items.into_iter().map(Suggestion::from).collect());
                active.selected = 0;
            }
            None => trace!("Dropping completion result for an inactive session"),
        }
    }

    /// Moves the selection down, wrapping to the top. No-op without
    /// suggestions.
    pub fn select_next(&self) {
        if let Some(active) = self.lock().as_mut()
            && let Some(suggestions) = &active.suggestions
            && !suggestions.is_empty()
        {
            active.selected = (active.selected + 1) % suggestions.len();
        }
    }

    /// Moves the selection up, wrapping to the bottom. No-op without
    /// suggestions.
    pub fn select_previous(&self) {
        if let Some(active) = self.lock().as_mut()
            && let Some(suggestions) = &active.suggestions
            && !suggestions.is_empty()
        {
            active.selected = if active.selected == 0 {
                suggestions.len() - 1
            } else {
                active.selected - 1
            };
        }
    }

    /// The selected suggestion.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NotActive`] if the session is inactive or has no
    /// suggestions yet.
    pub fn current(&self) -> Result<Suggestion> {
        self.lock()
            .as_ref()
            .and_then(|active| {
                active
                    .suggestions
                    .as_ref()
                    .and_then(|s| s.get(active.selected))
            })
            .cloned()
            .ok_or(LspError::NotActive)
    }

    /// Ends the session and drops its suggestions. A response still in
    /// flight will be ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NotActive`] if the session is inactive.
    pub fn stop(&self) -> Result<()> {
        self.lock().take().map(|_| ()).ok_or(LspError::NotActive)
    }

    /// Returns the selected suggestion's insert text and stops the session.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NotActive`] if there is nothing to accept.
    pub fn accept(&self) -> Result<String> {
        let mut state = self.lock();
        let text = state
            .as_ref()
            .and_then(|active| {
                active
                    .suggestions
                    .as_ref()
                    .and_then(|s| s.get(active.selected))
            })
            .map(|s| s.insert_text().to_string())
            .ok_or(LspError::NotActive)?;
        state.take();
        Ok(text)
    }

    /// Whether a session is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Whether the session is still waiting for its response.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock().as_ref().is_some_and(|a| a.pending.is_some())
    }

    /// Position the session was started at.
    #[must_use]
    pub fn anchor(&self) -> Option<Position> {
        self.lock().as_ref().map(|a| a.anchor)
    }

    /// Snapshot of the suggestions, if they have arrived.
    #[must_use]
    pub fn suggestions(&self) -> Option<Vec<Suggestion>> {
        self.lock().as_ref().and_then(|a| a.suggestions.clone())
    }

    /// Index of the selected suggestion, while suggestions are present.
    #[must_use]
    pub fn selected_index(&self) -> Option<usize> {
        self.lock()
            .as_ref()
            .filter(|a| a.suggestions.as_ref().is_some_and(|s| !s.is_empty()))
            .map(|a| a.selected)
    }

    fn accept_response(&self, response: &ResponseMessage) -> anyhow::Result<()> {
        let Some(id) = response.id.as_ref() else {
            return Ok(());
        };
        let matches = self
            .lock()
            .as_ref()
            .is_some_and(|a| a.pending.as_ref() == Some(id));
        if !matches {
            return Ok(());
        }

        let items = if let Some(error) = &response.error {
            warn!("Completion request failed: {} {}", error.code, error.message);
            Vec::new()
        } else {
            match &response.result {
                None => Vec::new(),
                Some(result) => {
                    match serde_json::from_value::<CompletionResponse>(result.clone()) {
                        Ok(CompletionResponse::Array(items)) => items,
                        Ok(CompletionResponse::List(list)) => list.items,
                        Err(e) => {
                            self.store_if_pending(id, Vec::new());
                            return Err(e).context("malformed completion response");
                        }
                    }
                }
            }
        };

        self.store_if_pending(id, items);
        Ok(())
    }

    /// Stores `items` only if the session still waits for `id`.
    fn store_if_pending(&self, id: &RequestId, items: Vec<CompletionItem>) {
        let still_pending = self
            .lock()
            .as_ref()
            .is_some_and(|a| a.pending.as_ref() == Some(id));
        if still_pending {
            self.on_completion_result(items);
        }
    }

    /// Popup rows for the current suggestions.
    ///
    /// The popup opens above the cursor when the cursor sits in the lower
    /// half of the viewport and below it otherwise, the first visible entry
    /// closest to the cursor. At most `height / 2 - 2` rows (and at least
    /// one) are shown, windowed so the selection is always among them.
    #[must_use]
    pub fn layout(&self, cursor: Cursor, viewport: Viewport) -> Vec<DrawCommand> {
        let state = self.lock();
        let Some(active) = state.as_ref() else {
            return Vec::new();
        };
        let Some(suggestions) = active.suggestions.as_deref() else {
            return Vec::new();
        };

        let height = usize::from(viewport.height);
        let row = usize::from(cursor.row);
        let max_label = usize::from(viewport.width).saturating_sub(1 + usize::from(cursor.col));
        if suggestions.is_empty() || max_label == 0 {
            return Vec::new();
        }

        let show_above = row > height / 2;
        let visible = (height / 2).saturating_sub(2).max(1).min(suggestions.len());
        let start = if active.selected < visible {
            0
        } else {
            active.selected + 1 - visible
        };

        let mut commands = Vec::with_capacity(visible);
        for (offset, (index, suggestion)) in suggestions
            .iter()
            .enumerate()
            .skip(start)
            .take(visible)
            .enumerate()
        {
            let target = if show_above {
                row.checked_sub(offset + 1)
            } else {
                Some(row + offset + 1).filter(|r| *r < height)
            };
            let Some(target) = target.and_then(|r| u16::try_from(r).ok()) else {
                continue;
            };

            let style = if index == active.selected {
                Style::Selected
            } else {
                Style::Suggestion
            };
            commands.push(DrawCommand::new(
                target,
                cursor.col,
                truncate(suggestion.label(), max_label),
                style,
            ));
        }
        commands
    }

    /// Draws [`layout`](Self::layout) onto `surface`.
    ///
    /// # Errors
    ///
    /// Returns the surface's error.
    pub fn render<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        cursor: Cursor,
        viewport: Viewport,
    ) -> io::Result<()> {
        surface.draw_all(&self.layout(cursor, viewport))
    }
}

impl MessageListener for CompletionSession {
    fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        if let Message::Response(response) = message {
            self.accept_response(response)?;
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
    use serde_json::json;

    fn items(labels: &[&str]) -> Vec<CompletionItem> {
        labels
            .iter()
            .map(|label| CompletionItem::new_simple((*label).to_string(), String::new()))
            .collect()
    }

    fn active_with(labels: &[&str]) -> CompletionSession {
        let session = CompletionSession::new();
        session.activate(Position::new(0, 0)).unwrap();
        session.on_completion_result(items(labels));
        session
    }

    fn pending(session: &CompletionSession, id: i64) {
        session.lock().as_mut().unwrap().pending = Some(RequestId::Number(id));
    }

    fn response(id: i64, result: serde_json::Value) -> Message {
        Message::from_value(json!({"jsonrpc": "2.0", "id": id, "result": result})).unwrap()
    }

    fn labels(commands: &[DrawCommand]) -> Vec<(u16, &str, Style)> {
        commands
            .iter()
            .map(|c| (c.row, c.text.as_str(), c.style))
            .collect()
    }

    #[test]
    fn test_start_while_active_fails() {
        let session = CompletionSession::new();
        session.activate(Position::new(1, 2)).unwrap();
        assert!(matches!(
            session.activate(Position::new(3, 4)),
            Err(LspError::AlreadyActive)
        ));
        assert_eq!(session.anchor(), Some(Position::new(1, 2)));
    }

    #[test]
    fn test_stop_while_inactive_fails() {
        let session = CompletionSession::new();
        assert!(matches!(session.stop(), Err(LspError::NotActive)));
        session.activate(Position::new(0, 0)).unwrap();
        session.stop().unwrap();
        assert!(!session.is_active());
        assert!(session.suggestions().is_none());
    }

    #[test]
    fn test_current_requires_suggestions() {
        let session = CompletionSession::new();
        assert!(matches!(session.current(), Err(LspError::NotActive)));
        session.activate(Position::new(0, 0)).unwrap();
        assert!(matches!(session.current(), Err(LspError::NotActive)));
        session.on_completion_result(items(&["foo"]));
        assert_eq!(session.current().unwrap().label(), "foo");
    }

    #[test]
    fn test_select_next_wraps_back_to_start() {
        let session = active_with(&["a", "b", "c"]);
        session.select_next();
        assert_eq!(session.current().unwrap().label(), "b");
        session.select_next();
        session.select_next();
        assert_eq!(session.selected_index(), Some(0));
    }

    #[test]
    fn test_select_previous_wraps_to_end() {
        let session = active_with(&["a", "b", "c"]);
        session.select_previous();
        assert_eq!(session.current().unwrap().label(), "c");
        session.select_previous();
        session.select_previous();
        assert_eq!(session.selected_index(), Some(0));
    }

    #[test]
    fn test_single_suggestion_selection_is_fixed() {
        let session = active_with(&["only"]);
        session.select_next();
        session.select_previous();
        assert_eq!(session.selected_index(), Some(0));
    }

    #[test]
    fn test_select_without_suggestions_is_noop() {
        let session = CompletionSession::new();
        session.select_next();
        session.activate(Position::new(0, 0)).unwrap();
        session.select_previous();
        assert_eq!(session.selected_index(), None);

        session.on_completion_result(Vec::new());
        session.select_next();
        assert_eq!(session.selected_index(), None);
    }

    #[test]
    fn test_new_result_resets_selection() {
        let session = active_with(&["a", "b"]);
        session.select_next();
        session.on_completion_result(items(&["c", "d"]));
        assert_eq!(session.current().unwrap().label(), "c");
    }

    #[test]
    fn test_result_for_inactive_session_is_dropped() {
        let session = CompletionSession::new();
        session.on_completion_result(items(&["late"]));
        assert!(!session.is_active());
        assert!(session.suggestions().is_none());
    }

    #[test]
    fn test_accept_returns_insert_text_and_stops() {
        let session = CompletionSession::new();
        session.activate(Position::new(0, 0)).unwrap();
        let mut item = CompletionItem::new_simple("println!".to_string(), String::new());
        item.insert_text = Some("println!(\"{}\")".to_string());
        session.on_completion_result(vec![item]);

        assert_eq!(session.accept().unwrap(), "println!(\"{}\")");
        assert!(!session.is_active());
        assert!(matches!(session.accept(), Err(LspError::NotActive)));
    }

    #[test]
    fn test_listener_matches_pending_id() {
        let session = CompletionSession::new();
        session.activate(Position::new(0, 0)).unwrap();
        pending(&session, 5);

        session
            .on_message(&response(4, json!([{"label": "other"}])))
            .unwrap();
        assert!(session.suggestions().is_none());
        assert!(session.is_pending());

        session
            .on_message(&response(
                5,
                json!({"isIncomplete": false, "items": [{"label": "alpha"}, {"label": "beta"}]}),
            ))
            .unwrap();
        let labels: Vec<String> = session
            .suggestions()
            .unwrap()
            .iter()
            .map(|s| s.label().to_string())
            .collect();
        assert_eq!(labels, vec!["alpha", "beta"]);
        assert!(!session.is_pending());
    }

    #[test]
    fn test_stale_response_after_stop_is_ignored() {
        let session = CompletionSession::new();
        session.activate(Position::new(0, 0)).unwrap();
        pending(&session, 2);
        session.stop().unwrap();
        session.activate(Position::new(1, 0)).unwrap();
        pending(&session, 3);

        session
            .on_message(&response(2, json!([{"label": "stale"}])))
            .unwrap();
        assert!(session.suggestions().is_none());
    }

    #[test]
    fn test_error_and_null_responses_store_empty_list() {
        let session = CompletionSession::new();
        session.activate(Position::new(0, 0)).unwrap();
        pending(&session, 9);
        let error = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 9,
            "error": {"code": -32603, "message": "internal"}
        }))
        .unwrap();
        session.on_message(&error).unwrap();
        assert_eq!(session.suggestions(), Some(Vec::new()));

        session.stop().unwrap();
        session.activate(Position::new(0, 0)).unwrap();
        pending(&session, 10);
        session.on_message(&response(10, json!(null))).unwrap();
        assert_eq!(session.suggestions(), Some(Vec::new()));
    }

    #[test]
    fn test_malformed_response_is_reported() {
        let session = CompletionSession::new();
        session.activate(Position::new(0, 0)).unwrap();
        pending(&session, 1);
        assert!(session.on_message(&response(1, json!("nonsense"))).is_err());
        assert_eq!(session.suggestions(), Some(Vec::new()));
    }

    #[test]
    fn test_layout_below_cursor_in_upper_half() {
        let session = active_with(&["alpha", "beta", "gamma"]);
        let commands = session.layout(Cursor::new(2, 4), Viewport::new(40, 20));
        assert_eq!(
            labels(&commands),
            vec![
                (3, "alpha", Style::Selected),
                (4, "beta", Style::Suggestion),
                (5, "gamma", Style::Suggestion),
            ]
        );
        assert!(commands.iter().all(|c| c.col == 4));
    }

    #[test]
    fn test_layout_above_cursor_in_lower_half() {
        let session = active_with(&["alpha", "beta"]);
        let commands = session.layout(Cursor::new(15, 0), Viewport::new(40, 20));
        assert_eq!(
            labels(&commands),
            vec![(14, "alpha", Style::Selected), (13, "beta", Style::Suggestion)]
        );
    }

    #[test]
    fn test_layout_windows_around_selection() {
        let names: Vec<String> = (0..10).map(|i| format!("item{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let session = active_with(&refs);
        for _ in 0..7 {
            session.select_next();
        }

        // height 10 -> 10 / 2 - 2 = 3 rows.
        let commands = session.layout(Cursor::new(0, 0), Viewport::new(40, 10));
        assert_eq!(
            labels(&commands),
            vec![
                (1, "item5", Style::Suggestion),
                (2, "item6", Style::Suggestion),
                (3, "item7", Style::Selected),
            ]
        );
    }

    #[test]
    fn test_layout_small_viewport_shows_one_row() {
        let session = active_with(&["a", "b"]);
        let commands = session.layout(Cursor::new(0, 0), Viewport::new(40, 4));
        assert_eq!(labels(&commands), vec![(1, "a", Style::Selected)]);
    }

    #[test]
    fn test_layout_truncates_long_labels() {
        let session = active_with(&["a_very_long_identifier"]);
        // 20 - 1 - 9 = 10 columns.
        let commands = session.layout(Cursor::new(0, 9), Viewport::new(20, 20));
        assert_eq!(commands[0].text, "a_very_...");
    }

    #[test]
    fn test_layout_empty_when_inactive_or_unset() {
        let session = CompletionSession::new();
        assert!(session.layout(Cursor::new(0, 0), Viewport::new(80, 24)).is_empty());
        session.activate(Position::new(0, 0)).unwrap();
        assert!(session.layout(Cursor::new(0, 0), Viewport::new(80, 24)).is_empty());
    }
}
