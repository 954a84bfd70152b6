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

//! Server work-in-progress tracking for the status line.

use anyhow::Context;
use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::lsp::{Message, MessageListener};

/// Token type for progress tracking (string or number).
pub type ProgressToken = NumberOrString;

/// One named unit of server work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    /// Token correlating begin/report/end.
    pub token: ProgressToken,
    /// Title shown in the summary.
    pub name: String,
    /// Latest progress message, if any.
    pub message: Option<String>,
    /// Latest percentage (0-100), if any.
    pub percentage: Option<u32>,
    /// Set once the work has ended; never cleared.
    pub completed: bool,
}

/// Tracks progress tokens in insertion order.
///
/// Cloning yields another handle to the same tracker, so one clone can be
/// registered as a listener while the UI keeps another.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    entries: Arc<Mutex<Vec<ProgressEntry>>>,
}

impl ProgressTracker {
    /// Creates a new `ProgressTracker`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProgressEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking `token` under `name`.
    ///
    /// A live entry with the same token is renamed in place. A completed one
    /// is dropped and a fresh entry is appended.
    pub fn begin(&self, token: ProgressToken, name: impl Into<String>) {
        let name = name.into();
        let mut entries = self.lock();

        if let Some(index) = entries.iter().position(|e| e.token == token) {
            if !entries[index].completed {
                debug!("Progress token {:?} restarted as {}", token, name);
                entries[index].name = name;
                entries[index].message = None;
                entries[index].percentage = None;
                return;
            }
            entries.remove(index);
        }

        trace!("Progress begin {:?}: {}", token, name);
        entries.push(ProgressEntry {
            token,
            name,
            message: None,
            percentage: None,
            completed: false,
        });
    }

    /// Updates the message/percentage of a live entry. Unknown or completed
    /// tokens are ignored.
    pub fn report(&self, token: &ProgressToken, message: Option<String>, percentage: Option<u32>) {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|e| &e.token == token && !e.completed) {
            if message.is_some() {
                entry.message = message;
            }
            if percentage.is_some() {
                entry.percentage = percentage;
            }
        }
    }

    /// Marks `token` completed. Unknown tokens are ignored.
    pub fn complete(&self, token: &ProgressToken) {
        let mut entries = self.lock();
        match entries.iter_mut().find(|e| &e.token == token) {
            Some(entry) => {
                trace!("Progress end {:?}: {}", token, entry.name);
                entry.completed = true;
            }
            None => debug!("Ignoring end for unknown progress token {:?}", token),
        }
    }

    /// Names of all live entries, space-joined, in insertion order.
    #[must_use]
    pub fn summary(&self) -> String {
        self.lock()
            .iter()
            .filter(|e| !e.completed)
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns true if server is busy with any progress operations.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock().iter().any(|e| !e.completed)
    }

    /// Snapshot of every entry, completed ones included.
    #[must_use]
    pub fn entries(&self) -> Vec<ProgressEntry> {
        self.lock().clone()
    }

    /// Drops completed entries. Returns how many were dropped.
    pub fn prune_completed(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| !e.completed);
        before - entries.len()
    }

    /// Clear all progress (e.g., on reconnect).
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Update state from a progress notification.
    pub fn update(&self, params: &ProgressParams) {
        let ProgressParamsValue::WorkDone(progress) = &params.value;
        match progress {
            WorkDoneProgress::Begin(begin) => {
                self.begin(params.token.clone(), begin.title.clone());
                self.report(&params.token, begin.message.clone(), begin.percentage);
            }
            WorkDoneProgress::Report(report) => {
                self.report(&params.token, report.message.clone(), report.percentage);
            }
            WorkDoneProgress::End(_) => self.complete(&params.token),
        }
    }
}

impl MessageListener for ProgressTracker {
    fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        let Some(params) = message.notification_params("$/progress") else {
            return Ok(());
        };
        let params: ProgressParams =
            serde_json::from_value(params.clone()).context("malformed $/progress params")?;
        self.update(&params);
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
    use serde_json::json;

    fn token(s: &str) -> ProgressToken {
        NumberOrString::String(s.to_string())
    }

    fn progress(value: serde_json::Value) -> Message {
        Message::Notification(NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: "$/progress".to_string(),
            params: value,
        })
    }

    #[test]
    fn test_summary_excludes_completed() {
        let tracker = ProgressTracker::new();
        tracker.begin(token("t1"), "Indexing");
        tracker.begin(token("t2"), "Linting");
        tracker.complete(&token("t1"));

        assert_eq!(tracker.summary(), "Linting");
        // Completed entries are excluded, not deleted.
        assert_eq!(tracker.entries().len(), 2);
    }

    #[test]
    fn test_summary_keeps_insertion_order() {
        let tracker = ProgressTracker::new();
        tracker.begin(token("b"), "Building");
        tracker.begin(NumberOrString::Number(7), "Checking");
        tracker.begin(token("a"), "Formatting");
        assert_eq!(tracker.summary(), "Building Checking Formatting");
    }

    #[test]
    fn test_complete_unknown_token_is_noop() {
        let tracker = ProgressTracker::new();
        tracker.begin(token("t1"), "Indexing");
        tracker.complete(&token("nope"));
        tracker.complete(&token("nope"));
        assert_eq!(tracker.summary(), "Indexing");
    }

    #[test]
    fn test_begin_on_live_token_renames_in_place() {
        let tracker = ProgressTracker::new();
        tracker.begin(token("t1"), "Indexing");
        tracker.begin(token("t2"), "Linting");
        tracker.begin(token("t1"), "Reindexing");

        assert_eq!(tracker.summary(), "Reindexing Linting");
        assert_eq!(tracker.entries().len(), 2);
    }

    #[test]
    fn test_begin_on_completed_token_appends_fresh_entry() {
        let tracker = ProgressTracker::new();
        tracker.begin(token("t1"), "Indexing");
        tracker.begin(token("t2"), "Linting");
        tracker.complete(&token("t1"));
        tracker.begin(token("t1"), "Indexing");

        let entries = tracker.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(tracker.summary(), "Linting Indexing");
        assert!(entries.iter().all(|e| !e.completed));
    }

    #[test]
    fn test_prune_and_busy() {
        let tracker = ProgressTracker::new();
        assert!(!tracker.is_busy());
        tracker.begin(token("t1"), "Indexing");
        assert!(tracker.is_busy());
        tracker.complete(&token("t1"));
        assert!(!tracker.is_busy());

        assert_eq!(tracker.prune_completed(), 1);
        assert!(tracker.entries().is_empty());
    }

    #[test]
    fn test_listener_follows_work_done_lifecycle() {
        let tracker = ProgressTracker::new();

        tracker
            .on_message(&progress(json!({
                "token": "idx",
                "value": {"kind": "begin", "title": "Indexing", "percentage": 0}
            })))
            .unwrap();
        tracker
            .on_message(&progress(json!({
                "token": "idx",
                "value": {"kind": "report", "message": "3/10 files", "percentage": 30}
            })))
            .unwrap();

        let entry = tracker.entries().pop().unwrap();
        assert_eq!(entry.name, "Indexing");
        assert_eq!(entry.message.as_deref(), Some("3/10 files"));
        assert_eq!(entry.percentage, Some(30));

        tracker
            .on_message(&progress(json!({"token": "idx", "value": {"kind": "end"}})))
            .unwrap();
        assert_eq!(tracker.summary(), "");
    }

    #[test]
    fn test_listener_ignores_other_methods_and_rejects_garbage() {
        let tracker = ProgressTracker::new();
        let other = Message::Notification(NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: "window/logMessage".to_string(),
            params: json!({"type": 3, "message": "hi"}),
        });
        assert!(tracker.on_message(&other).is_ok());
        assert!(tracker.on_message(&progress(json!({"bogus": true}))).is_err());
        assert!(!tracker.is_busy());
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = ProgressTracker::new();
        let listener = tracker.clone();
        listener.begin(token("t"), "Loading");
        assert_eq!(tracker.summary(), "Loading");
        tracker.clear();
        assert!(!listener.is_busy());
    }
}
