// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Editor-side Language Server Protocol integration.
//!
//! An [`lsp::LspClient`] drives one language server over stdio and hands
//! every inbound message to its listeners. Three listeners turn those
//! messages into editor state: [`completion::CompletionSession`],
//! [`diagnostics::DiagnosticStore`] and [`progress::ProgressTracker`].
//! The UI thread reads that state and draws it through [`ui::Surface`].

/// Line access into the editor buffer.
pub mod buffer;
/// Completion requests and the suggestion popup.
pub mod completion;
/// Configuration handling for the language server and session settings.
pub mod config;
/// Diagnostic storage and inline rendering.
pub mod diagnostics;
/// LSP client implementation and session management.
pub mod lsp;
/// Server progress tracking.
pub mod progress;
/// Styles, draw surfaces and text helpers.
pub mod ui;
