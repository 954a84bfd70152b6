// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for the LSP client and its consumers.

use std::time::Duration;

use super::transport::{FramingError, TransportError};

/// Errors surfaced by the LSP client, the completion session and the
/// document lifecycle.
#[derive(thiserror::Error, Debug)]
pub enum LspError {
    /// The inbound stream could not be split into frames.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A write to the server process failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An operation needs an open document and none is open.
    #[error("no document is open")]
    NoDocument,

    /// `openDocument` was called while another document is open.
    #[error("a document is already open: {0}")]
    DocumentAlreadyOpen(String),

    /// `initialize` was already sent on this client.
    #[error("initialize was already sent")]
    AlreadyInitialized,

    /// A completion session was started while one is active.
    #[error("completion session is already active")]
    AlreadyActive,

    /// A completion operation needs an active session.
    #[error("completion session is not active")]
    NotActive,

    /// The client has been shut down.
    #[error("LSP client is closed")]
    Closed,

    /// A bounded wait ran out.
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    /// A path could not be turned into a `file://` URI.
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    /// Serialization of an outbound message failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem access failed (reading the document, spawning the server).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T, E = LspError> = std::result::Result<T, E>;
