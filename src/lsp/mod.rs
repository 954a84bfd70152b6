// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Asynchronous LSP client with a background read loop.
pub mod client;
/// The single open document.
pub mod document;
/// Error taxonomy.
pub mod error;
/// Inbound message listeners.
pub mod listener;
/// LSP message protocol definitions.
pub mod protocol;
/// Editor-facing session with a disabled variant.
pub mod session;
/// Client lifecycle state.
pub mod state;
/// Content-Length framing and process ownership.
pub mod transport;

pub use client::{ClientOptions, LspClient, default_capabilities};
pub use document::DocumentHandle;
pub use error::{LspError, Result};
pub use listener::{ListenerId, ListenerRegistry, MessageListener};
pub use protocol::{
    Message, NotificationMessage, RequestId, RequestMessage, ResponseError, ResponseMessage,
};
pub use session::{ActiveSession, LspSession};
pub use state::ClientState;
pub use transport::{FramingError, Transport, TransportError};
