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

use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionParams,
    DiagnosticClientCapabilities, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DocumentDiagnosticParams, GotoCapability, GotoDefinitionParams,
    InitializeParams, InitializedParams, Position, PublishDiagnosticsClientCapabilities,
    TextDocumentClientCapabilities, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentPositionParams, TraceValue, Uri, VersionedTextDocumentIdentifier,
    WindowClientCapabilities,
};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::document::{DocumentHandle, absolute_path};
use super::error::{LspError, Result};
use super::listener::{ListenerId, ListenerRegistry, MessageListener};
use super::protocol::{
    JSONRPC_VERSION, METHOD_NOT_FOUND, Message, NotificationMessage, RequestId, RequestMessage,
    ResponseError, ResponseMessage,
};
use super::state::ClientState;
use super::transport::{BoxedReader, FrameReader, FramingError, SharedWriter, Transport};

/// Name reported to the server in `clientInfo`.
pub const CLIENT_NAME: &str = "editor-lsp";

/// Version reported to the server in `clientInfo`.
pub const CLIENT_VERSION: &str = env!("EDITOR_LSP_VERSION");

/// Default bound on waiting for the server process to exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings sent with `initialize` and used during shutdown.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Locale sent in `initialize`.
    pub locale: String,
    /// Trace level sent in `initialize`.
    pub trace: TraceValue,
    /// Server-specific `initializationOptions`.
    pub initialization_options: Option<Value>,
    /// How long `shutdown` waits for the process before killing it.
    pub shutdown_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            trace: TraceValue::Verbose,
            initialization_options: None,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

/// Capabilities this client can actually consume.
#[must_use]
pub fn default_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            completion: Some(CompletionClientCapabilities::default()),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                version_support: Some(true),
                ..Default::default()
            }),
            diagnostic: Some(DiagnosticClientCapabilities {
                dynamic_registration: Some(false),
                related_document_support: Some(false),
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// State shared between the client and its read loop.
struct Shared {
    state: AtomicU8,
    alive: AtomicBool,
    ready: Notify,
    initialize_id: Mutex<Option<RequestId>>,
    connection_error: Mutex<Option<FramingError>>,
}

impl Shared {
    fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ClientState) {
        let previous = ClientState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst));
        if previous != state {
            debug!("LSP client state {} -> {}", previous, state);
        }
    }
}

/// Editor-side client for one language server session.
///
/// Requests return as soon as they are written; results reach the
/// registered listeners from a background read loop.
pub struct LspClient {
    transport: Transport,
    writer: SharedWriter,
    next_id: AtomicI64,
    shared: Arc<Shared>,
    listeners: ListenerRegistry,
    document: Option<DocumentHandle>,
    options: ClientOptions,
    reader_handle: Option<JoinHandle<()>>,
}

impl LspClient {
    /// Spawns the language server and starts the read loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(program: &str, args: &[String], options: ClientOptions) -> Result<Self> {
        let (transport, reader) = Transport::spawn(program, args)?;
        info!("Spawned language server: {} {}", program, args.join(" "));
        Ok(Self::from_transport(transport, reader, options))
    }

    /// Builds a client over an existing transport and starts the read loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn from_transport(
        transport: Transport,
        reader: FrameReader<BoxedReader>,
        options: ClientOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ClientState::Created.as_u8()),
            alive: AtomicBool::new(true),
            ready: Notify::new(),
            initialize_id: Mutex::new(None),
            connection_error: Mutex::new(None),
        });
        let listeners = ListenerRegistry::new();
        let writer = transport.writer();

        let read_loop = ReadLoop {
            writer: writer.clone(),
            listeners: listeners.clone(),
            shared: shared.clone(),
        };
        let reader_handle = tokio::spawn(read_loop.run(reader));

        Self {
            transport,
            writer,
            next_id: AtomicI64::new(1),
            shared,
            listeners,
            document: None,
            options,
            reader_handle: Some(reader_handle),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    /// Returns true while the read loop is running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Takes the fatal framing error that stopped the read loop, if any.
    ///
    /// Returns it once; later calls return `None`.
    pub fn take_connection_error(&self) -> Option<FramingError> {
        self.shared
            .connection_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// OS process id of the server.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    /// The open document, if any.
    #[must_use]
    pub const fn document(&self) -> Option<&DocumentHandle> {
        self.document.as_ref()
    }

    /// Id the next outbound request or notification will consume.
    #[must_use]
    pub fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.load(Ordering::SeqCst))
    }

    /// Adds a listener invoked for every inbound message.
    pub fn register_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    /// Removes a listener.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Sends `initialize` and moves to `Initializing`.
    ///
    /// The matching response moves the client to `Ready`; the caller then
    /// sends [`initialized`](Self::initialized).
    ///
    /// # Errors
    ///
    /// Returns [`LspError::Closed`] after shutdown, [`LspError::AlreadyInitialized`]
    /// if `initialize` was already sent, or a transport error.
    pub async fn initialize(&self, capabilities: ClientCapabilities) -> Result<RequestId> {
        match self.state() {
            ClientState::Created => {}
            state if state.is_open() => return Err(LspError::AlreadyInitialized),
            _ => return Err(LspError::Closed),
        }

        let params = InitializeParams {
            process_id: Some(std::process::id()),
            client_info: Some(ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: Some(CLIENT_VERSION.to_string()),
            }),
            locale: Some(self.options.locale.clone()),
            capabilities,
            trace: Some(self.options.trace),
            initialization_options: self.options.initialization_options.clone(),
            ..Default::default()
        };

        // Single-file mode: the server must see an explicit null.
        let mut params = serde_json::to_value(params)?;
        if let Some(object) = params.as_object_mut() {
            object.insert("workspaceFolders".to_string(), Value::Null);
        }

        let shared = self.shared.clone();
        self.write_request("initialize", params, move |id| {
            *shared
                .initialize_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
            shared.set_state(ClientState::Initializing);
        })
        .await
    }

    /// Sends the `initialized` notification.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::Closed`] after shutdown, or a transport error.
    pub async fn initialized(&self) -> Result<()> {
        self.ensure_open()?;
        self.write_notification("initialized", InitializedParams {})
            .await
    }

    /// Waits until the `initialize` response has arrived.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::Timeout`] if `timeout` elapses, or
    /// [`LspError::Closed`] if the connection dies first.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let wait = async {
            loop {
                let notified = self.shared.ready.notified();
                match self.state() {
                    ClientState::Ready => return Ok(()),
                    state if !state.is_open() => return Err(LspError::Closed),
                    _ => {}
                }
                if !self.is_alive() {
                    return Err(LspError::Closed);
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| LspError::Timeout(timeout, "server readiness"))?
    }

    /// Opens `path`: sends `textDocument/didOpen` with the full text at
    /// version 0.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::DocumentAlreadyOpen`] if a document is open, an
    /// IO error if the file cannot be read, or a transport error.
    pub async fn open_document(&mut self, path: &Path) -> Result<()> {
        self.ensure_open()?;
        if let Some(open) = &self.document {
            return Err(LspError::DocumentAlreadyOpen(
                open.path().display().to_string(),
            ));
        }

        let path = absolute_path(path)?;
        let text = tokio::fs::read_to_string(&path).await?;
        let handle = DocumentHandle::new(path)?;

        debug!(
            "Opening document: {} ({})",
            handle.path().display(),
            handle.language_id()
        );

        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: handle.uri().clone(),
                language_id: handle.language_id().to_string(),
                version: handle.version(),
                text,
            },
        };
        self.write_notification("textDocument/didOpen", params)
            .await?;
        self.document = Some(handle);
        Ok(())
    }

    /// Replaces the open document's text: increments the version, then sends
    /// `textDocument/didChange` with the full text.
    ///
    /// Returns the version that was sent.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NoDocument`] if no document is open, or a
    /// transport error.
    pub async fn change_document(&mut self, text: &str) -> Result<i32> {
        self.ensure_open()?;
        let document = self.document.as_mut().ok_or(LspError::NoDocument)?;
        let version = document.bump_version();
        let uri = document.uri().clone();

        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier { uri, version },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.to_string(),
            }],
        };
        self.write_notification("textDocument/didChange", params)
            .await?;
        Ok(version)
    }

    /// Sends `textDocument/didClose` and clears the document handle.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NoDocument`] if no document is open, or a
    /// transport error.
    pub async fn close_document(&mut self) -> Result<()> {
        self.ensure_open()?;
        let document = self.document.take().ok_or(LspError::NoDocument)?;
        debug!("Closing document: {}", document.path().display());

        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier {
                uri: document.uri().clone(),
            },
        };
        self.write_notification("textDocument/didClose", params)
            .await
    }

    /// Requests completions at `position` in the open document.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NoDocument`] if no document is open, or a
    /// transport error.
    pub async fn request_completion(&self, position: Position) -> Result<RequestId> {
        self.request_completion_with(position, |_| {}).await
    }

    /// Like [`request_completion`](Self::request_completion), calling
    /// `before_send` with the allocated id before the request is written.
    ///
    /// # Errors
    ///
    /// Same as [`request_completion`](Self::request_completion).
    pub async fn request_completion_with<F>(
        &self,
        position: Position,
        before_send: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(&RequestId) + Send,
    {
        self.ensure_open()?;
        let uri = self.document_uri()?;
        let params = CompletionParams {
            text_document_position: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position,
            },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: None,
        };
        self.write_request("textDocument/completion", params, before_send)
            .await
    }

    /// Requests the definition of the symbol at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NoDocument`] if no document is open, or a
    /// transport error.
    pub async fn request_definition(&self, position: Position) -> Result<RequestId> {
        self.ensure_open()?;
        let uri = self.document_uri()?;
        let params = GotoDefinitionParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position,
            },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.write_request("textDocument/definition", params, |_| {})
            .await
    }

    /// Requests pull diagnostics for the open document.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::NoDocument`] if no document is open, or a
    /// transport error.
    pub async fn request_diagnostics(&self) -> Result<RequestId> {
        self.request_diagnostics_with(|_| {}).await
    }

    /// Like [`request_diagnostics`](Self::request_diagnostics), calling
    /// `before_send` with the allocated id before the request is written.
    ///
    /// # Errors
    ///
    /// Same as [`request_diagnostics`](Self::request_diagnostics).
    pub async fn request_diagnostics_with<F>(&self, before_send: F) -> Result<RequestId>
    where
        F: FnOnce(&RequestId) + Send,
    {
        self.ensure_open()?;
        let uri = self.document_uri()?;
        let params = DocumentDiagnosticParams {
            text_document: TextDocumentIdentifier { uri },
            identifier: None,
            previous_result_id: None,
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        self.write_request("textDocument/diagnostic", params, before_send)
            .await
    }

    /// Sends `shutdown` then `exit`, waits for the process, stops the read
    /// loop and moves to `Terminated`.
    ///
    /// `shutdown` and `exit` are always both attempted, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`LspError::Closed`] if already shut down, otherwise the
    /// first failure of the sequence (the sequence still completes).
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.state().is_open() {
            return Err(LspError::Closed);
        }
        self.shared.set_state(ClientState::ShuttingDown);
        info!("Shutting down language server");

        let shutdown = self
            .write_request("shutdown", Value::Null, |_| {})
            .await
            .map(|_| ());
        let exit = self.write_notification("exit", Value::Null).await;
        self.transport.close_input().await;

        let exited = self
            .transport
            .wait_for_exit(self.options.shutdown_timeout)
            .await;

        if let Some(mut handle) = self.reader_handle.take() {
            // With a process, its exit closes stdout and ends the loop.
            let drained = matches!(exited, Ok(Some(_)))
                && tokio::time::timeout(Duration::from_millis(500), &mut handle)
                    .await
                    .is_ok();
            if !drained {
                handle.abort();
            }
        }

        self.document = None;
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.set_state(ClientState::Terminated);
        self.shared.ready.notify_waiters();

        shutdown?;
        exit?;
        exited?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state().is_open() {
            Ok(())
        } else {
            Err(LspError::Closed)
        }
    }

    fn document_uri(&self) -> Result<Uri> {
        self.document
            .as_ref()
            .map(|d| d.uri().clone())
            .ok_or(LspError::NoDocument)
    }

    /// Allocates the next id under the writer lock and sends a request.
    async fn write_request<P, F>(
        &self,
        method: &str,
        params: P,
        before_send: F,
    ) -> Result<RequestId>
    where
        P: Serialize,
        F: FnOnce(&RequestId) + Send,
    {
        let params = serde_json::to_value(params)?;
        let mut writer = self.writer.lock().await;

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = RequestMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        let body = serde_json::to_vec(&request)?;

        before_send(&id);
        trace!("Sending LSP request {} (id {})", method, id);
        writer.send(&body).await?;
        Ok(id)
    }

    /// Sends a notification. It consumes an id from the sequence but does
    /// not carry it on the wire.
    async fn write_notification<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let params = serde_json::to_value(params)?;
        let mut writer = self.writer.lock().await;

        let sequence = self.next_id.fetch_add(1, Ordering::SeqCst);
        let notification = NotificationMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        };
        let body = serde_json::to_vec(&notification)?;

        trace!("Sending LSP notification {} (seq {})", method, sequence);
        writer.send(&body).await?;
        Ok(())
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}

/// Background read loop: blocking read, decode, dispatch.
///
/// The loop never waits on the writer lock; answers to server requests
/// are written from their own task.
struct ReadLoop {
    writer: SharedWriter,
    listeners: ListenerRegistry,
    shared: Arc<Shared>,
}

impl ReadLoop {
    async fn run(self, mut reader: FrameReader<BoxedReader>) {
        loop {
            match reader.receive_one().await {
                Ok(Some(payload)) => self.handle_payload(&payload),
                Ok(None) => {
                    debug!("LSP stdout closed");
                    break;
                }
                Err(e) => {
                    error!("Unreadable LSP stream: {}", e);
                    *self
                        .shared
                        .connection_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(e);
                    break;
                }
            }
        }

        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.ready.notify_waiters();
        if self.shared.state().is_open() {
            warn!("LSP read loop exiting - server connection lost");
        }
    }

    fn handle_payload(&self, payload: &[u8]) {
        trace!("Received LSP message: {}", String::from_utf8_lossy(payload));

        let message = match Message::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable LSP message: {}", e);
                return;
            }
        };

        match &message {
            Message::Response(response) => self.note_response(response),
            Message::Request(request) => self.answer_server_request(request),
            Message::Notification(_) => {}
        }

        self.listeners.dispatch(&message);
    }

    /// Moves `Initializing` to `Ready` when the `initialize` response arrives.
    fn note_response(&self, response: &ResponseMessage) {
        let is_initialize = {
            let mut initialize_id = self
                .shared
                .initialize_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if initialize_id.is_some() && initialize_id.as_ref() == response.id.as_ref() {
                initialize_id.take();
                true
            } else {
                false
            }
        };
        if !is_initialize {
            return;
        }

        if let Some(error) = &response.error {
            warn!(
                "Language server rejected initialize: {} {}",
                error.code, error.message
            );
            return;
        }

        if self
            .shared
            .state
            .compare_exchange(
                ClientState::Initializing.as_u8(),
                ClientState::Ready.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!("Language server ready");
            self.shared.ready.notify_waiters();
        }
    }

    /// Answers server-initiated requests so the server is not left waiting.
    fn answer_server_request(&self, request: &RequestMessage) {
        debug!(
            "Received server request: {} (id: {})",
            request.method, request.id
        );

        let (result, error) = match request.method.as_str() {
            "window/workDoneProgress/create"
            | "client/registerCapability"
            | "client/unregisterCapability" => (Some(Value::Null), None),
            "workspace/configuration" => {
                let items = request
                    .params
                    .get("items")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                (Some(Value::Array(vec![Value::Null; items])), None)
            }
            method => (
                None,
                Some(ResponseError {
                    code: METHOD_NOT_FOUND,
                    message: format!("Method '{method}' not supported by client"),
                    data: None,
                }),
            ),
        };

        let response = ResponseMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(request.id.clone()),
            result,
            error,
        };

        let body = match serde_json::to_vec(&response) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode answer to {}: {}", request.method, e);
                return;
            }
        };

        let writer = self.writer.clone();
        let method = request.method.clone();
        tokio::spawn(async move {
            if let Err(e) = writer.lock().await.send(&body).await {
                warn!("Failed to answer {}: {}", method, e);
            }
        });
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Tests use unwrap/expect/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use crate::lsp::transport::encode_frame;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    /// Server side of an in-memory connection.
    struct FakeServer {
        reader: FrameReader<DuplexStream>,
        writer: DuplexStream,
    }

    impl FakeServer {
        async fn next(&mut self) -> Value {
            let payload = tokio::time::timeout(Duration::from_secs(2), self.reader.receive_one())
                .await
                .expect("timed out waiting for client message")
                .unwrap()
                .expect("client closed connection");
            serde_json::from_slice(&payload).unwrap()
        }

        async fn send(&mut self, value: &Value) {
            let body = serde_json::to_vec(value).unwrap();
            self.send_raw(&encode_frame(&body)).await;
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.unwrap();
            self.writer.flush().await.unwrap();
        }
    }

    fn connect() -> (LspClient, FakeServer) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let (transport, reader) = Transport::from_io(Box::new(client_in), Box::new(client_out));
        let client = LspClient::from_transport(transport, reader, ClientOptions::default());
        let server = FakeServer {
            reader: FrameReader::new(server_in),
            writer: server_out,
        };
        (client, server)
    }

    fn recorder(client: &LspClient) -> Arc<Mutex<Vec<Message>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        client.register_listener(Arc::new(move |message: &Message| -> anyhow::Result<()> {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        }));
        log
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn temp_document(text: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.py");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_initialize_params() {
        let (client, mut server) = connect();
        let id = client.initialize(default_capabilities()).await.unwrap();
        assert_eq!(id, RequestId::Number(1));
        assert_eq!(client.state(), ClientState::Initializing);

        let msg = server.next().await;
        assert_eq!(msg["method"], "initialize");
        assert_eq!(msg["id"], 1);
        let params = &msg["params"];
        assert_eq!(params["processId"], std::process::id());
        assert_eq!(params["clientInfo"]["name"], CLIENT_NAME);
        assert_eq!(params["locale"], "en");
        assert_eq!(params["trace"], "verbose");
        assert!(params["workspaceFolders"].is_null());
        assert!(params.as_object().unwrap().contains_key("workspaceFolders"));
        assert_eq!(
            params["capabilities"]["window"]["workDoneProgress"],
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_initialize_twice_is_rejected() {
        let (client, _server) = connect();
        client.initialize(default_capabilities()).await.unwrap();
        assert!(matches!(
            client.initialize(default_capabilities()).await,
            Err(LspError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_initialize_response_moves_to_ready() {
        let (client, mut server) = connect();
        client.initialize(default_capabilities()).await.unwrap();
        let msg = server.next().await;

        // An unrelated response first must not count.
        server
            .send(&serde_json::json!({"jsonrpc": "2.0", "id": 99, "result": null}))
            .await;
        server
            .send(&serde_json::json!({"jsonrpc": "2.0", "id": msg["id"], "result": {"capabilities": {}}}))
            .await;

        client
            .wait_until_ready(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let (client, _server) = connect();
        client.initialize(default_capabilities()).await.unwrap();
        let result = client.wait_until_ready(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LspError::Timeout(_, _))));
    }

    #[tokio::test]
    async fn test_request_ids_increase_by_one_per_message() {
        let (mut client, mut server) = connect();
        let (_dir, path) = temp_document("x = 1\n");

        let mut expected = 1;
        let mut check = |client: &LspClient| {
            expected += 1;
            assert_eq!(client.next_request_id(), RequestId::Number(expected));
        };

        client.initialize(default_capabilities()).await.unwrap();
        check(&client);
        client.initialized().await.unwrap();
        check(&client);
        client.open_document(&path).await.unwrap();
        check(&client);
        client.change_document("x = 2\n").await.unwrap();
        check(&client);
        let completion = client
            .request_completion(Position::new(0, 1))
            .await
            .unwrap();
        check(&client);
        let definition = client
            .request_definition(Position::new(0, 0))
            .await
            .unwrap();
        check(&client);
        let diagnostics = client.request_diagnostics().await.unwrap();
        check(&client);
        client.close_document().await.unwrap();
        check(&client);

        assert_eq!(completion, RequestId::Number(5));
        assert_eq!(definition, RequestId::Number(6));
        assert_eq!(diagnostics, RequestId::Number(7));

        let methods: Vec<(String, Value)> = {
            let mut out = Vec::new();
            for _ in 0..8 {
                let msg = server.next().await;
                out.push((msg["method"].as_str().unwrap().to_string(), msg["id"].clone()));
            }
            out
        };
        assert_eq!(
            methods,
            vec![
                ("initialize".to_string(), Value::from(1)),
                ("initialized".to_string(), Value::Null),
                ("textDocument/didOpen".to_string(), Value::Null),
                ("textDocument/didChange".to_string(), Value::Null),
                ("textDocument/completion".to_string(), Value::from(5)),
                ("textDocument/definition".to_string(), Value::from(6)),
                ("textDocument/diagnostic".to_string(), Value::from(7)),
                ("textDocument/didClose".to_string(), Value::Null),
            ]
        );
    }

    #[tokio::test]
    async fn test_change_document_increments_then_sends() {
        let (mut client, mut server) = connect();
        let (_dir, path) = temp_document("print(1)\n");

        client.open_document(&path).await.unwrap();
        let open = server.next().await;
        assert_eq!(open["params"]["textDocument"]["version"], 0);
        assert_eq!(open["params"]["textDocument"]["languageId"], "python");
        assert_eq!(open["params"]["textDocument"]["text"], "print(1)\n");
        assert!(
            open["params"]["textDocument"]["uri"]
                .as_str()
                .unwrap()
                .starts_with("file:///")
        );

        assert_eq!(client.change_document("y").await.unwrap(), 1);
        assert_eq!(client.change_document("y").await.unwrap(), 2);
        assert_eq!(client.document().unwrap().version(), 2);

        for expected in [1, 2] {
            let change = server.next().await;
            assert_eq!(change["method"], "textDocument/didChange");
            assert_eq!(change["params"]["textDocument"]["version"], expected);
            assert_eq!(change["params"]["contentChanges"][0]["text"], "y");
            assert!(change["params"]["contentChanges"][0].get("range").is_none());
        }
    }

    #[tokio::test]
    async fn test_document_operations_require_open_document() {
        let (mut client, _server) = connect();
        assert!(matches!(
            client.change_document("x").await,
            Err(LspError::NoDocument)
        ));
        assert!(matches!(
            client.close_document().await,
            Err(LspError::NoDocument)
        ));
        assert!(matches!(
            client.request_completion(Position::new(0, 0)).await,
            Err(LspError::NoDocument)
        ));
        assert!(matches!(
            client.request_definition(Position::new(0, 0)).await,
            Err(LspError::NoDocument)
        ));
        assert!(matches!(
            client.request_diagnostics().await,
            Err(LspError::NoDocument)
        ));
        // Failed operations consume no ids.
        assert_eq!(client.next_request_id(), RequestId::Number(1));
    }

    #[tokio::test]
    async fn test_second_open_is_rejected_and_close_clears_handle() {
        let (mut client, _server) = connect();
        let (_dir, path) = temp_document("a\n");

        client.open_document(&path).await.unwrap();
        assert!(matches!(
            client.open_document(&path).await,
            Err(LspError::DocumentAlreadyOpen(_))
        ));

        client.close_document().await.unwrap();
        assert!(client.document().is_none());
        client.open_document(&path).await.unwrap();
        assert_eq!(client.document().unwrap().version(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_right_after_initialize() {
        let (mut client, mut server) = connect();
        client.initialize(default_capabilities()).await.unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(client.state(), ClientState::Terminated);

        assert_eq!(server.next().await["method"], "initialize");
        let shutdown = server.next().await;
        assert_eq!(shutdown["method"], "shutdown");
        assert!(shutdown.get("id").is_some());
        assert!(shutdown.get("params").is_none());
        let exit = server.next().await;
        assert_eq!(exit["method"], "exit");
        assert!(exit.get("id").is_none());
        assert!(exit.get("params").is_none());

        assert!(matches!(client.shutdown().await, Err(LspError::Closed)));
        assert!(matches!(
            client.initialized().await,
            Err(LspError::Closed)
        ));
        assert!(matches!(
            client.request_diagnostics().await,
            Err(LspError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_notifications_delivered_while_request_outstanding() {
        let (mut client, mut server) = connect();
        let log = recorder(&client);
        let (_dir, path) = temp_document("x\n");

        client.open_document(&path).await.unwrap();
        let id = client
            .request_completion(Position::new(0, 1))
            .await
            .unwrap();
        server.next().await;
        server.next().await;

        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": "file:///x.py", "diagnostics": []}
            }))
            .await;
        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "$/progress",
                "params": {"token": "t", "value": {"kind": "end"}}
            }))
            .await;
        server
            .send(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "result": []}))
            .await;

        wait_for(|| log.lock().unwrap().len() == 3).await;
        let log = log.lock().unwrap();
        assert_eq!(log[0].method(), Some("textDocument/publishDiagnostics"));
        assert_eq!(log[1].method(), Some("$/progress"));
        assert!(log[2].response_to(&id).is_some());
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped_and_loop_continues() {
        let (client, mut server) = connect();
        let log = recorder(&client);

        server.send_raw(b"Content-Length: 9\r\n\r\n{not json").await;
        server
            .send(&serde_json::json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {}}))
            .await;

        wait_for(|| log.lock().unwrap().len() == 1).await;
        assert!(client.is_alive());
        assert_eq!(log.lock().unwrap()[0].method(), Some("window/logMessage"));
    }

    #[tokio::test]
    async fn test_framing_error_stops_loop_and_is_reported_once() {
        let (client, mut server) = connect();
        server.send_raw(b"Content-Type: text/plain\r\n\r\n{}").await;

        wait_for(|| !client.is_alive()).await;
        assert!(matches!(
            client.take_connection_error(),
            Some(FramingError::MissingContentLength)
        ));
        assert!(client.take_connection_error().is_none());
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() {
        let (client, mut server) = connect();
        let log = recorder(&client);

        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0", "id": "w1",
                "method": "window/workDoneProgress/create",
                "params": {"token": "idx"}
            }))
            .await;
        let reply = server.next().await;
        assert_eq!(reply["id"], "w1");
        assert!(reply["result"].is_null());
        assert!(reply.as_object().unwrap().contains_key("result"));

        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0", "id": 7,
                "method": "workspace/configuration",
                "params": {"items": [{"section": "a"}, {"section": "b"}]}
            }))
            .await;
        let reply = server.next().await;
        assert_eq!(reply["result"], serde_json::json!([null, null]));

        server
            .send(&serde_json::json!({"jsonrpc": "2.0", "id": 8, "method": "workspace/applyEdit", "params": {}}))
            .await;
        let reply = server.next().await;
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        // Requests are still dispatched, and answering them consumes no ids.
        wait_for(|| log.lock().unwrap().len() == 3).await;
        assert_eq!(client.next_request_id(), RequestId::Number(1));
    }

    #[tokio::test]
    async fn test_held_writer_does_not_stall_read_loop() {
        let (client, mut server) = connect();
        let log = recorder(&client);

        let guard = client.writer.lock().await;
        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0", "id": "c1",
                "method": "workspace/configuration",
                "params": {"items": [{}]}
            }))
            .await;
        server
            .send(&serde_json::json!({
                "jsonrpc": "2.0", "method": "window/logMessage",
                "params": {"type": 3, "message": "after"}
            }))
            .await;
        wait_for(|| log.lock().unwrap().len() == 2).await;

        drop(guard);
        let reply = server.next().await;
        assert_eq!(reply["id"], "c1");
        assert_eq!(reply["result"], serde_json::json!([null]));
    }

    #[tokio::test]
    async fn test_read_loop_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let (client_out, _server_in) = tokio::io::duplex(64);
        let (_server_out, client_in) = tokio::io::duplex(64);
        let (transport, reader) = Transport::from_io(Box::new(client_in), Box::new(client_out));
        let read_loop = ReadLoop {
            writer: transport.writer(),
            listeners: ListenerRegistry::new(),
            shared: Arc::new(Shared {
                state: AtomicU8::new(ClientState::Created.as_u8()),
                alive: AtomicBool::new(true),
                ready: Notify::new(),
                initialize_id: Mutex::new(None),
                connection_error: Mutex::new(None),
            }),
        };
        let future = read_loop.run(reader);
        assert_send(&future);
    }

    #[tokio::test]
    async fn test_unregistered_listener_stops_receiving() {
        let (client, mut server) = connect();
        let log = Arc::new(Mutex::new(0_usize));
        let sink = log.clone();
        let id = client.register_listener(Arc::new(move |_: &Message| -> anyhow::Result<()> {
            *sink.lock().unwrap() += 1;
            Ok(())
        }));
        let after = recorder(&client);

        server
            .send(&serde_json::json!({"jsonrpc": "2.0", "method": "a", "params": {}}))
            .await;
        wait_for(|| after.lock().unwrap().len() == 1).await;

        assert!(client.unregister_listener(id));
        server
            .send(&serde_json::json!({"jsonrpc": "2.0", "method": "b", "params": {}}))
            .await;
        wait_for(|| after.lock().unwrap().len() == 2).await;
        assert_eq!(*log.lock().unwrap(), 1);
    }
}
