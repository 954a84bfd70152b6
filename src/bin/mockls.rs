// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock language server for testing the editor client.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. CLI flags control completions, diagnostics, progress, timing
//! and failure modes. No tokio, uses `std::thread` for deferred messages.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Labels offered when no `--completion` is given.
const DEFAULT_COMPLETIONS: [&str; 3] = ["print", "println", "printf"];

/// Progress token used for the simulated background work.
const PROGRESS_TOKEN: &str = "mockls-progress";

/// Mock language server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Emit progress begin/report/end after initialized, ending after this
    /// many milliseconds. Zero disables progress.
    #[arg(long, default_value_t = 0)]
    progress_delay: u64,

    /// Title of the simulated progress.
    #[arg(long, default_value = "Indexing")]
    progress_title: String,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Answer completion requests from a background thread after this many
    /// milliseconds, leaving the read loop free.
    #[arg(long, default_value_t = 0)]
    completion_delay: u64,

    /// Completion label to offer (repeatable).
    #[arg(long = "completion")]
    completions: Vec<String>,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Close stdout after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Send workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,
}

/// A JSON-RPC request.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// An open document as the server sees it.
struct OpenDocument {
    version: i64,
    text: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create a writer that forwards to stdout.
fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    documents: HashMap<String, OpenDocument>,
    response_count: u64,
    writer: Writer,
    shutdown_flag: Arc<AtomicBool>,
    next_request_id: Arc<AtomicU64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run the server, reading from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                break;
            }

            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };

                self.handle_message(request);
            }
        }
    }

    fn handle_message(&mut self, request: Request) {
        // Responses to our own requests carry no method.
        let Some(method) = request.method.clone() else {
            return;
        };

        if request.id.is_some() {
            self.handle_request(&method, request);
        } else {
            self.handle_notification(&method, &request.params);
        }
    }

    fn handle_request(&mut self, method: &str, request: Request) {
        let Some(id) = request.id else { return };

        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response::failure(
                id,
                -32603,
                format!("mockls: configured to fail on {method}"),
            ));
            return;
        }

        let result = match method {
            "initialize" => Self::handle_initialize(),
            "shutdown" => Value::Null,
            "textDocument/completion" => {
                let items = self.completion_items();
                if self.args.completion_delay > 0 {
                    self.defer_response(id, items, self.args.completion_delay);
                    return;
                }
                items
            }
            "textDocument/definition" => self.handle_definition(&request.params),
            "textDocument/diagnostic" => self.handle_pull_diagnostics(&request.params),
            _ => {
                self.send_response(&Response::failure(
                    id,
                    -32601,
                    format!("mockls: method not found: {method}"),
                ));
                return;
            }
        };

        self.send_response(&Response::success(id, result));

        if method == "initialize" && self.args.send_configuration_request {
            self.send_configuration_request();
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if self.args.progress_delay > 0 {
                    self.start_progress_simulation();
                }
            }
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    let version = td.get("version").and_then(Value::as_i64).unwrap_or(0);
                    self.documents.insert(
                        uri.to_string(),
                        OpenDocument {
                            version,
                            text: text.to_string(),
                        },
                    );
                    self.publish_diagnostics(uri);
                }
            }
            "textDocument/didChange" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let version = td.get("version").and_then(Value::as_i64).unwrap_or(0);
                    if let Some(text) = params
                        .get("contentChanges")
                        .and_then(Value::as_array)
                        .and_then(|arr| arr.last())
                        .and_then(|c| c.get("text"))
                        .and_then(Value::as_str)
                    {
                        self.documents.insert(
                            uri.to_string(),
                            OpenDocument {
                                version,
                                text: text.to_string(),
                            },
                        );
                    }
                    self.publish_diagnostics(uri);
                }
            }
            "textDocument/didClose" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    self.documents.remove(uri);
                }
            }
            "exit" => {
                self.shutdown_flag.store(true, Ordering::SeqCst);
                std::process::exit(0);
            }
            // $/setTrace, $/cancelRequest and all others are silently accepted
            _ => {}
        }
    }

    fn handle_initialize() -> Value {
        serde_json::json!({
            "capabilities": {
                "completionProvider": { "triggerCharacters": ["."] },
                "definitionProvider": true,
                "diagnosticProvider": {
                    "interFileDependencies": false,
                    "workspaceDiagnostics": false
                },
                "textDocumentSync": {
                    "openClose": true,
                    "change": 1
                }
            },
            "serverInfo": { "name": "mockls" }
        })
    }

    fn completion_items(&self) -> Value {
        let items: Vec<Value> = if self.args.completions.is_empty() {
            DEFAULT_COMPLETIONS
                .iter()
                .map(|label| completion_item(label))
                .collect()
        } else {
            self.args
                .completions
                .iter()
                .map(|label| completion_item(label))
                .collect()
        };

        serde_json::json!({ "isIncomplete": false, "items": items })
    }

    fn handle_definition(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return Value::Null;
        };
        let Some(document) = self.documents.get(uri) else {
            return Value::Null;
        };
        let Some(word) = extract_word(&document.text, line, col) else {
            return Value::Null;
        };

        // First occurrence of the word counts as its definition.
        for (line_idx, line_text) in document.text.lines().enumerate() {
            if let Some(col_idx) = line_text.find(&word) {
                return location_json(uri, line_idx, col_idx, col_idx + word.len());
            }
        }
        Value::Null
    }

    fn handle_pull_diagnostics(&self, params: &Value) -> Value {
        let items = params
            .get("textDocument")
            .and_then(|td| td.get("uri"))
            .and_then(Value::as_str)
            .and_then(|uri| self.documents.get(uri))
            .map(|document| mock_diagnostics(&document.text))
            .unwrap_or_default();

        serde_json::json!({ "kind": "full", "items": items })
    }

    fn publish_diagnostics(&self, uri: &str) {
        if self.args.no_diagnostics {
            return;
        }
        let Some(document) = self.documents.get(uri) else {
            return;
        };

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "version": document.version,
                "diagnostics": mock_diagnostics(&document.text)
            }
        });

        let delay = self.args.diagnostics_delay;
        if delay > 0 {
            let writer = self.writer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                send_message(&writer, &notification);
            });
        } else {
            send_message(&self.writer, &notification);
        }
    }

    fn start_progress_simulation(&self) {
        let delay = self.args.progress_delay;
        let title = self.args.progress_title.clone();
        let writer = self.writer.clone();
        let next_id = self.next_request_id.clone();

        std::thread::spawn(move || {
            let req_id = next_id.fetch_add(1, Ordering::SeqCst);
            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": req_id,
                    "method": "window/workDoneProgress/create",
                    "params": { "token": PROGRESS_TOKEN }
                }),
            );

            std::thread::sleep(Duration::from_millis(50));

            send_progress(
                &writer,
                &serde_json::json!({ "kind": "begin", "title": title, "percentage": 0 }),
            );
            send_progress(
                &writer,
                &serde_json::json!({ "kind": "report", "message": "halfway", "percentage": 50 }),
            );

            std::thread::sleep(Duration::from_millis(delay));

            send_progress(
                &writer,
                &serde_json::json!({ "kind": "end", "message": format!("{title} complete") }),
            );
        });
    }

    fn send_configuration_request(&self) {
        let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        send_message(
            &self.writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "mockls" }] }
            }),
        );
    }

    /// Answers `id` from a background thread after `delay_ms`.
    fn defer_response(&self, id: Value, result: Value, delay_ms: u64) {
        let writer = self.writer.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay_ms));
            if let Ok(json) = serde_json::to_string(&Response::success(id, result)) {
                write_framed(&writer, &json);
            }
        });
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };

        write_framed(&self.writer, &json);

        self.response_count += 1;

        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

fn completion_item(label: &str) -> Value {
    serde_json::json!({
        "label": label,
        "kind": 3,
        "detail": format!("mockls: {label}"),
        "insertText": label
    })
}

/// Diagnostics for `text`: a warning on the first line and an error on
/// every line containing `FIXME`.
fn mock_diagnostics(text: &str) -> Vec<Value> {
    let mut diagnostics = vec![diagnostic_json(0, 0, 1, 2, "mockls: mock diagnostic")];

    for (line_idx, line_text) in text.lines().enumerate() {
        if let Some(col) = line_text.find("FIXME") {
            diagnostics.push(diagnostic_json(
                line_idx,
                col,
                col + "FIXME".len(),
                1,
                "mockls: unresolved FIXME",
            ));
        }
    }

    diagnostics
}

fn diagnostic_json(line: usize, start: usize, end: usize, severity: u8, message: &str) -> Value {
    serde_json::json!({
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        },
        "severity": severity,
        "source": "mockls",
        "message": message
    })
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

/// Build a JSON `Location` object.
fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    serde_json::json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Send a `$/progress` notification for the simulated work.
fn send_progress(writer: &Writer, value: &Value) {
    send_message(
        writer,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "method": "$/progress",
            "params": { "token": PROGRESS_TOKEN, "value": value }
        }),
    );
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn main() {
    let args = Args::parse();
    let writer = stdout_writer();
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn default_args() -> Args {
        Args {
            progress_delay: 0,
            progress_title: "Indexing".to_string(),
            response_delay: 0,
            completion_delay: 0,
            completions: vec![],
            diagnostics_delay: 0,
            no_diagnostics: false,
            drop_after: None,
            hang_on: vec![],
            fail_on: vec![],
            send_configuration_request: false,
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_wait(args: Args, input: &[u8], wait_ms: u64) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        std::thread::sleep(Duration::from_millis(wait_ms));
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        run_server_wait(args, input, 0)
    }

    fn response_for(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id) && m.get("method").is_none())
            .expect("response with matching id")
    }

    fn request(id: u64, method: &str, params: &Value) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        })
        .to_string()
    }

    fn notification(method: &str, params: &Value) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        })
        .to_string()
    }

    fn initialize_request(id: u64) -> String {
        request(
            id,
            "initialize",
            &serde_json::json!({
                "processId": null,
                "capabilities": {},
                "rootUri": null,
                "workspaceFolders": null
            }),
        )
    }

    fn shutdown_request(id: u64) -> String {
        request(id, "shutdown", &Value::Null)
    }

    fn did_open(uri: &str, text: &str) -> String {
        notification(
            "textDocument/didOpen",
            &serde_json::json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": "python",
                    "version": 0,
                    "text": text
                }
            }),
        )
    }

    fn position_params(uri: &str, line: u64, character: u64) -> Value {
        serde_json::json!({
            "textDocument": { "uri": uri },
            "position": { "line": line, "character": character }
        })
    }

    #[test]
    fn test_initialize_advertises_capabilities() {
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(default_args(), &input);

        let resp = response_for(&messages, 1);
        assert!(resp["error"].is_null(), "Expected no error");
        let caps = &resp["result"]["capabilities"];
        assert!(caps["completionProvider"].is_object());
        assert!(caps["diagnosticProvider"].is_object());
        assert_eq!(caps["definitionProvider"], true);
    }

    #[test]
    fn test_completion_returns_configured_labels() {
        let uri = "file:///tmp/test.py";
        let mut args = default_args();
        args.completions = vec!["alpha".to_string(), "beta".to_string()];

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, "x = 1\n")));
        input.extend(frame(&request(
            2,
            "textDocument/completion",
            &position_params(uri, 0, 1),
        )));

        let messages = run_server_with(args, &input);

        let items = response_for(&messages, 2)["result"]["items"]
            .as_array()
            .expect("completion items");
        let labels: Vec<&str> = items.iter().filter_map(|i| i["label"].as_str()).collect();
        assert_eq!(labels, vec!["alpha", "beta"]);
        assert_eq!(items[0]["insertText"], "alpha");
    }

    #[test]
    fn test_completion_defaults() {
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&request(
            2,
            "textDocument/completion",
            &position_params("file:///tmp/none.py", 0, 0),
        )));

        let messages = run_server_with(default_args(), &input);

        let items = response_for(&messages, 2)["result"]["items"]
            .as_array()
            .expect("completion items");
        assert_eq!(items.len(), DEFAULT_COMPLETIONS.len());
    }

    #[test]
    fn test_delayed_completion_arrives_later() {
        let mut args = default_args();
        args.completion_delay = 100;

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&request(
            2,
            "textDocument/completion",
            &position_params("file:///tmp/none.py", 0, 0),
        )));

        let messages = run_server_wait(args, &input, 300);
        assert!(response_for(&messages, 2)["result"]["items"].is_array());
    }

    #[test]
    fn test_published_diagnostics_carry_version() {
        let uri = "file:///tmp/test.py";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, "x = 1\ny = 2  # FIXME\n")));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(default_args(), &input);

        let diag = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
            })
            .expect("publishDiagnostics notification");

        let params = &diag["params"];
        assert_eq!(params["uri"], uri);
        assert_eq!(params["version"], 0);
        let diagnostics = params["diagnostics"].as_array().expect("diagnostics array");
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0]["severity"], 2);
        assert_eq!(diagnostics[1]["severity"], 1);
        assert_eq!(diagnostics[1]["range"]["start"]["line"], 1);
        assert_eq!(diagnostics[1]["range"]["start"]["character"], 9);
    }

    #[test]
    fn test_change_republishes_with_new_version() {
        let uri = "file:///tmp/test.py";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, "x = 1\n")));
        input.extend(frame(&notification(
            "textDocument/didChange",
            &serde_json::json!({
                "textDocument": { "uri": uri, "version": 1 },
                "contentChanges": [{ "text": "x = 2\n" }]
            }),
        )));

        let messages = run_server_with(default_args(), &input);

        let versions: Vec<i64> = messages
            .iter()
            .filter(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
            })
            .filter_map(|m| m["params"]["version"].as_i64())
            .collect();
        assert_eq!(versions, vec![0, 1]);
    }

    #[test]
    fn test_no_diagnostics_flag() {
        let mut args = default_args();
        args.no_diagnostics = true;

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open("file:///tmp/test.py", "x\n")));

        let messages = run_server_with(args, &input);
        assert!(messages.iter().all(|m| m.get("method").is_none()));
    }

    #[test]
    fn test_pull_diagnostics_full_report() {
        let uri = "file:///tmp/test.py";
        let mut args = default_args();
        args.no_diagnostics = true;

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, "FIXME\n")));
        input.extend(frame(&request(
            2,
            "textDocument/diagnostic",
            &serde_json::json!({ "textDocument": { "uri": uri } }),
        )));

        let messages = run_server_with(args, &input);

        let result = &response_for(&messages, 2)["result"];
        assert_eq!(result["kind"], "full");
        let items = result["items"].as_array().expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["message"], "mockls: unresolved FIXME");
    }

    #[test]
    fn test_definition_finds_first_occurrence() {
        let uri = "file:///tmp/test.py";
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, "def my_func():\n    pass\nmy_func()\n")));
        input.extend(frame(&request(
            2,
            "textDocument/definition",
            &position_params(uri, 2, 1),
        )));

        let messages = run_server_with(default_args(), &input);

        let result = &response_for(&messages, 2)["result"];
        assert_eq!(result["uri"], uri);
        assert_eq!(result["range"]["start"]["line"], 0);
        assert_eq!(result["range"]["start"]["character"], 4);
    }

    #[test]
    fn test_progress_sequence() {
        let mut args = default_args();
        args.progress_delay = 100;
        args.progress_title = "Linting".to_string();

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&notification("initialized", &serde_json::json!({}))));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_wait(args, &input, 300);

        let has_create = messages.iter().any(|m| {
            m.get("method").and_then(Value::as_str) == Some("window/workDoneProgress/create")
        });
        assert!(
            has_create,
            "Expected workDoneProgress/create. Got: {messages:?}"
        );

        let kinds: Vec<&str> = messages
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some("$/progress"))
            .filter_map(|m| m["params"]["value"]["kind"].as_str())
            .collect();
        assert_eq!(kinds, vec!["begin", "report", "end"]);

        let begin = messages
            .iter()
            .find(|m| m["params"]["value"]["kind"] == "begin")
            .expect("begin");
        assert_eq!(begin["params"]["value"]["title"], "Linting");
        assert_eq!(begin["params"]["token"], PROGRESS_TOKEN);
    }

    #[test]
    fn test_fail_on_and_unknown_method() {
        let mut args = default_args();
        args.fail_on = vec!["textDocument/completion".to_string()];

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&request(
            2,
            "textDocument/completion",
            &position_params("file:///tmp/a.py", 0, 0),
        )));
        input.extend(frame(&request(3, "textDocument/hover", &Value::Null)));

        let messages = run_server_with(args, &input);

        assert_eq!(response_for(&messages, 2)["error"]["code"], -32603);
        assert_eq!(response_for(&messages, 3)["error"]["code"], -32601);
    }

    #[test]
    fn test_hang_on_never_responds() {
        let mut args = default_args();
        args.hang_on = vec!["shutdown".to_string()];

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(args, &input);
        assert!(
            !messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_u64) == Some(2))
        );
    }

    #[test]
    fn test_configuration_request_follows_initialize() {
        let mut args = default_args();
        args.send_configuration_request = true;

        let messages = run_server_with(args, &frame(&initialize_request(1)));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["method"], "workspace/configuration");
        assert_eq!(messages[1]["id"], 1);
    }

    #[test]
    fn test_request_id_echo() {
        let init = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "initialize",
            "params": { "processId": null, "capabilities": {}, "rootUri": null }
        })
        .to_string();
        let shutdown = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "string-id",
            "method": "shutdown",
            "params": null
        })
        .to_string();

        let mut input = frame(&init);
        input.extend(frame(&shutdown));

        let messages = run_server_with(default_args(), &input);

        assert_eq!(messages[0]["id"], 42, "Init should echo numeric id");

        let shutdown_resp = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_str) == Some("string-id"));
        assert!(shutdown_resp.is_some(), "Shutdown should echo string id");
    }

    #[test]
    fn test_extract_word() {
        assert_eq!(extract_word("foo bar_baz", 0, 5).as_deref(), Some("bar_baz"));
        assert_eq!(extract_word("foo  bar", 0, 3), None);
        assert_eq!(extract_word("foo", 1, 0), None);
    }
}
