// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Content-Length framed byte exchange with a language server process.
//!
//! A frame is a block of `Header-Name: value` lines terminated by CRLF,
//! an empty CRLF line, and exactly `Content-Length` payload bytes. The
//! same layout is used in both directions.

use bytes::{Buf, Bytes, BytesMut};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Content type announced on every outbound frame.
pub const CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf-8";

/// Upper bound on an unterminated header block.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Largest `Content-Length` accepted from the server.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 8192;

/// Boxed read half of a server connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a server connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Write half shared between the caller and the read loop (which answers
/// server-initiated requests).
pub type SharedWriter = Arc<Mutex<FrameWriter<BoxedWriter>>>;

/// The inbound byte stream does not form a valid frame.
#[derive(thiserror::Error, Debug)]
pub enum FramingError {
    /// The header block ended without a `Content-Length` header.
    #[error("header block ended without a Content-Length header")]
    MissingContentLength,

    /// `Content-Length` is not a non-negative integer.
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    /// A header line is not `Name: value` or is not UTF-8.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// No header terminator within [`MAX_HEADER_BYTES`].
    #[error("header block exceeds {0} bytes")]
    HeaderTooLarge(usize),

    /// `Content-Length` is above [`MAX_CONTENT_LENGTH`].
    #[error("Content-Length {0} exceeds the {MAX_CONTENT_LENGTH} byte limit")]
    ContentTooLarge(usize),

    /// The stream ended inside a header block.
    #[error("stream ended inside a header block")]
    TruncatedHeader,

    /// The stream ended before the declared payload was read.
    #[error("stream ended after {received} of {expected} payload bytes")]
    Truncated {
        /// Declared `Content-Length`.
        expected: usize,
        /// Bytes available when the stream ended.
        received: usize,
    },

    /// Reading from the pipe failed.
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Sending to the server process failed.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The server binary could not be started.
    #[error("failed to spawn language server {program:?}: {source}")]
    Spawn {
        /// Program that was spawned.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without the named pipe.
    #[error("language server process has no {0} pipe")]
    MissingPipe(&'static str),

    /// Writing or flushing failed (pipe closed, process exited).
    #[error("write to language server failed: {0}")]
    Io(#[from] std::io::Error),

    /// A previous write failed or the input was closed.
    #[error("language server pipe is closed")]
    Closed,
}

/// Builds a complete frame around `payload`.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> BytesMut {
    let header = format!(
        "Content-Length: {}\r\nContent-Type: {CONTENT_TYPE}\r\n\r\n",
        payload.len()
    );
    let mut frame = BytesMut::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Splits one complete frame off the front of `buffer`.
///
/// Returns `Ok(None)` when more bytes are needed.
///
/// # Errors
///
/// Returns a [`FramingError`] if the header block is malformed or lacks
/// `Content-Length`.
pub fn try_parse_frame(buffer: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
    let Some(header_len) = find_header_end(buffer) else {
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(FramingError::HeaderTooLarge(MAX_HEADER_BYTES));
        }
        return Ok(None);
    };

    let content_length = parse_headers(&buffer[..header_len])?;
    if content_length > MAX_CONTENT_LENGTH {
        return Err(FramingError::ContentTooLarge(content_length));
    }
    let body_start = header_len + HEADER_TERMINATOR.len();

    if buffer.len() < body_start + content_length {
        return Ok(None);
    }

    buffer.advance(body_start);
    Ok(Some(buffer.split_to(content_length).freeze()))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Returns the `Content-Length` of a header block; other headers are ignored.
fn parse_headers(block: &[u8]) -> Result<usize, FramingError> {
    let headers = std::str::from_utf8(block)
        .map_err(|_| FramingError::MalformedHeader(String::from_utf8_lossy(block).into_owned()))?;

    let mut content_length = None;
    for line in headers.split("\r\n").filter(|line| !line.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(FramingError::MalformedHeader(line.to_string()));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            content_length = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?,
            );
        }
    }

    content_length.ok_or(FramingError::MissingContentLength)
}

/// Reads frames from the server's stdout.
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Blocks until one complete frame is available and returns its payload.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] for a malformed header block, or when the
    /// stream ends inside a frame.
    pub async fn receive_one(&mut self) -> Result<Option<Bytes>, FramingError> {
        loop {
            if let Some(frame) = try_parse_frame(&mut self.buffer)? {
                trace!("Received frame of {} bytes", frame.len());
                return Ok(Some(frame));
            }

            self.buffer.reserve(READ_CHUNK);
            if self.inner.read_buf(&mut self.buffer).await? == 0 {
                return self.end_of_stream();
            }
        }
    }

    fn end_of_stream(&self) -> Result<Option<Bytes>, FramingError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let Some(header_len) = find_header_end(&self.buffer) else {
            return Err(FramingError::TruncatedHeader);
        };
        let expected = parse_headers(&self.buffer[..header_len])?;
        Err(FramingError::Truncated {
            expected,
            received: self.buffer.len() - header_len - HEADER_TERMINATOR.len(),
        })
    }
}

/// Writes frames to the server's stdin.
pub struct FrameWriter<W> {
    inner: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps a byte sink.
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    /// Frames `payload`, writes it and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if an earlier write failed, or
    /// [`TransportError::Io`] if this one does.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let frame = encode_frame(payload);
        if let Err(e) = write_all_flush(&mut self.inner, &frame).await {
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Closes the sink so the server sees end of input.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.inner.shutdown().await {
                debug!("Closing server input failed: {}", e);
            }
        }
    }

    /// Whether later sends will fail.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

async fn write_all_flush<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Owns the language server process and the write half of its pipes.
pub struct Transport {
    writer: SharedWriter,
    child: Option<Child>,
}

impl Transport {
    /// Spawns `program` with piped stdin/stdout and returns the transport
    /// together with the reader for its stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub fn spawn(
        program: &str,
        args: &[String],
    ) -> Result<(Self, FrameReader<BoxedReader>), TransportError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingPipe("stdout"))?;

        debug!("Spawned language server {} (pid {:?})", program, child.id());

        let (mut transport, reader) = Self::from_io(Box::new(stdout), Box::new(stdin));
        transport.child = Some(child);
        Ok((transport, reader))
    }

    /// Builds a transport over an existing pipe pair with no process.
    pub fn from_io(reader: BoxedReader, writer: BoxedWriter) -> (Self, FrameReader<BoxedReader>) {
        let transport = Self {
            writer: Arc::new(Mutex::new(FrameWriter::new(writer))),
            child: None,
        };
        (transport, FrameReader::new(reader))
    }

    /// Returns the shared write half.
    #[must_use]
    pub fn writer(&self) -> SharedWriter {
        self.writer.clone()
    }

    /// Writes one framed payload.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the pipe is closed or the write fails.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.writer.lock().await.send(payload).await
    }

    /// Closes the server's stdin.
    pub async fn close_input(&self) {
        self.writer.lock().await.close().await;
    }

    /// OS process id of the server, if a process is attached and running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Waits for the server to exit, killing it once `timeout` elapses.
    ///
    /// Returns `Ok(None)` when no process is attached.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on or killing the process fails.
    pub async fn wait_for_exit(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ExitStatus>, TransportError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };

        if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
            let status = status?;
            debug!("Language server exited with {}", status);
            return Ok(Some(status));
        }

        warn!(
            "Language server did not exit within {:?}, killing it",
            timeout
        );
        child.kill().await?;
        Ok(Some(child.wait().await?))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Tests use unwrap/expect for clear failure messages"
)]
mod tests {
    use super::*;

    fn frame(body: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
    }

    #[test]
    fn test_parse_complete_message() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let mut buffer = BytesMut::from(frame(body).as_str());

        let result = try_parse_frame(&mut buffer).unwrap();
        assert_eq!(result.as_deref(), Some(body.as_bytes()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_incomplete_header() {
        let mut buffer = BytesMut::from("Content-Length: 10\r\n");
        assert!(try_parse_frame(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_parse_incomplete_body() {
        let mut buffer = BytesMut::from("Content-Length: 100\r\n\r\n{\"partial\":");
        assert!(try_parse_frame(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_parse_multiple_messages() {
        let body1 = r#"{"jsonrpc":"2.0","id":1}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2}"#;
        let raw = format!("{}{}", frame(body1), frame(body2));
        let mut buffer = BytesMut::from(raw.as_str());

        let first = try_parse_frame(&mut buffer).unwrap();
        assert_eq!(first.as_deref(), Some(body1.as_bytes()));
        let second = try_parse_frame(&mut buffer).unwrap();
        assert_eq!(second.as_deref(), Some(body2.as_bytes()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_case_insensitive_header_and_content_type() {
        let body = r#"{"test":true}"#;
        let raw = format!(
            "content-length: {}\r\nContent-Type: {CONTENT_TYPE}\r\n\r\n{body}",
            body.len()
        );
        let mut buffer = BytesMut::from(raw.as_str());

        let result = try_parse_frame(&mut buffer).unwrap();
        assert_eq!(result.as_deref(), Some(body.as_bytes()));
    }

    #[test]
    fn test_parse_missing_content_length() {
        let mut buffer = BytesMut::from("Content-Type: text/plain\r\n\r\n{}");
        let err = try_parse_frame(&mut buffer).unwrap_err();
        assert!(matches!(err, FramingError::MissingContentLength));
    }

    #[test]
    fn test_parse_invalid_content_length() {
        let mut buffer = BytesMut::from("Content-Length: lots\r\n\r\n{}");
        let err = try_parse_frame(&mut buffer).unwrap_err();
        assert!(matches!(err, FramingError::InvalidContentLength(v) if v == "lots"));
    }

    #[test]
    fn test_parse_malformed_header_line() {
        let mut buffer = BytesMut::from("Content-Length 2\r\n\r\n{}");
        let err = try_parse_frame(&mut buffer).unwrap_err();
        assert!(matches!(err, FramingError::MalformedHeader(_)));
    }

    #[test]
    fn test_parse_header_too_large() {
        let mut buffer = BytesMut::from("X".repeat(MAX_HEADER_BYTES + 1).as_str());
        let err = try_parse_frame(&mut buffer).unwrap_err();
        assert!(matches!(err, FramingError::HeaderTooLarge(_)));
    }

    #[test]
    fn test_parse_content_length_too_large() {
        let mut buffer = BytesMut::from("Content-Length: 18446744073709551615\r\n\r\n{}");
        let err = try_parse_frame(&mut buffer).unwrap_err();
        assert!(matches!(err, FramingError::ContentTooLarge(usize::MAX)));

        let header = format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1);
        let mut buffer = BytesMut::from(header.as_str());
        let err = try_parse_frame(&mut buffer).unwrap_err();
        assert!(matches!(err, FramingError::ContentTooLarge(_)));
    }

    #[test]
    fn test_encode_frame_uses_byte_length() {
        let body = r#"{"label":"héllo"}"#;
        let encoded = encode_frame(body.as_bytes());
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n", body.len())));
        assert!(text.contains(CONTENT_TYPE));
        assert!(text.ends_with(body));
    }

    #[tokio::test]
    async fn test_writer_and_reader_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let value = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "textDocument/completion",
            "params": { "position": { "line": 3, "character": 4 } }
        });
        writer
            .send(serde_json::to_string(&value).unwrap().as_bytes())
            .await
            .unwrap();

        let payload = reader.receive_one().await.unwrap().expect("frame");
        let decoded: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn test_reader_clean_eof_returns_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = FrameReader::new(server);
        assert!(reader.receive_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_truncated_payload() {
        let (mut client, server) = tokio::io::duplex(256);
        client
            .write_all(b"Content-Length: 40\r\n\r\n{\"jsonrpc\":")
            .await
            .unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let err = reader.receive_one().await.unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated {
                expected: 40,
                received: 11
            }
        ));
    }

    #[tokio::test]
    async fn test_reader_truncated_header() {
        let (mut client, server) = tokio::io::duplex(256);
        client.write_all(b"Content-Len").await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let err = reader.receive_one().await.unwrap_err();
        assert!(matches!(err, FramingError::TruncatedHeader));
    }

    #[tokio::test]
    async fn test_writer_fails_after_peer_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut writer = FrameWriter::new(client);

        let err = writer.send(b"{}").await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(writer.is_closed());

        let err = writer.send(b"{}").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_transport_without_process_has_no_pid() {
        let (client, _server) = tokio::io::duplex(64);
        let (read_half, write_half) = tokio::io::split(client);
        let (mut transport, _reader) =
            Transport::from_io(Box::new(read_half), Box::new(write_half));
        assert!(transport.pid().is_none());
        assert!(
            transport
                .wait_for_exit(Duration::from_millis(10))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let result = Transport::spawn("definitely-not-a-language-server-binary", &[]);
        assert!(matches!(result, Err(TransportError::Spawn { .. })));
    }
}
