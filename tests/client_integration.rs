// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for `LspClient` against the `mockls` mock server.

use anyhow::{Context, Result, bail};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::tempdir;

use editor_lsp::diagnostics::DiagnosticStore;
use editor_lsp::lsp::{
    ClientOptions, ClientState, DocumentHandle, LspClient, LspError, Message, RequestId,
    default_capabilities,
};

const MOCKLS: &str = env!("CARGO_BIN_EXE_mockls");

fn spawn_mockls(args: &[&str]) -> Result<LspClient> {
    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
    let options = ClientOptions {
        shutdown_timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    };
    LspClient::spawn(MOCKLS, &args, options).context("Failed to spawn mockls")
}

async fn handshake(client: &LspClient) -> Result<()> {
    client.initialize(default_capabilities()).await?;
    client.wait_until_ready(Duration::from_secs(5)).await?;
    client.initialized().await?;
    Ok(())
}

/// Polls `condition` every 10ms for up to five seconds.
async fn eventually(what: &str, condition: impl Fn() -> bool) -> Result<()> {
    for _ in 0..500 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("Timed out waiting for {what}")
}

#[tokio::test]
async fn test_handshake_reaches_ready_and_shutdown_terminates() -> Result<()> {
    let mut client = spawn_mockls(&[])?;
    assert_eq!(client.state(), ClientState::Created);
    assert!(client.pid().is_some());

    let id = client.initialize(default_capabilities()).await?;
    assert_eq!(id, RequestId::Number(1));
    client.wait_until_ready(Duration::from_secs(5)).await?;
    assert_eq!(client.state(), ClientState::Ready);
    client.initialized().await?;

    client.shutdown().await?;
    assert_eq!(client.state(), ClientState::Terminated);
    assert!(!client.is_alive());
    assert!(matches!(client.shutdown().await, Err(LspError::Closed)));
    Ok(())
}

#[tokio::test]
async fn test_ids_are_monotonic_across_requests_and_notifications() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("main.py");
    std::fs::write(&path, "print(1)\n")?;

    let mut client = spawn_mockls(&[])?;
    handshake(&client).await?; // 1: initialize, 2: initialized
    client.open_document(&path).await?; // 3

    let completion = client
        .request_completion(lsp_types::Position::new(0, 2))
        .await?;
    let definition = client
        .request_definition(lsp_types::Position::new(0, 0))
        .await?;
    let pull = client.request_diagnostics().await?;

    assert_eq!(completion, RequestId::Number(4));
    assert_eq!(definition, RequestId::Number(5));
    assert_eq!(pull, RequestId::Number(6));
    assert_eq!(client.next_request_id(), RequestId::Number(7));

    client.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_document_versions_follow_changes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("main.py");
    std::fs::write(&path, "x = 1\n")?;

    let mut client = spawn_mockls(&[])?;
    let store = DiagnosticStore::new();
    client.register_listener(Arc::new(store.clone()));
    handshake(&client).await?;

    store.track_document(DocumentHandle::new(path.clone())?.uri().clone());
    client.open_document(&path).await?;
    eventually("version 0 diagnostics", || store.version() == Some(0)).await?;

    assert_eq!(client.change_document("x = 2\n").await?, 1);
    assert_eq!(client.change_document("x = 3  # FIXME\n").await?, 2);
    eventually("version 2 diagnostics", || store.version() == Some(2)).await?;
    assert_eq!(store.len(), 2);

    assert!(matches!(
        client.open_document(&path).await,
        Err(LspError::DocumentAlreadyOpen(_))
    ));

    client.close_document().await?;
    assert!(matches!(
        client.change_document("y").await,
        Err(LspError::NoDocument)
    ));

    client.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_server_requests_are_answered_and_dispatched() -> Result<()> {
    let mut client = spawn_mockls(&["--send-configuration-request"])?;
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.register_listener(Arc::new(move |message: &Message| -> Result<()> {
        if let Message::Request(request) = message {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.method.clone());
        }
        Ok(())
    }));

    handshake(&client).await?;
    eventually("configuration request", || {
        seen.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|m| m == "workspace/configuration")
    })
    .await?;

    // The server stays responsive after our answer.
    client.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unanswered_initialize_times_out() -> Result<()> {
    let mut client = spawn_mockls(&["--hang-on", "initialize"])?;
    client.initialize(default_capabilities()).await?;

    let result = client.wait_until_ready(Duration::from_millis(200)).await;
    assert!(matches!(result, Err(LspError::Timeout(_, _))));
    assert_eq!(client.state(), ClientState::Initializing);

    client.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_server_crash_stops_read_loop() -> Result<()> {
    let mut client = spawn_mockls(&["--drop-after", "1"])?;
    client.initialize(default_capabilities()).await?;
    client.wait_until_ready(Duration::from_secs(5)).await?;

    eventually("read loop to stop", || !client.is_alive()).await?;
    // Plain EOF is not a framing error.
    assert!(client.take_connection_error().is_none());

    // Shutdown still completes the sequence and reports the dead pipe.
    let _ = client.shutdown().await;
    assert_eq!(client.state(), ClientState::Terminated);
    Ok(())
}
