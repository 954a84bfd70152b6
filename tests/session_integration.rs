// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end tests for `LspSession`: completion, diagnostics and progress
//! flowing from `mockls` into the editor-side consumers.

use anyhow::{Context, Result, bail};
use lsp_types::{DiagnosticSeverity, Position};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

use editor_lsp::config::{Config, ServerConfig};
use editor_lsp::lsp::{LspError, LspSession};
use editor_lsp::ui::{Cursor, RecordingSurface, Style, Viewport};

const MOCKLS: &str = env!("CARGO_BIN_EXE_mockls");

fn mockls_config(args: &[&str]) -> Config {
    Config {
        server: Some(ServerConfig {
            command: MOCKLS.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            initialization_options: None,
        }),
        ready_timeout_ms: 5_000,
        shutdown_timeout_ms: 2_000,
        ..Config::default()
    }
}

fn workspace(text: &str) -> Result<(TempDir, PathBuf)> {
    let dir = tempdir()?;
    let path = dir.path().join("main.py");
    std::fs::write(&path, text)?;
    Ok((dir, path))
}

async fn start(args: &[&str], path: &Path) -> Result<LspSession> {
    LspSession::start(&mockls_config(args), path)
        .await
        .context("Failed to start session")
}

/// Polls `condition` every 10ms for up to five seconds.
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..500 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("Timed out waiting for {what}")
}

#[tokio::test]
async fn test_completion_popup_and_accept() -> Result<()> {
    let (_dir, path) = workspace("pri\n")?;
    let mut session = start(&["--completion", "print", "--completion", "println"], &path).await?;

    session.start_completion(Position::new(0, 3)).await?;
    let completion = session.completion().context("completion")?.clone();
    eventually("suggestions", || completion.suggestions().is_some()).await?;

    let labels: Vec<String> = completion
        .suggestions()
        .unwrap_or_default()
        .iter()
        .map(|s| s.label().to_string())
        .collect();
    assert_eq!(labels, vec!["print", "println"]);

    session.select_next();
    let mut surface = RecordingSurface::new();
    let lines = vec!["pri".to_string()];
    session.render(&mut surface, 0, Cursor::new(0, 3), Viewport::new(40, 12), &lines)?;
    let popup: Vec<_> = surface
        .commands()
        .iter()
        .filter(|c| matches!(c.style, Style::Selected | Style::Suggestion))
        .collect();
    assert_eq!(popup.len(), 2);
    assert_eq!((popup[1].row, popup[1].col), (2, 3));
    assert_eq!(popup[1].text, "println");
    assert_eq!(popup[1].style, Style::Selected);

    assert_eq!(session.accept_completion()?.as_deref(), Some("println"));
    assert!(!completion.is_active());
    assert!(matches!(
        session.accept_completion(),
        Err(LspError::NotActive)
    ));

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_diagnostics_arrive_while_completion_is_outstanding() -> Result<()> {
    let (_dir, path) = workspace("x = 1\n")?;
    let mut session = start(&["--completion-delay", "500"], &path).await?;
    let diagnostics = session.diagnostics().context("diagnostics")?.clone();
    let completion = session.completion().context("completion")?.clone();
    eventually("open diagnostics", || diagnostics.version() == Some(0)).await?;

    session.start_completion(Position::new(0, 1)).await?;
    session.change_document("x = 1\ny = 2  # FIXME\n").await?;

    eventually("diagnostics for version 1", || diagnostics.version() == Some(1)).await?;
    assert!(
        completion.is_pending(),
        "completion should still be waiting for its response"
    );
    let found = diagnostics.diagnostics();
    assert_eq!(found.len(), 2);
    assert_eq!(found[1].severity, Some(DiagnosticSeverity::ERROR));

    eventually("delayed suggestions", || !completion.is_pending()).await?;
    assert_eq!(completion.suggestions().map(|s| s.len()), Some(3));

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_inline_diagnostics_render_after_line_text() -> Result<()> {
    let (_dir, path) = workspace("x = 1\ny = FIXME\n")?;
    let mut session = start(&[], &path).await?;
    let diagnostics = session.diagnostics().context("diagnostics")?.clone();
    eventually("diagnostics", || diagnostics.len() == 2).await?;

    let lines = vec!["x = 1".to_string(), "y = FIXME".to_string()];
    let mut surface = RecordingSurface::new();
    session.render(&mut surface, 0, Cursor::default(), Viewport::new(60, 10), &lines)?;

    let commands = surface.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!((commands[0].row, commands[0].col), (0, 6));
    assert_eq!(commands[0].text, "mockls: mock diagnostic");
    assert_eq!(commands[0].style, Style::Warning);
    assert_eq!((commands[1].row, commands[1].col), (1, 10));
    assert_eq!(commands[1].style, Style::Error);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_pull_diagnostics_replace_set() -> Result<()> {
    let (_dir, path) = workspace("FIXME\n")?;
    let mut session = start(&["--no-diagnostics"], &path).await?;
    let diagnostics = session.diagnostics().context("diagnostics")?.clone();
    assert!(diagnostics.is_empty());

    session.request_diagnostics().await?;
    eventually("pulled diagnostics", || diagnostics.len() == 2).await?;
    assert_eq!(
        diagnostics.diagnostics()[1].message,
        "mockls: unresolved FIXME"
    );

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_progress_summary_tracks_server_work() -> Result<()> {
    let (_dir, path) = workspace("x\n")?;
    let mut session = start(
        &["--progress-delay", "300", "--progress-title", "Linting"],
        &path,
    )
    .await?;

    eventually("progress begin", || session.progress_summary() == "Linting").await?;
    eventually("progress end", || session.progress_summary().is_empty()).await?;
    let progress = session.progress().context("progress")?;
    assert!(!progress.is_busy());
    assert_eq!(progress.entries().len(), 1);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_handshake_reports_error() -> Result<()> {
    let (_dir, path) = workspace("x\n")?;
    let mut config = mockls_config(&["--hang-on", "initialize"]);
    config.ready_timeout_ms = 200;

    let result = LspSession::start(&config, &path).await;
    assert!(matches!(result, Err(LspError::Timeout(_, _))));
    Ok(())
}

#[tokio::test]
async fn test_crashed_server_disables_session() -> Result<()> {
    let (_dir, path) = workspace("x\n")?;
    // initialize, then a failing completion request ends the process.
    let mut session = start(&["--drop-after", "2"], &path).await?;
    session.start_completion(Position::new(0, 0)).await?;

    let mut lost = None;
    eventually("connection loss", || {
        lost = session.poll_connection_error();
        lost.is_some()
    })
    .await?;
    assert!(matches!(lost, Some(LspError::Closed)));
    assert!(!session.is_enabled());

    // Further calls are accepted and ignored.
    session.start_completion(Position::new(0, 0)).await?;
    session.shutdown().await?;
    Ok(())
}
