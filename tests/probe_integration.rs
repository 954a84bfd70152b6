// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the `lsp-probe` binary driving `mockls`.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn run_probe(home: &Path, args: &[&str]) -> Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_lsp-probe"))
        .args(args)
        // Isolate from user-level config
        .env("XDG_CONFIG_HOME", home)
        .env("HOME", home)
        .env_remove("EDITOR_LSP_SERVER__COMMAND")
        .output()
        .context("Failed to run lsp-probe")
}

#[test]
fn test_probe_shows_diagnostics_and_popup() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("main.py");
    std::fs::write(&file, "x = 1\ny = FIXME\n")?;

    let output = run_probe(
        dir.path(),
        &[
            file.to_str().context("invalid path")?,
            "--server",
            env!("CARGO_BIN_EXE_mockls"),
            "--complete",
            "1:4",
            "--width",
            "60",
            "--height",
            "10",
            "--wait-ms",
            "500",
        ],
    )?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "probe failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let rows: Vec<&str> = stdout.lines().collect();
    assert_eq!(rows[0], "x = 1 mockls: mock diagnostic");
    assert_eq!(rows[1], "y = FIXME mockls: unresolved FIXME");
    assert_eq!(rows[2], "    print");
    assert_eq!(rows[3], "    println");
    assert_eq!(rows[4], "    printf");
    assert_eq!(rows.last().copied(), Some("progress: idle"));
    Ok(())
}

#[test]
fn test_probe_reports_progress_title() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("main.py");
    std::fs::write(&file, "x\n")?;

    let output = run_probe(
        dir.path(),
        &[
            file.to_str().context("invalid path")?,
            "--server",
            env!("CARGO_BIN_EXE_mockls"),
            "--arg=--progress-delay",
            "--arg=5000",
            "--arg=--progress-title",
            "--arg=Linting",
            "--width",
            "40",
            "--height",
            "5",
            "--wait-ms",
            "300",
        ],
    )?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.lines().any(|l| l == "progress: Linting"),
        "unexpected output: {stdout}"
    );
    Ok(())
}

#[test]
fn test_probe_without_server_fails() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("main.py");
    std::fs::write(&file, "x\n")?;

    let output = run_probe(dir.path(), &[file.to_str().context("invalid path")?])?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No language server configured"));
    Ok(())
}
