// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! `lsp-probe`: runs one language server session against a file and shows
//! what the editor would draw.
//!
//! The probe spawns the configured server, opens the file, optionally asks
//! for completions and pull diagnostics, waits for the server to answer and
//! prints the visible part of the buffer with inline diagnostics and the
//! completion popup overlaid.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use crossterm::tty::IsTty;
use lsp_types::Position;
use std::io::stdout;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use editor_lsp::buffer::{LineSource, split_lines};
use editor_lsp::config::{Config, ServerConfig};
use editor_lsp::lsp::LspSession;
use editor_lsp::ui::{
    Cursor, DrawCommand, RecordingSurface, StyleTable, Surface, TerminalSurface, Viewport,
};

/// Command-line arguments for the probe.
#[derive(Parser, Debug)]
#[command(name = "lsp-probe")]
#[command(about = "Run a language server against one file and show the result")]
#[command(version = env!("EDITOR_LSP_VERSION"))]
struct Args {
    /// File to open.
    file: PathBuf,

    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Language server command (overrides the configured one).
    #[arg(short, long)]
    server: Option<String>,

    /// Argument for the server command. Can be specified multiple times.
    #[arg(long = "arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Request completions at LINE:COL (0-based).
    #[arg(long, value_parser = parse_position)]
    complete: Option<Position>,

    /// Also pull diagnostics with `textDocument/diagnostic`.
    #[arg(long)]
    pull: bool,

    /// How long to collect server output, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,

    /// Viewport width (default: terminal width).
    #[arg(long)]
    width: Option<u16>,

    /// Viewport height (default: terminal height).
    #[arg(long)]
    height: Option<u16>,

    /// Draw with terminal escape sequences instead of plain text.
    #[arg(long)]
    draw: bool,

    /// Disable colors when drawing.
    #[arg(long)]
    nocolor: bool,
}

fn parse_position(s: &str) -> Result<Position> {
    let (line, col) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected LINE:COL, got {s:?}"))?;
    Ok(Position::new(
        line.trim().parse().context("invalid line")?,
        col.trim().parse().context("invalid column")?,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("editor_lsp=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.clone())?;
    if let Some(command) = &args.server {
        config.server = Some(ServerConfig {
            command: command.clone(),
            args: args.server_args.clone(),
            initialization_options: config
                .server
                .as_ref()
                .and_then(|s| s.initialization_options.clone()),
        });
    }
    if config.server.is_none() {
        bail!(
            "No language server configured. Pass --server or set server.command in the config file."
        );
    }

    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let lines = split_lines(&text);

    let mut session = LspSession::start(&config, &args.file)
        .await
        .context("Failed to start language server session")?;

    if args.pull {
        session.request_diagnostics().await?;
    }
    if let Some(position) = args.complete {
        session.start_completion(position).await?;
    }

    collect(&mut session, Duration::from_millis(args.wait_ms)).await?;

    let viewport = viewport(&args);
    let (top, cursor) = place_cursor(args.complete, viewport);

    if args.draw {
        let styles = if args.nocolor || !stdout().is_tty() {
            StyleTable::monochrome()
        } else {
            StyleTable::default()
        };
        let mut surface = TerminalSurface::new(stdout(), styles);
        session.render(&mut surface, top, cursor, viewport, &lines)?;
        println!();
    } else {
        let mut surface = RecordingSurface::new();
        session.render(&mut surface, top, cursor, viewport, &lines)?;
        for row in compose(&lines, top, viewport, surface.commands()) {
            println!("{row}");
        }
    }

    let summary = session.progress_summary();
    println!(
        "progress: {}",
        if summary.is_empty() { "idle" } else { &summary }
    );

    session.shutdown().await?;
    Ok(())
}

/// Waits for server output, failing early if the connection drops.
async fn collect(session: &mut LspSession, wait: Duration) -> Result<()> {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if let Some(lost) = session.poll_connection_error() {
            return Err(lost).context("Language server connection lost");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    if let Some(completion) = session.completion()
        && completion.is_pending()
    {
        warn!("No completion response within {:?}", wait);
    }
    if let Some(diagnostics) = session.diagnostics() {
        info!("{} diagnostics", diagnostics.len());
    }
    Ok(())
}

fn viewport(args: &Args) -> Viewport {
    let (width, height) = crossterm::terminal::size().unwrap_or((80, 24));
    Viewport::new(args.width.unwrap_or(width), args.height.unwrap_or(height))
}

/// First visible line and screen cursor for a completion at `position`.
fn place_cursor(position: Option<Position>, viewport: Viewport) -> (usize, Cursor) {
    let Some(position) = position else {
        return (0, Cursor::default());
    };
    let line = usize::try_from(position.line).unwrap_or(usize::MAX);
    let height = usize::from(viewport.height).max(1);
    let top = if line < height {
        0
    } else {
        line - height / 2
    };
    let row = u16::try_from(line - top).unwrap_or(u16::MAX);
    let col = u16::try_from(position.character).unwrap_or(u16::MAX);
    debug!("Cursor at screen {}:{} (top {})", row, col, top);
    (top, Cursor::new(row, col))
}

/// Overlays draw commands on the visible buffer lines.
fn compose(
    lines: &[String],
    top: usize,
    viewport: Viewport,
    commands: &[DrawCommand],
) -> Vec<String> {
    let width = usize::from(viewport.width);
    let mut rows: Vec<Vec<char>> = (top..top + usize::from(viewport.height))
        .map(|index| {
            lines
                .line(index)
                .unwrap_or("")
                .chars()
                .take(width)
                .collect()
        })
        .collect();

    for command in commands {
        let Some(row) = rows.get_mut(usize::from(command.row)) else {
            continue;
        };
        let col = usize::from(command.col);
        for (offset, ch) in command.text.chars().enumerate() {
            let at = col + offset;
            if at >= width {
                break;
            }
            if row.len() <= at {
                row.resize(at + 1, ' ');
            }
            row[at] = ch;
        }
    }

    // Drop trailing rows past the end of the buffer.
    while rows.last().is_some_and(Vec::is_empty) {
        rows.pop();
    }
    rows.into_iter()
        .map(|row| row.into_iter().collect::<String>().trim_end().to_string())
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests use unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use editor_lsp::ui::Style;

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("3:7").unwrap(), Position::new(3, 7));
        assert!(parse_position("3").is_err());
        assert!(parse_position("a:1").is_err());
    }

    #[test]
    fn test_place_cursor_scrolls_far_lines() {
        let viewport = Viewport::new(80, 10);
        assert_eq!(
            place_cursor(Some(Position::new(3, 2)), viewport),
            (0, Cursor::new(3, 2))
        );
        assert_eq!(
            place_cursor(Some(Position::new(40, 0)), viewport),
            (35, Cursor::new(5, 0))
        );
    }

    #[test]
    fn test_compose_overlays_commands() {
        let lines = vec!["x = 1".to_string(), "y".to_string()];
        let commands = vec![
            DrawCommand::new(0, 6, "unused", Style::Warning),
            DrawCommand::new(2, 0, "popup", Style::Selected),
        ];
        let rows = compose(&lines, 0, Viewport::new(20, 5), &commands);
        assert_eq!(rows, vec!["x = 1 unused", "y", "popup"]);
    }
}
