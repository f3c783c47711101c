//! CLI command implementations

pub mod connections;
pub mod demo;
pub mod link;
pub mod logs;
pub mod sync;
pub mod trends;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use nuts_core::services::{EntryPoint, LogEvent};
use nuts_core::NutsContext;
use uuid::Uuid;

/// Get the nuts directory from environment or default
pub fn get_nuts_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("NUTS_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".nuts"))
        .ok_or_else(|| anyhow!("Could not find home directory; set NUTS_DIR"))
}

/// Open the data directory and record the command in the event log
pub fn get_context(command: &str) -> Result<NutsContext> {
    let nuts_dir = get_nuts_dir()?;
    let ctx = NutsContext::new(&nuts_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
        .with_context(|| format!("Failed to open nuts directory: {}", nuts_dir.display()))?;
    log_event(&ctx, LogEvent::new("command_executed").with_command(command));
    Ok(ctx)
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(ctx: &NutsContext, event: LogEvent) {
    if let Err(e) = ctx.logger.log(event) {
        tracing::debug!(error = %e, "event log unavailable");
    }
}

pub fn parse_connection_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id.trim()).with_context(|| format!("Invalid connection id: {}", id))
}

/// Runtime for commands that drive the sync queue
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Spinner on stderr; hidden for JSON output or when stderr is not a terminal
pub fn spinner(message: &str, hidden: bool) -> ProgressBar {
    if hidden || atty::isnt(atty::Stream::Stderr) {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
