//! Logs command - view and manage the sync event log

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use nuts_core::services::{now_ms, EntryPoint, LoggingService};

use super::get_nuts_dir;
use crate::output;

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Clear old log entries
    Clear {
        /// Delete logs older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u64,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show log statistics and database path
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn get_logging_service() -> Result<LoggingService> {
    let nuts_dir = get_nuts_dir()?;
    std::fs::create_dir_all(&nuts_dir)?;
    LoggingService::new(&nuts_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
}

fn format_timestamp(timestamp_ms: i64) -> String {
    use chrono::{TimeZone, Utc};
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub fn run(command: Option<LogsCommands>, limit: usize, errors: bool, json: bool) -> Result<()> {
    match command {
        None => list(limit, errors, json),
        Some(LogsCommands::Clear {
            older_than_days,
            force,
            json,
        }) => clear(older_than_days, force, json),
        Some(LogsCommands::Stats { json }) => stats(json),
    }
}

fn list(limit: usize, errors: bool, json: bool) -> Result<()> {
    let service = get_logging_service()?;
    let entries = if errors {
        service.get_errors(limit)?
    } else {
        service.get_recent(limit)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No log entries found.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Time", "Entry", "Event", "Context", "Error"]);

    for entry in entries {
        let context = [
            entry.command.as_deref(),
            entry.provider.as_deref(),
            entry.connection_id.as_deref(),
        ]
        .iter()
        .filter_map(|&s| s)
        .collect::<Vec<_>>()
        .join(", ");

        let error = match (&entry.error_message, errors) {
            (Some(message), true) => message.clone(),
            (Some(_), false) => "!".red().to_string(),
            (None, _) => String::new(),
        };

        table.add_row(vec![
            format_timestamp(entry.timestamp),
            entry.entry_point,
            entry.event,
            context,
            error,
        ]);
    }

    println!("{}", table);

    // Show error details if any
    if !errors {
        let recent_errors = service.get_errors(3)?;
        if !recent_errors.is_empty() {
            println!();
            println!("{}", "Recent Errors:".red().bold());
            for err in &recent_errors {
                println!(
                    "  {} [{}]: {}",
                    format_timestamp(err.timestamp).dimmed(),
                    err.event,
                    err.error_message.as_deref().unwrap_or("Unknown error")
                );
                if let Some(details) = &err.error_details {
                    println!("    {}", details.dimmed());
                }
            }
        }
    }
    Ok(())
}

fn clear(older_than_days: u64, force: bool, json: bool) -> Result<()> {
    let service = get_logging_service()?;
    let cutoff_ms = now_ms() - (older_than_days as i64 * 24 * 60 * 60 * 1000);

    if !force && !json {
        use dialoguer::Confirm;
        if !Confirm::new()
            .with_prompt(format!("Delete logs older than {} days?", older_than_days))
            .default(false)
            .interact()?
        {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let deleted = service.delete_before(cutoff_ms)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        println!("Deleted {} log entries", deleted);
    }
    Ok(())
}

fn stats(json: bool) -> Result<()> {
    let service = get_logging_service()?;
    let total = service.count()?;
    let errors = service.get_errors(1000)?.len();
    let db_path = service.db_path().to_path_buf();
    let size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "total_entries": total,
                "error_count": errors,
                "database_path": db_path.to_string_lossy(),
                "database_size_bytes": size_bytes
            })
        );
    } else {
        println!("{}", "Log Statistics".bold());
        println!("  Total entries: {}", total);
        println!("  Errors: {}", errors);
        println!("  Database: {}", db_path.display());
        println!("  Size: {}", output::format_size(size_bytes));
    }
    Ok(())
}
