//! Connections command - list and delete linked provider connections

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use super::{get_context, log_event, parse_connection_id};
use crate::output;
use nuts_core::services::LogEvent;

#[derive(Subcommand)]
pub enum ConnectionsCommands {
    /// Delete a connection; its accounts and transactions are kept
    Delete {
        /// Connection ID
        id: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

pub fn run(command: Option<ConnectionsCommands>, json: bool) -> Result<()> {
    match command {
        None => list(json),
        Some(ConnectionsCommands::Delete { id, force }) => delete(&id, force),
    }
}

fn list(json: bool) -> Result<()> {
    let ctx = get_context("connections")?;
    let connections = ctx.repository.list_connections(ctx.user_id())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&connections)?);
        return Ok(());
    }

    if connections.is_empty() {
        output::warning("No connections linked. Use 'nuts link' or 'nuts demo' to add one.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["ID", "Provider", "Institution", "Status", "Last Sync", "Last Error"]);
    for connection in &connections {
        table.add_row(vec![
            connection.id.to_string(),
            connection.provider_name.clone(),
            connection.institution_name.clone().unwrap_or_default(),
            output::status(connection.status),
            connection
                .last_sync_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
            connection.last_error.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn delete(id: &str, force: bool) -> Result<()> {
    let id = parse_connection_id(id)?;
    let ctx = get_context("connections delete")?;

    let connection = ctx
        .repository
        .get_connection(id)?
        .ok_or_else(|| anyhow::anyhow!("Connection '{}' not found", id))?;

    // Confirm removal unless --force
    if !force {
        println!(
            "\n{}",
            format!("This will remove the {} connection {}.", connection.provider_name, id).yellow()
        );
        println!("{}\n", "Your synced accounts and transactions will remain.".dimmed());

        if !Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?
        {
            println!("{}\n", "Cancelled".dimmed());
            return Ok(());
        }
    }

    if !ctx.repository.delete_connection(id)? {
        anyhow::bail!("Connection '{}' not found", id);
    }
    log_event(
        &ctx,
        LogEvent::new("connection_deleted")
            .with_provider(&connection.provider_name)
            .with_connection(id),
    );
    output::success(&format!("Connection {} removed", id));
    Ok(())
}
