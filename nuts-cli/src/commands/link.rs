//! Link command - connect a provider credential and run its first sync

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use nuts_core::ports::SyncQueue;
use nuts_core::services::{JobOutcome, LinkRequest};
use nuts_core::{Connection, NutsContext};
use serde_json::json;

use super::{get_context, runtime, spinner};
use crate::output;

pub fn run(provider: &str, token: Option<String>, code: Option<String>, json: bool) -> Result<()> {
    let request = match (token, code) {
        (Some(token), None) => LinkRequest::Token(token),
        (None, Some(code)) => LinkRequest::Code(code),
        _ => anyhow::bail!("Pass exactly one of --token or --code"),
    };

    let ctx = get_context("link")?;
    let provider = provider.trim().to_lowercase();
    let (connection, outcomes) = link_and_sync(&ctx, &provider, request, json)?;
    print_linked(&connection, &outcomes, json)
}

/// Link, then wait for the queued first sync to finish
pub fn link_and_sync(
    ctx: &NutsContext,
    provider: &str,
    request: LinkRequest,
    quiet: bool,
) -> Result<(Connection, Vec<JobOutcome>)> {
    let rt = runtime()?;
    rt.block_on(async {
        let queue = ctx.start_queue()?;
        let connections = ctx.connection_service(Arc::clone(&queue) as Arc<dyn SyncQueue>)?;

        let pb = spinner(&format!("Linking {}...", provider), quiet);
        let linked = connections.link(ctx.user_id(), provider, request).await;
        let connection = match linked {
            Ok(connection) => connection,
            Err(e) => {
                pb.finish_and_clear();
                queue.shutdown().await;
                return Err(e.into());
            }
        };

        pb.set_message("Running first sync...");
        let outcomes = queue.shutdown().await;
        pb.finish_and_clear();

        let connection = connections.get(connection.id)?;
        Ok::<_, anyhow::Error>((connection, outcomes))
    })
}

pub fn print_linked(connection: &Connection, outcomes: &[JobOutcome], json: bool) -> Result<()> {
    if json {
        let sync = outcomes.iter().map(|o| match &o.result {
            Ok(report) => json!({ "attempts": o.attempts, "report": report }),
            Err(e) => json!({ "attempts": o.attempts, "error": e.to_string() }),
        });
        let value = json!({
            "connection": connection,
            "sync": sync.collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    output::success(&format!(
        "Linked {} ({})",
        connection.provider_name,
        connection
            .institution_name
            .as_deref()
            .unwrap_or("unknown institution")
    ));
    println!("  Connection: {}", connection.id);
    println!("  Status:     {}", output::status(connection.status));

    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                println!(
                    "  Accounts:   {} new, {} updated",
                    report.accounts_created, report.accounts_updated
                );
                println!("  Transactions: {} new", report.transactions_inserted);
                for failure in &report.failures {
                    output::warning(&format!(
                        "  Skipped account {}: {}",
                        failure.account_id, failure.message
                    ));
                }
            }
            Err(e) => {
                output::error(&format!("  First sync failed: {}", e));
                println!("  {}", "Run 'nuts sync' to try again.".dimmed());
            }
        }
    }
    Ok(())
}
