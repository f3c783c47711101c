//! Sync command - reconcile connections with their providers

use anyhow::Result;
use colored::Colorize;
use nuts_core::services::CancellationToken;
use nuts_core::{Error, SyncReport, SyncType};
use serde_json::json;
use uuid::Uuid;

use super::{get_context, parse_connection_id, spinner};
use crate::output;

pub fn run(connection: Option<String>, full: bool, json: bool) -> Result<()> {
    let ctx = get_context("sync")?;
    let sync_type = if full { SyncType::Full } else { SyncType::Incremental };
    let service = ctx.sync_service()?;
    let cancel = CancellationToken::new();

    let pb = spinner("Syncing...", json);
    let results: Vec<(Uuid, Result<SyncReport, Error>)> = match connection {
        Some(id) => {
            let id = parse_connection_id(&id)?;
            vec![(id, service.sync_connection(id, sync_type, &cancel))]
        }
        None => service.sync_user(ctx.user_id(), sync_type, &cancel)?,
    };
    pb.finish_and_clear();

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    if json {
        let value: Vec<_> = results
            .iter()
            .map(|(id, result)| match result {
                Ok(report) => json!({ "connection_id": id, "report": report }),
                Err(e) => json!({ "connection_id": id, "error": e.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_results(&results, sync_type);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} connection(s) failed to sync", failed, results.len());
    }
    Ok(())
}

fn print_results(results: &[(Uuid, Result<SyncReport, Error>)], sync_type: SyncType) {
    if results.is_empty() {
        output::warning("No connections linked. Use 'nuts link' or 'nuts demo' to add one.");
        return;
    }

    for (id, result) in results {
        match result {
            Ok(report) => {
                println!("{} {} ({})", "Synced:".green(), report.provider, id);
                println!("  Sync type: {}", sync_type);
                println!(
                    "  Accounts: {} new, {} updated",
                    report.accounts_created, report.accounts_updated
                );
                println!("  Transaction breakdown:");
                println!("    New: {}", report.transactions_inserted);
                println!("    Skipped: {} (already exists)", report.transactions_skipped);
                if report.categories_created > 0 {
                    println!("  Categories created: {}", report.categories_created);
                }
                for failure in &report.failures {
                    output::warning(&format!(
                        "  Skipped account {}: {}",
                        failure.account_id, failure.message
                    ));
                }
            }
            Err(e) => println!("{} {} - {}", "Error:".red(), id, e),
        }
        println!();
    }
}
