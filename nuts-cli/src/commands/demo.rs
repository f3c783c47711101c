//! Demo command - link the demo provider and sync generated data

use anyhow::Result;
use nuts_core::services::{CancellationToken, LinkRequest};
use nuts_core::SyncType;

use super::{get_context, link, spinner};
use crate::output;

const DEMO_PROVIDER: &str = "demo";

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context("demo")?;

    if !ctx.registry.names().iter().any(|n| n == DEMO_PROVIDER) {
        anyhow::bail!("The demo provider is not enabled; add \"demo\" to providers.enabled");
    }

    // Already linked: refresh instead of linking a second time
    let existing = ctx
        .repository
        .list_connections(ctx.user_id())?
        .into_iter()
        .find(|c| c.provider_name == DEMO_PROVIDER);

    if let Some(connection) = existing {
        let pb = spinner("Refreshing demo data...", json);
        let report = ctx.sync_service()?.sync_connection(
            connection.id,
            SyncType::Incremental,
            &CancellationToken::new(),
        );
        pb.finish_and_clear();
        let report = report?;

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            output::success(&format!(
                "Demo data refreshed: {} new transactions",
                report.transactions_inserted
            ));
            output::info("Run 'nuts trends' to see your demo accounts.");
        }
        return Ok(());
    }

    let (connection, outcomes) = link::link_and_sync(
        &ctx,
        DEMO_PROVIDER,
        LinkRequest::Token("demo".to_string()),
        json,
    )?;
    link::print_linked(&connection, &outcomes, json)?;
    if !json {
        output::info("Run 'nuts trends' to see your demo accounts.");
    }
    Ok(())
}
