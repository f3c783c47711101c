//! Trends command - per-account balance history and trend

use anyhow::{Context, Result};
use chrono::NaiveDate;
use colored::Colorize;
use rust_decimal::Decimal;

use super::get_context;
use crate::output;

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

pub fn run(start: Option<String>, end: Option<String>, json: bool) -> Result<()> {
    let start = start.as_deref().map(parse_date).transpose()?;
    let end = end.as_deref().map(parse_date).transpose()?;

    let ctx = get_context("trends")?;
    let trends = ctx
        .balance_service
        .get_accounts_trend(ctx.user_id(), start, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trends)?);
        return Ok(());
    }

    if trends.is_empty() {
        output::warning("No accounts in this window.");
        return Ok(());
    }

    if let (Some(first), Some(last)) = (
        trends.iter().find_map(|t| t.balance_timeseries.first()),
        trends.iter().find_map(|t| t.balance_timeseries.last()),
    ) {
        println!("{} {} to {}", "Balances".bold(), first.date, last.date);
    }

    let mut table = output::create_table();
    table.set_header(vec!["Account", "Type", "Balance", "Trend", "Source"]);
    for trend in &trends {
        table.add_row(vec![
            trend.name.clone(),
            trend.account_type.as_str().to_string(),
            format!("{} {}", trend.balance.round_dp(2), trend.currency),
            format_trend(trend.trend),
            if trend.is_external { "provider" } else { "ledger" }.to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn format_trend(trend: Decimal) -> String {
    let text = format!("{:+}%", trend.round_dp(2));
    if trend.is_sign_negative() && !trend.is_zero() {
        text.red().to_string()
    } else if trend.is_zero() {
        text
    } else {
        text.green().to_string()
    }
}
