//! Nuts CLI - bank sync and balance trends in your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{connections, demo, link, logs, sync, trends};

/// Nuts - bank sync and balance trends in your terminal
#[derive(Parser)]
#[command(name = "nuts", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link a bank connection and run its first full sync
    Link {
        /// Provider name (teller, mono, simplefin, demo)
        provider: String,
        /// Long-lived credential (access token, account id, access URL)
        #[arg(long, conflicts_with = "code", required_unless_present = "code")]
        token: Option<String>,
        /// Short-lived code or setup token to exchange
        #[arg(long)]
        code: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync accounts and transactions from linked connections
    Sync {
        /// Connection ID (optional, syncs all if not specified)
        connection: Option<String>,
        /// Fetch full history instead of the most recent transactions
        #[arg(long)]
        full: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List or delete linked connections
    Connections {
        #[command(subcommand)]
        command: Option<connections::ConnectionsCommands>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show per-account balance trends
    Trends {
        /// Window start (YYYY-MM-DD), defaults to one year before the end
        #[arg(long)]
        start: Option<String>,
        /// Window end (YYYY-MM-DD), defaults to tomorrow
        #[arg(long)]
        end: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Link the demo provider and sync generated data
    Demo {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the sync event log
    Logs {
        #[command(subcommand)]
        command: Option<logs::LogsCommands>,
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Show only errors
        #[arg(long)]
        errors: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Diagnostics go to stderr, filtered by NUTS_LOG (default: warn)
fn init_tracing() {
    let filter = EnvFilter::try_from_env("NUTS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Link { provider, token, code, json } => link::run(&provider, token, code, json),
        Commands::Sync { connection, full, json } => sync::run(connection, full, json),
        Commands::Connections { command, json } => connections::run(command, json),
        Commands::Trends { start, end, json } => trends::run(start, end, json),
        Commands::Demo { json } => demo::run(json),
        Commands::Logs { command, limit, errors, json } => logs::run(command, limit, errors, json),
    }
}
