//! Warden CLI - governed workflow runs from the terminal.
//!
//! Exit codes are stable so automated callers can branch without
//! parsing text: 0 completed, 2 validation failure, 3 blocked pending
//! approval, 4 unrecoverable execution failure, 5 ledger integrity
//! failure.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod sim;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - governed workflow execution with receipt-gated actions", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a definition and drive it to a terminal or blocked state
    Run(commands::RunArgs),

    /// Validate a definition without running it
    Validate {
        /// Path to the workflow definition JSON
        definition: String,
    },

    /// Recompute a ledger file's hash chain and report the first divergence
    Verify {
        /// Path to the receipt ledger (JSONL)
        ledger: String,
    },

    /// Summarize job outcomes recorded in a ledger file
    Status {
        /// Path to the receipt ledger (JSONL)
        ledger: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let code = match cli.command {
        Commands::Run(args) => commands::run(args).await?,
        Commands::Validate { definition } => commands::validate(&definition)?,
        Commands::Verify { ledger } => commands::verify(&ledger).await?,
        Commands::Status { ledger } => commands::status(&ledger).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
