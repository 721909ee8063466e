use anyhow::Result;
use clap::{Parser, Subcommand};
use loanbridge_sync::{poll, SyncContext};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "loanbridge")]
#[command(about = "Loan origination to pipeline CRM sync service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the web server with the webhook and the polling scheduler.
    Serve,
    /// Run one polling sweep over recently modified loans and exit.
    Poll {
        /// Trailing window, in hours.
        #[arg(long)]
        hours: Option<i64>,
    },
    /// Backfill the most recent loans into the destination and exit.
    InitialSync {
        /// Maximum number of loans to pull.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            loanbridge_web::serve_from_env().await?;
        }
        Commands::Poll { hours } => {
            let ctx = SyncContext::from_env()?;
            let hours = hours.unwrap_or(ctx.config.poll_window_hours);
            let report = poll::run_polling_sweep(&ctx, hours).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("polling sweep failed");
            }
        }
        Commands::InitialSync { limit } => {
            let ctx = SyncContext::from_env()?;
            let limit = limit.unwrap_or(ctx.config.initial_sync_limit);
            let report = poll::run_initial_sync(&ctx, limit).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("initial sync failed");
            }
        }
    }
    Ok(())
}
