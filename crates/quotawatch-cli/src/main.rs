//! QuotaWatch CLI - AI service quota tracker
//!
//! Record when an AI service's quota runs out and when it resets, and get
//! notified shortly before and when it does.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quotawatch_core::db::DB_PATH_ENV;

#[derive(Parser)]
#[command(name = "quotawatch")]
#[command(author, version, about = "Track AI service quotas and get notified when they reset", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override database path (or set QUOTAWATCH_DB_PATH env var)
    #[arg(long, env = "QUOTAWATCH_DB_PATH", global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Quota(commands::quota::QuotaAction),

    /// Run one reconciliation check now
    Check,

    /// Run the notification scheduler until interrupted
    Watch {
        /// Seconds between checks (or set QUOTAWATCH_TICK_SECS env var)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Watch { .. } => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        std::env::set_var(DB_PATH_ENV, db_path);
    }

    // Create context for commands
    let ctx = commands::Context::build(cli.format, cli.quiet).await?;

    // Execute command
    let result = match cli.command {
        Commands::Quota(action) => commands::quota::execute(&ctx, action).await,
        Commands::Check => commands::watch::check(&ctx).await,
        Commands::Watch { interval } => commands::watch::watch(&ctx, interval).await,
    };

    ctx.close().await;

    if let Err(e) = result {
        output::print_error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
