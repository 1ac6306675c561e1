use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use farewatch::tracker_config::TrackerConfig;

mod cli;

#[derive(Parser, Debug)]
#[command(
    name = "farewatch",
    version,
    about = "Track flight fares and get a chat message when they change"
)]
struct Args {
    /// TOML config file (default: $FAREWATCH_CONFIG, then ./farewatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the chat bot and the fare poller until Ctrl+C
    Run,
    /// Run a single poll tick, print its report and exit
    Check,
    /// Print one chat's tracked flights from the state file
    List {
        /// Chat id whose flights to show
        #[arg(long)]
        owner: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    farewatch::log_format::init_tracing();

    let args = Args::parse();
    let config =
        TrackerConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Commands::Run => cli::handle_run(config).await,
        Commands::Check => cli::handle_check(config).await,
        Commands::List { owner } => cli::handle_list(config, owner).await,
    }
}
