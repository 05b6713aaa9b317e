use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

mod commands;
mod logging;

use crate::logging::init_logging;

#[derive(Parser)]
#[command(author, version, about = "Browser-to-SSH terminal gateway")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase logging verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub debug: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Run,
    /// Validate the environment configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match &cli.command {
        Commands::Run => crate::commands::run::command(&cli).await,
        Commands::Check => crate::commands::check::command(&cli).await,
    }
}
