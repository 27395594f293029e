//! QA Runner - runs ad-hoc Cucumber scenarios in disposable workspaces
//!
//! Serves the run endpoint over HTTP, or executes a single run from the
//! command line.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use qa_runner::common::{config::Config, logging};
use qa_runner::{cli, commands};

#[derive(Parser)]
#[command(name = "qa-runner", about = "Cucumber scenario runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { .. } => {
            if let Some(log_file) = logging::init_server() {
                tracing::info!("Logging to {}", log_file.display());
            }
        }
        _ => logging::init_cli(),
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
