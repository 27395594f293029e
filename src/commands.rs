//! CLI command definitions
//!
//! Defines the clap commands for the QA runner CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP run endpoint
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Execute feature files once and print the results
    Run {
        /// Feature files to run
        #[arg(required = true)]
        features: Vec<PathBuf>,

        /// Step definition files; can be given multiple times
        #[arg(long = "steps", short = 's')]
        steps: Vec<PathBuf>,

        /// Print the raw response body as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show failure details from a saved report
    Extract {
        /// Path to a Cucumber JSON report
        report: PathBuf,

        /// Print failure details as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the test engine and browser can be found
    Check,
}
