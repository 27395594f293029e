//! CLI command handling
//!
//! Dispatches CLI commands and formats their output for a terminal.

use std::path::{Path, PathBuf};

use colored::Colorize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::engine::EngineCommand;
use crate::report::{resolve_status, FailureDetails, RunStatus};
use crate::request::{RunRequest, ScriptAsset};
use crate::server;
use crate::session::BrowserServer;
use crate::supervisor::{RunOutcome, RunSupervisor};

/// Lines of captured output shown when a run fails
const OUTPUT_TAIL_LINES: usize = 40;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::serve(config).await
        }

        Commands::Run {
            features,
            steps,
            json,
        } => {
            let request = RunRequest {
                features: read_assets(&features).await?,
                steps: read_assets(&steps).await?,
            };
            let supervisor = RunSupervisor::new(config);

            let cancel = CancellationToken::new();
            let interrupt = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };
            let outcome = supervisor.run(request, cancel).await;
            interrupt.abort();

            let status = outcome.status(supervisor.classifier());
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome, status);
                if let Some(report) = outcome.report() {
                    print_failure_details(&supervisor.classifier().extract(Some(report)));
                }
            }

            if outcome.is_success() {
                Ok(())
            } else {
                Err(Error::RunFailed(status.to_string()))
            }
        }

        Commands::Extract { report, json } => {
            let content = tokio::fs::read_to_string(&report)
                .await
                .map_err(|e| Error::FileRead {
                    path: report.display().to_string(),
                    error: e.to_string(),
                })?;
            let report: Value = serde_json::from_str(&content)?;

            let supervisor = RunSupervisor::new(config);
            let details = supervisor.classifier().extract(Some(&report));

            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                let status = resolve_status(None, Some(&report), supervisor.classifier());
                println!("Status: {}", colorize_status(status));
                print_failure_details(&details);
            }
            Ok(())
        }

        Commands::Check => {
            check(&config);
            Ok(())
        }
    }
}

async fn read_assets(files: &[PathBuf]) -> Result<Vec<ScriptAsset>> {
    let mut assets = Vec::with_capacity(files.len());
    for path in files {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
        let name = path.file_name().and_then(|n| n.to_str());
        assets.push(ScriptAsset::new(name, content));
    }
    Ok(assets)
}

fn colorize_status(status: RunStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Passed => label.green().bold(),
        RunStatus::Failed => label.red().bold(),
        RunStatus::Undefined => label.yellow().bold(),
        RunStatus::Completed => label.normal().bold(),
    }
}

fn print_outcome(outcome: &RunOutcome, status: RunStatus) {
    match outcome {
        RunOutcome::Completed { stdout, stderr, .. } => {
            print_stream("stdout", stdout, None);
            print_stream("stderr", stderr, None);
            println!("\n{} {}", "✓".green().bold(), colorize_status(status));
        }
        RunOutcome::Rejected { error } => {
            println!("{} {}", "✗".red().bold(), error);
        }
        RunOutcome::Failed {
            error,
            stdout,
            stderr,
            ..
        } => {
            if let Some(stdout) = stdout {
                print_stream("stdout", stdout, Some(OUTPUT_TAIL_LINES));
            }
            if let Some(stderr) = stderr {
                print_stream("stderr", stderr, Some(OUTPUT_TAIL_LINES));
            }
            println!("\n{} {} ({})", "✗".red().bold(), error.red(), colorize_status(status));
        }
    }
}

fn print_stream(label: &str, text: &str, tail: Option<usize>) {
    if text.trim().is_empty() {
        return;
    }
    println!("{}", format!("--- {} ---", label).dimmed());

    let lines: Vec<&str> = text.lines().collect();
    let skip = tail.map_or(0, |n| lines.len().saturating_sub(n));
    if skip > 0 {
        println!("{}", format!("... {} earlier lines omitted", skip).dimmed());
    }
    for line in &lines[skip..] {
        println!("{}", line);
    }
}

fn print_failure_details(details: &FailureDetails) {
    if details.is_empty() {
        return;
    }

    if !details.messages.is_empty() {
        println!("\n{}", "Failures:".red().bold());
        for message in &details.messages {
            let mut lines = message.lines();
            if let Some(first) = lines.next() {
                println!("  {} {}", "✗".red(), first);
            }
            for line in lines {
                println!("    {}", line.dimmed());
            }
        }
    }

    if !details.attachments.is_empty() {
        println!("\n{}", "Evidence:".bold());
        for attachment in &details.attachments {
            let location = match (&attachment.scenario_name, &attachment.step_name) {
                (Some(scenario), Some(step)) => format!("{} / {}", scenario, step),
                (Some(scenario), None) => scenario.clone(),
                (None, Some(step)) => step.clone(),
                (None, None) => String::new(),
            };
            println!(
                "  [{}] {} {}",
                attachment.id.dimmed(),
                attachment.mime_type.cyan(),
                location
            );

            if attachment.mime_type.starts_with("text/") {
                for line in attachment.decode_text().lines() {
                    println!("      {}", line);
                }
            } else if let Some(bytes) = attachment.decode() {
                println!("      {} bytes", bytes.len());
            }
        }
    }
}

fn check(config: &Config) {
    println!("{}", "QA runner environment".bold());
    println!();

    match paths::config_path() {
        Some(path) if path.exists() => println!("  Config:     {}", path.display()),
        Some(path) => println!("  Config:     {} {}", path.display(), "(not present, using defaults)".dimmed()),
        None => println!("  Config:     {}", "(no config directory)".dimmed()),
    }
    println!("  Workspaces: {}", config.workspace.base_dir().display());

    match EngineCommand::resolve(&config.engine) {
        Ok(command) => {
            println!(
                "  {} Engine:   {} {}",
                "✓".green(),
                command.program.display(),
                command.args.join(" ")
            );
        }
        Err(e) => println!("  {} Engine:   {}", "✗".red(), e),
    }

    if !config.browser.enabled {
        println!("  {} Browser:  {}", "-".dimmed(), "shared browser disabled".dimmed());
        return;
    }
    match BrowserServer::locate(&config.browser) {
        Ok(path) => println!("  {} Browser:  {}", "✓".green(), display_path(&path)),
        Err(e) => println!(
            "  {} Browser:  {} {}",
            "!".yellow(),
            e,
            "(engine will launch its own)".dimmed()
        ),
    }
}

fn display_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
