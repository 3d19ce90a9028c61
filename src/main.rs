//! mend - CI failure remediation engine.
//!
//! One-shot process invoked per failing workflow run: classifies the
//! failure, applies a deterministic or AI-assisted fix, and produces a
//! corrective PR, a rerun, an escalation issue, or a manual-review issue.

mod ai;
mod collect;
mod config;
mod engine;
mod escalate;
mod fixers;
mod flaky;
mod github;
mod process;
mod publish;
mod signature;
mod state;
mod types;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::RemedyConfig;
use crate::engine::Engine;
use crate::process::TokioRunner;
use crate::types::RunOutcome;

/// CI failure remediation engine.
#[derive(Parser)]
#[command(name = "mend")]
#[command(about = "CI failure remediation engine - turns failed runs into fixes")]
#[command(version)]
struct Cli {
    /// Repository full name (owner/name)
    #[arg(long)]
    repo: String,

    /// Failed workflow run ID
    #[arg(long)]
    run_id: u64,

    /// Directory for shared state files (pattern store, cooldowns)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Optional JSON config file overriding the built-in constants
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("mend=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mend=info,warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(&cli).await {
        Ok(outcome) => {
            report(&outcome);
        }
        Err(e) => {
            error!("Remediation failed: {e:#}");
            eprintln!("{} {e:#}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<RunOutcome> {
    let mut config = RemedyConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.state_dir {
        config.state_dir.clone_from(dir);
    }

    info!("Remediating {} run {}", cli.repo, cli.run_id);
    let engine = Engine::new(&cli.repo, cli.run_id, config, Box::new(TokioRunner));
    engine.run().await
}

/// One unambiguous terminal line per run; the absence of this line is
/// itself an anomaly for the surrounding observability tooling.
fn report(outcome: &RunOutcome) {
    info!(outcome = outcome.label(), "Remediation finished");
    match outcome {
        RunOutcome::PullRequest { url } => {
            println!("{} opened {url}", "pr:".green().bold());
        }
        RunOutcome::Rerun => {
            println!("{} failed jobs re-run", "rerun:".green().bold());
        }
        RunOutcome::Escalated { issue_url } => {
            println!("{} {issue_url}", "escalated:".yellow().bold());
        }
        RunOutcome::ManualIssue { issue_url } => {
            println!("{} {issue_url}", "manual-review:".yellow().bold());
        }
        RunOutcome::Skipped { reason } => {
            println!("{} {reason}", "skipped:".dimmed().bold());
        }
    }
}
