//! CLI interface for release-mirror: argument parsing and subcommand routing.
//!
//! All mirroring logic lives in [`release_mirror_core`]; this module only
//! loads configuration, wires backends (see [`crate::wiring`]) and prints
//! what the core reports.
//!
//! ## Subcommands
//! - `sync [--repo owner/name]`: manual run, streams progress lines
//! - `status`: JSON status of every configured repository
//! - `tick`: timer entry point, runs a full sync when the interval has elapsed
//! - `rate-limit`: standalone upstream rate-limit probe
use crate::load_config::load_config;
use crate::wiring::build_orchestrator;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use release_mirror_core::orchestrator::{SyncRun, TriggerKind};
use release_mirror_core::schedule::{ScheduledTrigger, TickOutcome};
use std::path::PathBuf;

/// CLI for release-mirror: keep a bucket in sync with GitHub releases.
#[derive(Parser)]
#[clap(
    name = "release-mirror",
    version,
    about = "Mirror the latest GitHub release artifacts into a bucket"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync every configured repository, or only --repo
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Only sync this repository (owner/name)
        #[clap(long)]
        repo: Option<String>,
    },
    /// Print the status of every configured repository as JSON
    Status {
        #[clap(long)]
        config: PathBuf,
    },
    /// Run a scheduled check if the check interval has elapsed
    Tick {
        #[clap(long)]
        config: PathBuf,
    },
    /// Probe the GitHub API rate limit
    RateLimit {
        #[clap(long)]
        config: PathBuf,
    },
}

/// Print progress lines as they arrive, then wait for the run to finish.
async fn stream_run(mut run: SyncRun) -> Result<()> {
    while let Some(event) = run.events.next().await {
        println!("{event}");
        if event.is_terminal() {
            break;
        }
    }
    let summary = run.handle.await.context("Sync task failed")?;
    tracing::info!(
        run_id = %summary.id,
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        timed_out = summary.timed_out,
        "Sync run summary"
    );
    for (repo, error) in &summary.failed {
        eprintln!("{repo}: {error}");
    }
    Ok(())
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config, repo } => {
            let config = load_config(config)?;
            let orchestrator = build_orchestrator(&config)?;
            tracing::info!(command = "sync", repo = ?repo, "Starting manual sync");
            let run = orchestrator
                .run_sync(repo.as_deref(), TriggerKind::Manual)
                .await
                .map_err(|e| {
                    tracing::error!(command = "sync", error = %e, "Sync request rejected");
                    anyhow::Error::new(e)
                })?;
            stream_run(run).await
        }
        Commands::Status { config } => {
            let config = load_config(config)?;
            let orchestrator = build_orchestrator(&config)?;
            let status = orchestrator.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Tick { config } => {
            let config = load_config(config)?;
            let trigger = ScheduledTrigger::new(build_orchestrator(&config)?);
            match trigger.tick(Utc::now()).await {
                TickOutcome::Triggered(run) => stream_run(run).await,
                TickOutcome::Skipped(reason) => {
                    println!("Skipped: {reason}");
                    Ok(())
                }
                TickOutcome::Errored(e) => {
                    tracing::error!(command = "tick", error = %e, "Scheduled sync failed to start");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::RateLimit { config } => {
            let config = load_config(config)?;
            let orchestrator = build_orchestrator(&config)?;
            match orchestrator.probe_rate_limit().await {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => println!("Rate limit unavailable"),
            }
            Ok(())
        }
    }
}
