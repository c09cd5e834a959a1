//! Minimal CLI front-end (SPEC_FULL §B). The exit-code contract (§6) is the
//! only externally-specified surface; flags and output formatting beyond
//! that are this crate's own design, not the specification's.

use clap::{Parser, Subcommand};
use ksail::config::ConfigLoader;
use ksail::orchestrator::Orchestrator;
use ksail::state::StateStore;
use ksail::update::UpdateOptions;
use ksail::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ksail", about = "Cluster lifecycle orchestrator")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a cluster from the loaded config.
    Create,
    /// Diff the loaded config against persisted state and apply in-place changes.
    Update {
        #[arg(long)]
        dry_run: bool,
    },
    /// Tear down a cluster and its persisted state.
    Delete { name: String },
    /// Start a stopped cluster's nodes.
    Start { name: String },
    /// Stop a cluster's nodes without deleting it.
    Stop { name: String },
    /// Print the persisted state for a cluster, if any.
    Status { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", trim_error_prefix(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let state = StateStore::default_root()?;
    let orchestrator = Orchestrator::new(state.clone());

    match cli.command {
        Command::Create => {
            let file_config = ConfigLoader::load(cli.config.as_deref())?;
            ksail::logging::init_logging(&file_config.logging, &file_config.cluster.name)
                .map_err(|e| Error::ConfigInvalid(e.to_string()))?;
            orchestrator
                .create(file_config.cluster, CancellationToken::new())
                .await
        }
        Command::Update { dry_run } => {
            let file_config = ConfigLoader::load(cli.config.as_deref())?;
            let result = orchestrator
                .update(file_config.cluster, UpdateOptions { dry_run })
                .await?;
            // Dry-run exits 0 regardless of what the diff contains (§6); a
            // completed apply with any failed change is still reported, not
            // turned into a process error, so the caller can inspect exactly
            // which fields didn't apply.
            if !result.failed_changes.is_empty() {
                for (change, reason) in &result.failed_changes {
                    eprintln!("field '{}' failed to apply: {reason}", change.field);
                }
            }
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
            Ok(())
        }
        Command::Delete { name } => orchestrator.delete(&name).await,
        Command::Start { name } => {
            let spec = state.load(&name).await?;
            ksail::distribution::provisioner_for(&spec).start(&name).await
        }
        Command::Stop { name } => {
            let spec = state.load(&name).await?;
            ksail::distribution::provisioner_for(&spec).stop(&name).await
        }
        Command::Status { name } => {
            let spec = state.load(&name).await?;
            println!("{}", serde_json::to_string_pretty(&spec).unwrap_or_default());
            Ok(())
        }
    }
}

fn trim_error_prefix(e: &Error) -> String {
    e.to_string()
}
