//! Agora CLI
//!
//! - `agora run`: build a world from configuration and run it to a terminal
//!   state, optionally resuming from the newest checkpoint
//! - `agora check-config`: print the effective configuration
//! - `agora inspect-checkpoint <file>`: verify a checkpoint and summarize it

use std::path::PathBuf;
use std::sync::Arc;

use agora_checkpoint::{CheckpointHandle, CheckpointManager};
use agora_kernel::{telemetry, Kernel, KernelConfig, PromptAgent};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

/// Agora CLI
#[derive(Parser)]
#[command(name = "agora")]
#[command(about = "Agora - resource-governed, tick-based multi-agent kernel", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "AGORA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides logging.level)
    #[arg(long, env = "AGORA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a world until it completes or halts
    Run {
        /// Override world.max_ticks
        #[arg(long)]
        max_ticks: Option<u64>,

        /// Continue from the newest checkpoint in checkpoint.dir
        #[arg(long)]
        resume: bool,

        /// Prompt each built-in agent sends per tick
        #[arg(long, default_value = "Describe the world")]
        prompt: String,
    },

    /// Validate and print the effective configuration
    CheckConfig,

    /// Verify a checkpoint file and print a summary
    InspectCheckpoint {
        /// Path to a checkpoint-<tick>.json file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        KernelConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    telemetry::init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run {
            max_ticks,
            resume,
            prompt,
        } => run(config, max_ticks, resume, &prompt).await,
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::InspectCheckpoint { path } => inspect(path),
    }
}

async fn run(
    mut config: KernelConfig,
    max_ticks: Option<u64>,
    resume: bool,
    prompt: &str,
) -> anyhow::Result<()> {
    if let Some(max_ticks) = max_ticks {
        config.world.max_ticks = max_ticks;
    }

    let kernel = if resume {
        Kernel::resume_latest(config)?
    } else {
        Kernel::bootstrap(config)?
    };
    let ledger = Arc::clone(kernel.ledger());
    let principals = kernel.principals();

    let mut world = kernel.into_world()?;
    for principal in principals.iter().cloned() {
        world.add_agent(Arc::new(PromptAgent::new(principal, prompt)))?;
    }

    let summary = world.run().await?;

    let balances: Vec<_> = principals
        .iter()
        .map(|p| {
            let accounts = ledger.accounts(p).unwrap_or_default();
            json!({ "principal": p, "accounts": accounts })
        })
        .collect();
    let report = json!({
        "final_tick": summary.final_tick,
        "status": summary.status,
        "budget": summary.budget,
        "invocations": summary.invocations,
        "failed_invocations": summary.failed_invocations,
        "last_checkpoint": summary.last_checkpoint.map(|h| h.path),
        "principals": balances,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn inspect(path: PathBuf) -> anyhow::Result<()> {
    let handle = CheckpointHandle::from_path(&path)?;
    let checkpoint = CheckpointManager::read(&handle)
        .with_context(|| format!("checkpoint {} failed verification", path.display()))?;

    let principals: Vec<_> = checkpoint
        .ledger
        .principals
        .iter()
        .map(|p| {
            json!({
                "principal": p.id,
                "active": p.active,
                "accounts": p.accounts,
                "transactions": p.transactions.len(),
            })
        })
        .collect();
    let report = json!({
        "version": checkpoint.version,
        "tick": checkpoint.tick,
        "taken_at": checkpoint.taken_at,
        "reason": checkpoint.reason,
        "world": checkpoint.world,
        "transactions": checkpoint.ledger.transaction_count(),
        "integrity_hash": checkpoint.integrity_hash,
        "principals": principals,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
