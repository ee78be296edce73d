//! asr-sched — scheduler entry point.
//!
//! Without arguments, runs one control-loop pass and exits; the process is
//! meant to be invoked periodically by cron. With an integer argument N,
//! seeds N dev jobs with sample audio instead.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use asr_jobs::store::JobStore;
use asr_jobs::{config, scheduler, seed};

#[derive(Debug, Parser)]
#[command(name = "asr-sched")]
#[command(about = "Speech-recognition job scheduler: one control-loop pass per invocation")]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed N dev jobs with sample audio instead of running a pass.
    seed: Option<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    asr_jobs::init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        tracing::error!(vid = "task", "{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = config::resolve_path(cli.config.as_deref());
    let config = config::load(&path)?;
    let store = JobStore::connect(&config)?;
    if config.create_table {
        store.ensure_table().await?;
    }

    match cli.seed {
        Some(n) => seed::run(&config, &store, n).await,
        None => scheduler::run_pass(&config, &store).await,
    }
}
