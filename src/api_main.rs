//! asr-api — HTTP ingress and query server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use asr_jobs::api::{self, AppState};
use asr_jobs::config;
use asr_jobs::store::JobStore;

#[derive(Debug, Parser)]
#[command(name = "asr-api")]
#[command(about = "Speech-recognition job service: HTTP audio ingress and job queries")]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
}

#[tokio::main]
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

    let state = AppState { config: Arc::new(config), store };
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("bind {}", cli.listen))?;
    tracing::info!(vid = "task", "listening on {}", cli.listen);
    axum::serve(listener, api::router(state)).await.context("serve")?;
    Ok(())
}
