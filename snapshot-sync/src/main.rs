//! Snapshot Sync - Main entry point
//!
//! Waits for `{"command": "sync"}` lines on stdin and runs one sync cycle per
//! command.

use anyhow::{Context, Result};
use clap::Parser;
use snapshot_sync::command::{spawn_stdin_reader, CommandLoop, COMMAND_QUEUE_CAPACITY};
use snapshot_sync::daemon::shutdown::ShutdownCoordinator;
use snapshot_sync::remote::DropboxClient;
use snapshot_sync::snapshots::SupervisorClient;
use snapshot_sync::{utils, Config, SyncEngine, SyncSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON options or TOML)
    #[arg(short, long, value_name = "FILE", default_value = "/data/options.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides config
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run a single sync cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading options from {}", args.config.display()))?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting snapshot-sync v{}", env!("CARGO_PKG_VERSION"));

    // Authentication failure is fatal
    let dropbox = DropboxClient::connect(config.oauth_access_token.clone(), &config.dropbox)
        .await
        .context("Dropbox login failed")?;

    let snapshot_token = config.snapshot_host.resolve_token();
    if snapshot_token.is_none() {
        tracing::warn!("No snapshot host token configured, local snapshot requests are unauthenticated");
    }
    let host = SupervisorClient::new(config.snapshot_host.url.clone(), snapshot_token);

    let engine = Arc::new(SyncEngine::new(
        Arc::new(dropbox),
        Arc::new(host),
        SyncSettings::from(&config),
    ));
    engine.report_usage().await;

    if args.once {
        engine.run_once().await;
        return Ok(());
    }

    // Shutdown is observed between commands only
    let shutdown = ShutdownCoordinator::new();
    let token = shutdown.token();
    tokio::spawn(async move {
        shutdown.wait_for_signal().await;
    });

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let _reader = spawn_stdin_reader(tx);

    tracing::info!("Waiting for commands, send {{\"command\": \"sync\"}} to trigger backup");
    let cycles = CommandLoop::new(engine, token.clone()).run(rx).await;

    if !token.is_cancelled() {
        tracing::info!("Trigger input closed after {} cycle(s), waiting for shutdown signal", cycles);
        token.cancelled().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
