//! Trigger channel: newline-delimited JSON commands.
//!
//! A reader task forwards raw lines into an mpsc channel and [`CommandLoop`]
//! is its only consumer, so one command is fully processed (every upload and
//! deletion included) before the next line is looked at.

use crate::sync::SyncEngine;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Capacity of the line channel between reader and loop
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sync,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("No valid JSON payload received: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Wrong input, send `{{\"command\": \"sync\"}}` to trigger backup.")]
    Unrecognized,
}

/// Parse one input line. Only an object whose `command` is `sync` (any case)
/// is recognized.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let value: Value = serde_json::from_str(line)?;

    let command = value
        .as_object()
        .and_then(|obj| obj.get("command"))
        .and_then(Value::as_str);

    match command {
        Some(c) if c.eq_ignore_ascii_case("sync") => Ok(Command::Sync),
        _ => Err(CommandError::Unrecognized),
    }
}

/// Forward lines from `reader` into `tx` until EOF or the receiver goes away.
pub fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Command input closed");
                    break;
                }
                Err(e) => {
                    error!("Error reading command input: {}", e);
                    break;
                }
            }
        }
    })
}

pub fn spawn_stdin_reader(tx: mpsc::Sender<String>) -> JoinHandle<()> {
    spawn_line_reader(tokio::io::stdin(), tx)
}

pub struct CommandLoop {
    engine: Arc<SyncEngine>,
    shutdown: CancellationToken,
}

impl CommandLoop {
    pub fn new(engine: Arc<SyncEngine>, shutdown: CancellationToken) -> Self {
        Self { engine, shutdown }
    }

    /// Consume lines until the channel closes or shutdown is requested.
    /// Returns the number of sync cycles run.
    pub async fn run(&self, mut rx: mpsc::Receiver<String>) -> usize {
        let mut cycles = 0;

        loop {
            let line = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            if self.handle_line(&line).await {
                cycles += 1;
            }
        }

        cycles
    }

    /// Returns true when the line triggered a sync cycle.
    pub async fn handle_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        match parse_command(line) {
            Ok(Command::Sync) => {
                self.engine.run_once().await;
                true
            }
            Err(e @ CommandError::InvalidJson(_)) => {
                error!("{}", e);
                debug!("Rejected input: {}", line);
                false
            }
            Err(e @ CommandError::Unrecognized) => {
                info!("{}", e);
                false
            }
        }
    }
}
