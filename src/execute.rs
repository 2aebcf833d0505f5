//! Runs commands against the storage engine.
//!
//! The engine is not thread safe, so it lives on one blocking thread and every
//! front-end talks to it through an [`EngineHandle`]. Requests are served one at
//! a time in arrival order, so no caller ever sees a bucket mid-split.

use crate::command::*;
use crate::config::IndexConfig;
use crate::setup::setup_db;
use crate::storage::{Result, StorageEngine, StorageError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{info, warn};

const REQUEST_QUEUE_SIZE: usize = 100;

pub fn execute_command(storage: &mut StorageEngine, cmd: Command) -> Result<String> {
    match cmd {
        Command::Put(cmd) => {
            storage.put(cmd)?;
            Ok("OK".to_string())
        }
        Command::Get(cmd) => Ok(storage
            .get(&cmd)?
            .unwrap_or_else(|| "Key not found".to_string())),
        Command::Stats => {
            let stats = storage.stats()?;
            Ok(format!(
                "entries={} max_local_depth={} blocks={} live_buckets={} overflow_buckets={} records={}",
                stats.entries,
                stats.max_local_depth,
                stats.blocks,
                stats.live_buckets,
                stats.overflow_buckets,
                stats.records
            ))
        }
        Command::Exit => {
            storage.flush()?;
            Ok("Goodbye!".to_string())
        }
    }
}

/// Parses and runs one line of input. Returns the text to show the user and
/// whether the line asked to exit.
pub fn execute_user_input(storage: &mut StorageEngine, input: &str) -> Reply {
    match input.parse::<Command>() {
        Err(err) => Reply::message(format!("Error: {}", err)),
        Ok(cmd) => {
            let exit = cmd == Command::Exit;
            match execute_command(storage, cmd) {
                Ok(output) => Reply { output, exit },
                Err(err) => Reply {
                    output: format!("Error: {}", err),
                    exit,
                },
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub output: String,
    pub exit: bool,
}

impl Reply {
    fn message(output: String) -> Self {
        Self {
            output,
            exit: false,
        }
    }
}

pub enum Request {
    Line {
        line: String,
        cb: oneshot::Sender<Reply>,
    },
    Shutdown,
}

/// Cloneable sender side of the engine's request queue.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<Request>,
}

impl EngineHandle {
    pub async fn execute(&self, line: String) -> Result<Reply> {
        let (cb, reply) = oneshot::channel();
        self.sender
            .send(Request::Line { line, cb })
            .await
            .map_err(|_| StorageError::EngineStopped)?;
        reply.await.map_err(|_| StorageError::EngineStopped)
    }

    /// Asks the engine to close the storage and stop. Fine to call after it stopped.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(Request::Shutdown).await;
    }
}

/// Opens the storage and moves it onto its own blocking thread.
///
/// The returned task finishes once an `EXIT` line or a shutdown request has
/// been served, or every handle is dropped, and yields the result of closing
/// the storage.
pub async fn spawn_engine(config: IndexConfig) -> Result<(EngineHandle, JoinHandle<Result<()>>)> {
    let storage = spawn_blocking(move || setup_db(config)).await??;
    let (sender, receiver) = mpsc::channel(REQUEST_QUEUE_SIZE);
    let task = spawn_blocking(move || run_engine(storage, receiver));
    Ok((EngineHandle { sender }, task))
}

fn run_engine(mut storage: StorageEngine, mut receiver: mpsc::Receiver<Request>) -> Result<()> {
    info!("storage engine started");
    while let Some(request) = receiver.blocking_recv() {
        match request {
            Request::Line { line, cb } => {
                let reply = execute_user_input(&mut storage, &line);
                let exit = reply.exit;
                if cb.send(reply).is_err() {
                    warn!("requester went away before its reply");
                }
                if exit {
                    break;
                }
            }
            Request::Shutdown => break,
        }
    }
    receiver.close();
    storage.close()?;
    info!("storage engine stopped");
    Ok(())
}
