//! Wires an orchestrator instance to its channels and runs it.

use std::path::PathBuf;
use std::sync::Arc;

use drover::{Orchestrator, OrchestratorConfig, ReplySink};
use drover_protocol::{Command, CommandKind};
use drover_runtime::RenderBackend;
use drover_runtime::fake::FakeBackend;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::channels;
use crate::cli::EngineKind;
use crate::error::{CliError, Result};

pub async fn run(
    config: OrchestratorConfig,
    socket: Option<PathBuf>,
    engine: EngineKind,
) -> Result<()> {
    let backend: Arc<dyn RenderBackend> = match engine {
        EngineKind::Stub => {
            info!(target = "drover", "driving the in-process stub engine");
            FakeBackend::seeded()
        }
    };

    let orchestrator = Orchestrator::new(config, backend);
    let cleanup = orchestrator.cleanup_scheduler().spawn();

    let dispatcher = orchestrator.dispatcher();
    let sender = dispatcher.handle();
    let mut dispatch_task = tokio::spawn(dispatcher.run());

    let socket_task = match socket {
        Some(path) => Some(spawn_socket(path, sender.clone())?),
        None => None,
    };

    let mut stdio_task = tokio::spawn(channels::run_stdio(sender.clone()));

    tokio::select! {
        // Primary channel closed (EOF): wind the dispatcher down.
        _ = &mut stdio_task => {
            let (slot, reply_rx) = oneshot::channel();
            let shutdown = Command { id: -1, kind: CommandKind::Shutdown };
            if sender.submit(shutdown, ReplySink::pending(slot)).is_ok() {
                let _ = reply_rx.await;
            }
            join_dispatch(&mut dispatch_task).await?;
        }
        // A shutdown command arrived on some channel.
        result = &mut dispatch_task => {
            result.map_err(|err| CliError::Anyhow(anyhow::anyhow!("dispatch loop panicked: {err}")))??;
            // Replies queued to stdout just before shutdown are still in
            // flight on the writer task.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            stdio_task.abort();
        }
    }

    if let Some(task) = socket_task {
        task.abort();
    }
    cleanup.shutdown().await;
    debug!(target = "drover", "serve loop finished");
    Ok(())
}

async fn join_dispatch(task: &mut tokio::task::JoinHandle<drover::Result<()>>) -> Result<()> {
    task.await
        .map_err(|err| CliError::Anyhow(anyhow::anyhow!("dispatch loop panicked: {err}")))??;
    Ok(())
}

#[cfg(unix)]
fn spawn_socket(
    path: PathBuf,
    sender: drover::CommandSender,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = channels::bind_socket(&path)?;
    Ok(tokio::spawn(channels::serve_connections(listener, sender)))
}

#[cfg(not(unix))]
fn spawn_socket(
    path: PathBuf,
    _sender: drover::CommandSender,
) -> Result<tokio::task::JoinHandle<()>> {
    Err(CliError::Config {
        path,
        message: "out-of-band sockets require a unix platform".to_string(),
    })
}
