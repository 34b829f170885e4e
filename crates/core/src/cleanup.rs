//! Background reclamation of idle sessions.
//!
//! One shared periodic task for the whole orchestrator - never a timer
//! thread per session. Each run uses the registry's two-phase eviction:
//! pick-and-remove the oldest eligible entry under the map lock, tear it
//! down outside any lock, repeat up to the per-run cap.

use std::sync::Arc;
use std::time::Duration;

use drover_runtime::RenderBackend;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::session::SessionRegistry;

pub struct CleanupScheduler {
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn RenderBackend>,
    interval: Duration,
    idle_timeout: Duration,
    eviction_cap: usize,
}

impl CleanupScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        backend: Arc<dyn RenderBackend>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            interval: config.cleanup_interval(),
            idle_timeout: config.idle_timeout(),
            eviction_cap: config.eviction_cap_per_run,
        }
    }

    /// One scheduler pass: evict eligible sessions, then reconcile the
    /// memory figure used by admission control.
    pub async fn run_once(&self) {
        let mut evicted = 0usize;
        while evicted < self.eviction_cap {
            let Some(session) = self.registry.take_oldest_idle(self.idle_timeout) else {
                break;
            };
            evicted += 1;

            // Teardown runs outside any registry lock; a failed close is
            // logged and skipped, never aborts the run.
            match session.handle().close().await {
                Ok(()) => {
                    debug!(
                        target = "drover.cleanup",
                        context_id = %session.id(),
                        idle_ms = session.idle_for().as_millis() as u64,
                        "evicted idle context"
                    );
                }
                Err(err) => {
                    warn!(
                        target = "drover.cleanup",
                        context_id = %session.id(),
                        error = %err,
                        "teardown failed; context dropped from registry"
                    );
                }
            }
        }

        if let Some(measured) = self.backend.measured_memory_bytes() {
            self.registry.set_measured_memory(measured);
        }
    }

    /// Spawns the periodic loop; the returned handle stops it.
    pub fn spawn(self) -> CleanupHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The immediate first tick has nothing to reclaim.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    _ = stop_rx.changed() => break,
                }
            }
            debug!(target = "drover.cleanup", "cleanup scheduler stopped");
        });
        CleanupHandle { stop_tx, task }
    }
}

/// Stops the spawned scheduler loop.
pub struct CleanupHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}
