//! Explicitly-constructed orchestrator instance.
//!
//! No ambient global state: whoever owns the process lifetime constructs
//! one of these and wires its dispatcher and cleanup scheduler up.
//! Tests routinely run several instances side by side.

use std::sync::Arc;

use drover_runtime::RenderBackend;

use crate::cleanup::CleanupScheduler;
use crate::config::OrchestratorConfig;
use crate::dispatch::Dispatcher;
use crate::executor::ActionExecutor;
use crate::session::SessionRegistry;

pub struct Orchestrator {
    config: OrchestratorConfig,
    backend: Arc<dyn RenderBackend>,
    registry: Arc<SessionRegistry>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, backend: Arc<dyn RenderBackend>) -> Self {
        let registry = SessionRegistry::new(Arc::clone(&backend), &config);
        Self {
            config,
            backend,
            registry,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn RenderBackend> {
        &self.backend
    }

    pub fn executor(&self) -> ActionExecutor {
        ActionExecutor::new(&self.config)
    }

    /// A fresh dispatcher bound to this orchestrator's registry and
    /// backend. Grab its [`handle`](Dispatcher::handle) before `run`.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            self.executor(),
            &self.config,
        )
    }

    pub fn cleanup_scheduler(&self) -> CleanupScheduler {
        CleanupScheduler::new(Arc::clone(&self.registry), Arc::clone(&self.backend), &self.config)
    }
}
