//! The contract an engine must implement to be driven by drover.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_protocol::{CaptureMode, WaitPolicy};
use serde_json::Value;

use crate::outcome::{BackendResult, ElementState, NavigationOutcome, PageSnapshot};

/// Opaque per-context configuration passed through from session creation.
///
/// Profile and proxy blobs are owned by external collaborators; the core
/// never inspects them.
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    pub profile: Option<Value>,
    pub proxy: Option<Value>,
    pub block_resources: bool,
}

/// Engine-level entry points.
///
/// One instance per engine process; all context handles it hands out stay
/// valid until closed through [`ContextHandle::close`].
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Opens a fresh browsing context. The caller becomes the exclusive
    /// owner of the returned handle.
    async fn open_context(&self, config: &ContextConfig) -> BackendResult<Arc<dyn ContextHandle>>;

    /// Non-blocking progress tick for the engine's internal work loop.
    ///
    /// Must be invoked repeatedly for long-running primitives (navigation,
    /// pending network activity) to make progress.
    fn pump_pending_work(&self);

    /// Actual memory usage measurement, when the engine can provide one.
    fn measured_memory_bytes(&self) -> Option<u64>;
}

/// Per-context primitives. All calls are synchronous from the core's point
/// of view; long operations take an explicit timeout.
#[async_trait]
pub trait ContextHandle: Send + Sync {
    async fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> BackendResult<NavigationOutcome>;

    async fn click(&self, selector: &str, timeout: Duration) -> BackendResult<()>;

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        clear: bool,
        timeout: Duration,
    ) -> BackendResult<()>;

    async fn press(&self, key: &str, timeout: Duration) -> BackendResult<()>;

    async fn select(&self, selector: &str, value: &str, timeout: Duration) -> BackendResult<()>;

    async fn hover(&self, selector: &str, timeout: Duration) -> BackendResult<()>;

    async fn scroll(
        &self,
        selector: Option<&str>,
        dx: i64,
        dy: i64,
        timeout: Duration,
    ) -> BackendResult<()>;

    async fn upload(
        &self,
        selector: &str,
        files: &[String],
        timeout: Duration,
    ) -> BackendResult<()>;

    /// Evaluates a script, returning its textual result when
    /// `return_value` is set.
    async fn evaluate(
        &self,
        script: &str,
        return_value: bool,
        timeout: Duration,
    ) -> BackendResult<String>;

    /// Read-only element state for a selector. Reports zero matches via
    /// [`ElementState::count`] rather than an error.
    async fn query(&self, selector: &str) -> BackendResult<ElementState>;

    /// Read-only page state used by post-condition checks.
    async fn snapshot(&self) -> BackendResult<PageSnapshot>;

    async fn capture(&self, mode: CaptureMode) -> BackendResult<Vec<u8>>;

    /// Tears the context down. Potentially slow; never called under a
    /// registry lock.
    async fn close(&self) -> BackendResult<()>;
}
