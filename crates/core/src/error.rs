//! Error types for the orchestration core.

use drover_runtime::BackendError;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures surfaced by registry and dispatch plumbing.
///
/// Action-level failures never travel this path; they resolve into
/// `ActionResult` values. `CoreError` covers admission decisions and
/// infrastructure faults only.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("session limit reached ({limit} live sessions)")]
    ResourceExhausted { limit: usize },

    #[error("projected memory {projected_mb} MB exceeds ceiling {ceiling_mb} MB")]
    MemoryPressure { projected_mb: u64, ceiling_mb: u64 },

    #[error("no such context: {0}")]
    NotFound(String),

    #[error("render backend: {0}")]
    Backend(#[from] BackendError),

    #[error("dispatch queue closed")]
    QueueClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
