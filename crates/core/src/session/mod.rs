//! Session state and lifetime accounting.

pub mod registry;

pub use registry::{CheckedOutSession, SessionRegistry};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use drover_protocol::VerificationLevel;
use drover_runtime::{ContextConfig, ContextHandle};

/// One browsing context tracked by the registry.
///
/// The registry exclusively owns the backend handle; per-session mutable
/// fields are atomics so two unrelated sessions never contend on a lock.
pub struct Session {
    id: String,
    handle: Arc<dyn ContextHandle>,
    config: ContextConfig,
    created_at: Instant,
    /// Shared clock origin for `last_used_ms`, owned by the registry.
    epoch: Instant,
    last_used_ms: AtomicU64,
    in_use: AtomicBool,
    active_ops: AtomicU32,
    /// Close was requested while operations were in flight; reap when
    /// quiescent.
    condemned: AtomicBool,
    default_verification: VerificationLevel,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("handle", &"<dyn ContextHandle>")
            .field("config", &self.config)
            .field("created_at", &self.created_at)
            .field("epoch", &self.epoch)
            .field("last_used_ms", &self.last_used_ms.load(Ordering::Relaxed))
            .field("in_use", &self.in_use.load(Ordering::Relaxed))
            .field("active_ops", &self.active_ops.load(Ordering::Relaxed))
            .field("condemned", &self.condemned.load(Ordering::Relaxed))
            .field("default_verification", &self.default_verification)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        handle: Arc<dyn ContextHandle>,
        config: ContextConfig,
        epoch: Instant,
        default_verification: VerificationLevel,
    ) -> Self {
        let now_ms = epoch.elapsed().as_millis() as u64;
        Self {
            id,
            handle,
            config,
            created_at: Instant::now(),
            epoch,
            last_used_ms: AtomicU64::new(now_ms),
            in_use: AtomicBool::new(true),
            active_ops: AtomicU32::new(0),
            condemned: AtomicBool::new(false),
            default_verification,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &Arc<dyn ContextHandle> {
        &self.handle
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn default_verification(&self) -> VerificationLevel {
        self.default_verification
    }

    /// Refreshes `last_used`. `fetch_max` keeps it monotonically
    /// non-decreasing under concurrent touches.
    pub fn touch(&self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_used_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn last_used_ms(&self) -> u64 {
        self.last_used_ms.load(Ordering::Acquire)
    }

    pub fn idle_for(&self) -> Duration {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now_ms.saturating_sub(self.last_used_ms()))
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Returns the session to the reusable pool. Idempotent.
    pub fn release(&self) {
        self.in_use.store(false, Ordering::Release);
    }

    pub fn active_ops(&self) -> u32 {
        self.active_ops.load(Ordering::Acquire)
    }

    pub(crate) fn condemn(&self) {
        self.condemned.store(true, Ordering::Release);
    }

    pub(crate) fn is_condemned(&self) -> bool {
        self.condemned.load(Ordering::Acquire)
    }

    /// Registers an in-flight operation; the guard decrements on drop.
    ///
    /// A session is never destroyed while a guard for it exists.
    pub fn begin_op(self: &Arc<Self>) -> OpGuard {
        self.active_ops.fetch_add(1, Ordering::AcqRel);
        OpGuard {
            session: Arc::clone(self),
        }
    }
}

/// RAII handle for one in-flight operation on a session.
pub struct OpGuard {
    session: Arc<Session>,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.session.active_ops.fetch_sub(1, Ordering::AcqRel);
        // The session was busy until just now.
        self.session.touch();
    }
}
