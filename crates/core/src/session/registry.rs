//! Exclusive source of truth for which sessions exist.
//!
//! The map lock covers structural changes and enumeration only; it is
//! never held across a backend call. Session teardown always happens in
//! two phases: pick-and-remove under the write lock, close outside it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use drover_protocol::VerificationLevel;
use drover_runtime::{ContextConfig, RenderBackend};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{OpGuard, Session};
use crate::config::OrchestratorConfig;
use crate::error::{CoreError, Result};

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    backend: Arc<dyn RenderBackend>,
    epoch: Instant,
    next_id: AtomicU64,
    /// Creations past admission but not yet inserted into the map.
    reserved: AtomicUsize,
    /// Last reconciled measurement from the backend; 0 means unknown.
    measured_memory: AtomicU64,
    max_sessions: usize,
    memory_ceiling: u64,
    session_budget: u64,
    default_verification: VerificationLevel,
}

/// A session plus the operation guard that keeps it alive.
pub struct CheckedOutSession {
    pub session: Arc<Session>,
    pub guard: OpGuard,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn RenderBackend>, config: &OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            backend,
            epoch: Instant::now(),
            next_id: AtomicU64::new(0),
            reserved: AtomicUsize::new(0),
            measured_memory: AtomicU64::new(0),
            max_sessions: config.max_sessions,
            memory_ceiling: config.memory_ceiling_bytes(),
            session_budget: config.session_budget_bytes(),
            default_verification: config.default_verification,
        })
    }

    /// Creates a session. Admission is decided before the backend context
    /// is opened, so a denied create constructs nothing.
    pub async fn create(
        &self,
        config: ContextConfig,
        verification: Option<VerificationLevel>,
    ) -> Result<Arc<Session>> {
        let reservation = self.try_reserve()?;

        let handle = self.backend.open_context(&config).await?;

        let id = format!("ctx-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let session = Arc::new(Session::new(
            id.clone(),
            handle,
            config,
            self.epoch,
            verification.unwrap_or(self.default_verification),
        ));

        {
            let mut sessions = self.sessions.write();
            sessions.insert(id.clone(), Arc::clone(&session));
            drop(reservation);
        }

        debug!(target = "drover.session", context_id = %id, "context created");
        Ok(session)
    }

    /// Looks a session up, refreshing `last_used`.
    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        session.touch();
        Ok(Arc::clone(session))
    }

    /// Looks a session up and registers an in-flight operation while the
    /// map's read lock is still held, so eviction (which needs the write
    /// lock) can never observe a stale zero op-count for it.
    pub fn checkout(&self, id: &str) -> Result<CheckedOutSession> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        session.touch();
        let session = Arc::clone(session);
        let guard = session.begin_op();
        Ok(CheckedOutSession { session, guard })
    }

    /// Returns a session to the reusable pool. Safe to repeat.
    pub fn release(&self, id: &str) -> Result<()> {
        let session = self.get(id)?;
        session.release();
        debug!(target = "drover.session", context_id = %id, "context released");
        Ok(())
    }

    /// Destroys a session if it exists. Returns `false` for unknown ids.
    ///
    /// A session with in-flight operations is condemned instead of
    /// destroyed; the cleanup scheduler reaps it once quiescent.
    pub async fn close(&self, id: &str) -> bool {
        let session = {
            let mut sessions = self.sessions.write();
            match sessions.remove(id) {
                None => return false,
                Some(session) if session.active_ops() > 0 => {
                    session.condemn();
                    session.release();
                    debug!(
                        target = "drover.session",
                        context_id = %id,
                        active_ops = session.active_ops(),
                        "close deferred; context busy"
                    );
                    sessions.insert(id.to_string(), session);
                    return true;
                }
                Some(session) => session,
            }
        };

        // Teardown outside the lock.
        if let Err(err) = session.handle().close().await {
            warn!(target = "drover.session", context_id = %id, error = %err, "context teardown failed");
        } else {
            debug!(target = "drover.session", context_id = %id, "context closed");
        }
        true
    }

    /// Point-in-time snapshot of live session ids.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn live_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Phase one of two-phase eviction: removes and returns the single
    /// oldest eligible entry. Teardown is the caller's job, outside any
    /// lock.
    ///
    /// Eligible: not in use, zero in-flight operations, and either idle
    /// beyond `idle_for` or condemned by a deferred close.
    pub fn take_oldest_idle(&self, idle_for: Duration) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let id = sessions
            .values()
            .filter(|s| {
                !s.is_in_use()
                    && s.active_ops() == 0
                    && (s.is_condemned() || s.idle_for() >= idle_for)
            })
            .min_by_key(|s| s.last_used_ms())
            .map(|s| s.id().to_string())?;
        sessions.remove(&id)
    }

    pub fn set_measured_memory(&self, bytes: u64) {
        self.measured_memory.store(bytes, Ordering::Release);
    }

    pub fn measured_memory(&self) -> u64 {
        self.measured_memory.load(Ordering::Acquire)
    }

    /// Admission control. Holds the write lock briefly so concurrent
    /// creates serialize their reservations.
    fn try_reserve(&self) -> Result<ReservationGuard<'_>> {
        let sessions = self.sessions.write();
        let live = sessions.len();
        let reserved = self.reserved.load(Ordering::Acquire);

        if live + reserved >= self.max_sessions {
            return Err(CoreError::ResourceExhausted {
                limit: self.max_sessions,
            });
        }

        let incoming = (reserved as u64 + 1) * self.session_budget;
        let estimated = live as u64 * self.session_budget + incoming;
        let measured = self.measured_memory() + incoming;
        let projected = estimated.max(measured);
        if projected > self.memory_ceiling {
            return Err(CoreError::MemoryPressure {
                projected_mb: projected / (1024 * 1024),
                ceiling_mb: self.memory_ceiling / (1024 * 1024),
            });
        }

        self.reserved.fetch_add(1, Ordering::AcqRel);
        drop(sessions);
        Ok(ReservationGuard { registry: self })
    }
}

/// Holds one admission slot between the admission check and map insert.
struct ReservationGuard<'a> {
    registry: &'a SessionRegistry,
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        self.registry.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_runtime::fake::FakeBackend;

    fn config(max_sessions: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            max_sessions,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn create_then_close_round_trips() {
        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(backend, &config(4));

        let session = registry.create(ContextConfig::default(), None).await.unwrap();
        let id = session.id().to_string();
        assert!(registry.get(&id).is_ok());

        assert!(registry.close(&id).await);
        assert!(matches!(registry.get(&id), Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn close_unknown_id_returns_false() {
        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(backend, &config(4));
        assert!(!registry.close("ctx-404").await);
    }

    #[tokio::test]
    async fn admission_denies_at_session_cap() {
        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(Arc::clone(&backend) as _, &config(1));

        registry.create(ContextConfig::default(), None).await.unwrap();
        let err = registry.create(ContextConfig::default(), None).await.unwrap_err();
        assert!(matches!(err, CoreError::ResourceExhausted { limit: 1 }));
        // The losing create never reached the backend.
        assert_eq!(backend.open_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_race_one_slot() {
        let backend = FakeBackend::new();
        backend.set_open_delay(Duration::from_millis(20));
        let registry = SessionRegistry::new(Arc::clone(&backend) as _, &config(1));

        let (a, b) = tokio::join!(
            registry.create(ContextConfig::default(), None),
            registry.create(ContextConfig::default(), None),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(backend.open_count(), 1);
    }

    #[tokio::test]
    async fn memory_pressure_denies_before_construction() {
        let backend = FakeBackend::new();
        let cfg = OrchestratorConfig {
            max_sessions: 100,
            memory_ceiling_mb: 512,
            session_budget_mb: 256,
            ..OrchestratorConfig::default()
        };
        let registry = SessionRegistry::new(Arc::clone(&backend) as _, &cfg);

        registry.create(ContextConfig::default(), None).await.unwrap();
        registry.create(ContextConfig::default(), None).await.unwrap();
        let err = registry.create(ContextConfig::default(), None).await.unwrap_err();
        assert!(matches!(err, CoreError::MemoryPressure { .. }));
        assert_eq!(backend.open_count(), 2);
    }

    #[tokio::test]
    async fn measured_memory_tightens_admission() {
        let backend = FakeBackend::new();
        let cfg = OrchestratorConfig {
            max_sessions: 100,
            memory_ceiling_mb: 1024,
            session_budget_mb: 64,
            ..OrchestratorConfig::default()
        };
        let registry = SessionRegistry::new(Arc::clone(&backend) as _, &cfg);

        registry.create(ContextConfig::default(), None).await.unwrap();
        // Reconciled measurement says the engine is already near the ceiling.
        registry.set_measured_memory(1000 * 1024 * 1024);
        let err = registry.create(ContextConfig::default(), None).await.unwrap_err();
        assert!(matches!(err, CoreError::MemoryPressure { .. }));
    }

    #[tokio::test]
    async fn failed_backend_open_frees_the_reservation() {
        let backend = FakeBackend::new();
        backend.fail_next_open("engine unavailable");
        let registry = SessionRegistry::new(Arc::clone(&backend) as _, &config(1));

        assert!(registry.create(ContextConfig::default(), None).await.is_err());
        // The slot is free again.
        assert!(registry.create(ContextConfig::default(), None).await.is_ok());
    }

    #[tokio::test]
    async fn release_twice_is_safe() {
        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(backend, &config(4));
        let session = registry.create(ContextConfig::default(), None).await.unwrap();
        let id = session.id().to_string();

        registry.release(&id).unwrap();
        registry.release(&id).unwrap();
        assert!(!session.is_in_use());
        assert!(matches!(
            registry.release("ctx-404"),
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn take_oldest_idle_skips_busy_and_in_use() {
        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(backend, &config(4));

        let a = registry.create(ContextConfig::default(), None).await.unwrap();
        let b = registry.create(ContextConfig::default(), None).await.unwrap();
        let c = registry.create(ContextConfig::default(), None).await.unwrap();

        // a stays in use; b is released but has an in-flight op; c is idle.
        registry.release(b.id()).unwrap();
        let _guard = b.begin_op();
        registry.release(c.id()).unwrap();

        let picked = registry.take_oldest_idle(Duration::ZERO).unwrap();
        assert_eq!(picked.id(), c.id());
        assert!(registry.take_oldest_idle(Duration::ZERO).is_none());
        assert!(registry.get(a.id()).is_ok());
    }

    #[tokio::test]
    async fn close_on_busy_session_defers_to_cleanup() {
        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(Arc::clone(&backend) as _, &config(4));
        let session = registry.create(ContextConfig::default(), None).await.unwrap();
        let id = session.id().to_string();

        let guard = session.begin_op();
        assert!(registry.close(&id).await);
        // Still present while the operation runs.
        assert!(registry.get(&id).is_ok());

        drop(guard);
        let picked = registry.take_oldest_idle(Duration::from_secs(3600)).unwrap();
        assert_eq!(picked.id(), id);
    }

    #[tokio::test]
    async fn list_is_sorted_snapshot() {
        let backend = FakeBackend::new();
        let registry = SessionRegistry::new(backend, &config(4));
        registry.create(ContextConfig::default(), None).await.unwrap();
        registry.create(ContextConfig::default(), None).await.unwrap();
        assert_eq!(registry.list(), vec!["ctx-1".to_string(), "ctx-2".to_string()]);
    }
}
