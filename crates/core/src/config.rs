//! Orchestrator tuning knobs.

use std::time::Duration;

use drover_protocol::VerificationLevel;
use serde::{Deserialize, Serialize};

/// Configuration for one orchestrator instance.
///
/// Durations are carried as millisecond fields so the struct maps 1:1
/// onto the JSON config file; accessors return [`Duration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard cap on live sessions.
    pub max_sessions: usize,
    /// Admission ceiling for projected memory use.
    pub memory_ceiling_mb: u64,
    /// Fixed per-session budget used for the memory estimate.
    pub session_budget_mb: u64,

    /// A released session idle this long becomes eligible for eviction.
    pub idle_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    /// Evictions per cleanup run.
    pub eviction_cap_per_run: usize,

    /// Session-level default applied when a command carries no level.
    pub default_verification: VerificationLevel,
    /// Default primitive timeout when a command carries none.
    pub action_timeout_ms: u64,
    /// Post-condition confirmation window.
    pub verify_timeout_ms: u64,
    pub verify_poll_ms: u64,
    /// Document/network quiescence window for strict verification.
    pub stabilize_timeout_ms: u64,

    /// How long the dispatcher waits to coalesce a burst into one batch.
    pub batch_coalesce_ms: u64,
    /// Sleep between ticks when idle with outstanding parallel work.
    pub idle_tick_sleep_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            memory_ceiling_mb: 4096,
            session_budget_mb: 256,
            idle_timeout_ms: 120_000,
            cleanup_interval_ms: 30_000,
            eviction_cap_per_run: 8,
            default_verification: VerificationLevel::Standard,
            action_timeout_ms: 10_000,
            verify_timeout_ms: 5_000,
            verify_poll_ms: 100,
            stabilize_timeout_ms: 10_000,
            batch_coalesce_ms: 5,
            idle_tick_sleep_ms: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn verify_poll(&self) -> Duration {
        Duration::from_millis(self.verify_poll_ms)
    }

    pub fn stabilize_timeout(&self) -> Duration {
        Duration::from_millis(self.stabilize_timeout_ms)
    }

    pub fn batch_coalesce(&self) -> Duration {
        Duration::from_millis(self.batch_coalesce_ms)
    }

    pub fn idle_tick_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_tick_sleep_ms)
    }

    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_mb * 1024 * 1024
    }

    pub fn session_budget_bytes(&self) -> u64 {
        self.session_budget_mb * 1024 * 1024
    }
}
