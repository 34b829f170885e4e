//! Orchestration core: session pool, action verification, command
//! dispatch, and idle reclamation.
//!
//! Everything here drives an external Render Backend through the
//! `drover-runtime` traits; no rendering, scripting, or network fetching
//! happens in this crate. The entry point is [`Orchestrator`], an
//! explicitly constructed instance - there is no ambient global state, so
//! tests can run several orchestrators side by side.

pub mod cleanup;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod session;

pub use cleanup::CleanupScheduler;
pub use config::OrchestratorConfig;
pub use dispatch::{Affinity, CommandSender, Dispatcher, PendingCommand, ReplySink};
pub use error::{CoreError, Result};
pub use executor::{Action, ActionExecutor, ActionOutput};
pub use orchestrator::Orchestrator;
pub use session::{Session, SessionRegistry};
