//! Render Backend client contract.
//!
//! The orchestrator core never renders anything itself; it drives an
//! external engine through the traits in this crate. Asynchrony is modeled
//! with explicit timeouts and polling (`pump_pending_work`), never
//! callbacks, so a backend implementation stays a narrow surface.
//!
//! [`fake`] provides an in-memory engine with a scripting surface for
//! tests and smoke runs.

pub mod backend;
pub mod fake;
pub mod outcome;

pub use backend::*;
pub use outcome::*;
