//! Wire types for the drover command protocol.
//!
//! Everything here is serde-serializable data exchanged over line-oriented
//! JSON: typed commands in, correlated replies out, and the shared
//! ActionResult taxonomy both directions.
//!
//! Types in this crate carry no behavior beyond (de)serialization and
//! constructor invariants, and change only when the wire protocol does.
//! The orchestration logic consuming them lives in `drover`.

pub mod command;
pub mod result;
pub mod wire;

pub use command::*;
pub use result::*;
pub use wire::*;
