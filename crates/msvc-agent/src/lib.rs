//! MSVC Agent
//!
//! Offline front end for the upgrade engine: load a node snapshot and a
//! registry catalog, run one reconciliation cycle against in-memory
//! collaborators and report what would happen.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod plan;

pub use plan::{load_catalog, load_snapshot, run_plan, LocalNode, PlanInput, PlanOutput};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
