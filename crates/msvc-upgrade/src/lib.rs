//! MSVC Upgrade
//!
//! Upgrade and rollback decisions for microservice definitions installed on
//! an edge node.
//!
//! # Components
//!
//! - [`can_upgrade`]: may a definition start upgrading now
//! - [`needs_rollback`]: has an in-flight upgrade stalled
//! - [`resolve_upgrade_candidate`]: newest materially different definition
//! - [`find_rollback_target`]: definition to revert to
//! - [`compile_policy`]: attributes merged into a policy document
//! - [`UpgradeEngine`]: periodic driver tying them together
//!
//! # Example
//!
//! ```rust,ignore
//! use msvc_upgrade::{EngineConfig, UpgradeEngine};
//!
//! let engine = UpgradeEngine::new(records, attributes, registry, sink, EngineConfig::default())
//!     .with_node_org("acme");
//! let report = engine.run_cycle().await?;
//! println!("{} upgrades started", report.upgrades_started());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod clock;
mod compiler;
mod config;
mod eligibility;
mod engine;
mod error;
mod memory;
mod phase;
mod registration;
mod registry;
mod resolver;
mod rollback;
mod sink;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compiler::{build_policy, compile_policy, max_agreements, AttributeFold};
pub use config::{ConfigError, EngineConfig};
pub use eligibility::can_upgrade;
pub use engine::{CycleFailure, CycleReport, Decision, UpgradeEngine};
pub use error::{PolicyCompileError, RegistryError, SinkError, StoreError, UpgradeError};
pub use memory::{CatalogEntry, InMemoryRegistry, InMemoryStore, NodeSnapshot};
pub use phase::{needs_rollback, needs_rollback_at};
pub use registration::unregister_from_exchange;
pub use registry::{RegistryClient, RetryPolicy, RetryingRegistry};
pub use resolver::resolve_upgrade_candidate;
pub use rollback::find_rollback_target;
pub use sink::{remove_policy, ChannelPolicySink, PolicyEvent, PolicyRemoval, PolicySink};
pub use store::{AttributeStore, DefinitionFilter, InstanceFilter, RecordStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
