//! MSVC Model
//!
//! Records and value types shared by the upgrade engine.
//!
//! # Core Concepts
//!
//! - [`MicroserviceDefinition`]: an installed definition and its upgrade state
//! - [`MetadataHash`]: SHA-256 fingerprint of the registry record
//! - [`UpgradeProgress`]: explicit upgrade phase with audit timestamps
//! - [`VersionRange`]: interval of acceptable versions
//! - [`PolicyDocument`]: compiled terms published for a definition
//!
//! # Example
//!
//! ```rust,ignore
//! use msvc_model::{ExchangeMicroservice, MicroserviceDefinition};
//!
//! let def = MicroserviceDefinition::from_exchange(&ems, "acme")?;
//! println!("installed {def} hash {}", def.metadata_hash.short());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod attribute;
mod definition;
mod exchange;
mod hash;
mod instance;
mod policy;
mod progress;
mod range;
mod version;

pub use attribute::{Attribute, AttributeKind, AttributeMeta};
pub use definition::{
    DefinitionId, LineageKey, MicroserviceDefinition, Sharable, DEFAULT_UPGRADE_VERSION_RANGE,
};
pub use exchange::{
    ExchangeMicroservice, ExchangeNode, HardwareMatch, NodePut, RegisteredMicroservice,
    UserInput, WorkloadDeployment,
};
pub use hash::{HashError, MetadataHash, HASH_LEN};
pub use instance::MicroserviceInstance;
pub use policy::{
    parse_agreement_protocols, AgreementProtocol, ApiSpec, Blockchain, HaGroup, Meter,
    PolicyDocument, PolicyHeader, ProtocolError, KNOWN_PROTOCOLS, POLICY_FORMAT_VERSION,
};
pub use progress::{
    decode_reason_code, FailureReason, TransitionError, UpgradeEvent, UpgradeFailure,
    UpgradePhase, UpgradeProgress, UpgradeTimestamps,
};
pub use range::{RangeError, VersionRange, INFINITY};
pub use version::{Version, VersionError, VersionPrecedence};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
