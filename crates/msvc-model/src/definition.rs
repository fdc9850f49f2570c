//! Local microservice definition records
//!
//! One record per installed (spec ref, org, version). Records are mutated in
//! place as an upgrade progresses and archived, never deleted, once they are
//! superseded or rolled back from.

use crate::exchange::{ExchangeMicroservice, HardwareMatch, UserInput, WorkloadDeployment};
use crate::hash::{HashError, MetadataHash};
use crate::progress::UpgradeProgress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Version range given to freshly converted definitions
pub const DEFAULT_UPGRADE_VERSION_RANGE: &str = "0.0.0";

/// Local definition identifier (ULID, sortable by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DefinitionId(pub Ulid);

impl DefinitionId {
    /// Generate a new id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DefinitionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DefinitionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// How many agreements an instance of the definition may serve at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sharable {
    /// One agreement, one instance
    #[default]
    Exclusive,
    /// One shared instance
    Single,
    /// Several instances
    Multiple,
}

impl Sharable {
    /// Parse the registry's sharing mode, case-insensitively.
    ///
    /// Empty or unknown input is treated as [`Sharable::Exclusive`].
    #[must_use]
    pub fn parse_lenient(mode: &str) -> Self {
        match mode.trim().to_ascii_lowercase().as_str() {
            "single" => Self::Single,
            "multiple" => Self::Multiple,
            _ => Self::Exclusive,
        }
    }
}

impl fmt::Display for Sharable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exclusive => "exclusive",
            Self::Single => "single",
            Self::Multiple => "multiple",
        })
    }
}

/// A microservice definition installed on this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroserviceDefinition {
    pub id: DefinitionId,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub spec_ref: String,
    pub org: String,
    pub version: String,
    pub arch: String,
    #[serde(default)]
    pub sharable: Sharable,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub match_hardware: HardwareMatch,
    #[serde(default)]
    pub user_inputs: Vec<UserInput>,
    #[serde(default)]
    pub workloads: Vec<WorkloadDeployment>,
    #[serde(default)]
    pub last_updated: String,

    /// Digest of the registry record this definition came from
    pub metadata_hash: MetadataHash,

    /// Node-local display name
    #[serde(default)]
    pub name: String,
    pub upgrade_version_range: String,
    #[serde(default)]
    pub auto_upgrade: bool,
    /// Evacuate agreements before upgrading
    #[serde(default = "default_active_upgrade")]
    pub active_upgrade: bool,

    #[serde(default)]
    pub progress: UpgradeProgress,
    /// Successor chosen for this definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_new_ms_id: Option<DefinitionId>,
    /// Definition this one replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_prev_ms_id: Option<DefinitionId>,
    #[serde(default)]
    pub archived: bool,
}

fn default_active_upgrade() -> bool {
    true
}

impl MicroserviceDefinition {
    /// Convert a registry record into a fresh local record.
    ///
    /// Upgrade progress and links start empty, node-local settings take
    /// their defaults, and the metadata hash is computed over the record's
    /// serialized form.
    ///
    /// # Errors
    /// Returns error if the registry record cannot be serialized
    pub fn from_exchange(ems: &ExchangeMicroservice, org: &str) -> Result<Self, HashError> {
        let metadata_hash = MetadataHash::of_json(ems)?;

        Ok(Self {
            id: DefinitionId::new(),
            owner: ems.owner.clone(),
            label: ems.label.clone(),
            description: ems.description.clone(),
            spec_ref: ems.spec_ref.clone(),
            org: org.to_string(),
            version: ems.version.clone(),
            arch: ems.arch.clone(),
            sharable: Sharable::parse_lenient(&ems.sharable),
            download_url: ems.download_url.clone(),
            match_hardware: ems.match_hardware.clone(),
            user_inputs: ems.user_inputs.clone(),
            workloads: ems.workloads.clone(),
            last_updated: ems.last_updated.clone(),
            metadata_hash,
            name: String::new(),
            upgrade_version_range: DEFAULT_UPGRADE_VERSION_RANGE.to_string(),
            auto_upgrade: false,
            active_upgrade: true,
            progress: UpgradeProgress::stable(),
            upgrade_new_ms_id: None,
            upgrade_prev_ms_id: None,
            archived: false,
        })
    }

    /// Key under which upgrades of this definition are serialized
    #[must_use]
    pub fn lineage_key(&self) -> LineageKey {
        LineageKey {
            spec_ref: self.spec_ref.clone(),
            org: self.org.clone(),
            arch: self.arch.clone(),
        }
    }

    /// Last path segment of the spec ref, used for policy file names
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.spec_ref
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(&self.spec_ref)
    }
}

impl fmt::Display for MicroserviceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} version {} ({}) key {}",
            self.org, self.spec_ref, self.version, self.arch, self.id
        )
    }
}

/// (spec ref, org, arch): the identity shared by every version of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineageKey {
    pub spec_ref: String,
    pub org: String,
    pub arch: String,
}
