//! Policy documents
//!
//! A policy document describes the terms under which a node offers a
//! service: properties, high-availability partners, metering, counterparty
//! requirements, agreement protocols and how many agreements it takes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Policy format version written into every header
pub const POLICY_FORMAT_VERSION: &str = "2.0";

/// Agreement protocol names the agent can negotiate with
pub const KNOWN_PROTOCOLS: [&str; 2] = ["Basic", "Citizen Scientist"];

/// Metering terms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meter {
    pub tokens: u64,
    pub per_time_unit: String,
    pub notification_interval_s: u64,
}

impl Meter {
    /// No metering requested
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens == 0 && self.per_time_unit.is_empty() && self.notification_interval_s == 0
    }
}

/// Blockchain an agreement protocol may record on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blockchain {
    #[serde(rename = "type", default)]
    pub chain_type: String,
    #[serde(default)]
    pub name: String,
}

/// One acceptable agreement protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementProtocol {
    pub name: String,
    pub protocol_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockchains: Vec<Blockchain>,
}

impl AgreementProtocol {
    /// Protocol with default version and no blockchains
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol_version: 1,
            blockchains: Vec::new(),
        }
    }
}

/// Validate a raw agreement protocol list from an attribute.
///
/// `null` yields an empty list. Otherwise the value must be an array of
/// objects, each with a known `name`, an optional positive integer
/// `protocolVersion` (default 1) and an optional `blockchains` array.
///
/// # Errors
/// Returns [`ProtocolError`] describing the first malformed entry
pub fn parse_agreement_protocols(raw: &JsonValue) -> Result<Vec<AgreementProtocol>, ProtocolError> {
    let entries = match raw {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::Array(entries) => entries,
        other => return Err(ProtocolError::NotAList(other.to_string())),
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let obj = entry
                .as_object()
                .ok_or(ProtocolError::NotAnObject { index })?;

            let name = obj
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or(ProtocolError::MissingName { index })?;
            if !KNOWN_PROTOCOLS.contains(&name) {
                return Err(ProtocolError::UnknownProtocol(name.to_string()));
            }

            let protocol_version = match obj.get("protocolVersion") {
                None | Some(JsonValue::Null) => 1,
                Some(v) => v
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .ok_or(ProtocolError::InvalidVersion { index })?,
            };

            let blockchains = match obj.get("blockchains") {
                None | Some(JsonValue::Null) => Vec::new(),
                Some(v) => serde_json::from_value(v.clone())
                    .map_err(|e| ProtocolError::InvalidBlockchains { index, source: e })?,
            };

            Ok(AgreementProtocol {
                name: name.to_string(),
                protocol_version,
                blockchains,
            })
        })
        .collect()
}

/// Malformed agreement protocol data
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("agreement protocols must be a list, got {0}")]
    NotAList(String),

    #[error("agreement protocol entry {index} is not an object")]
    NotAnObject { index: usize },

    #[error("agreement protocol entry {index} has no name")]
    MissingName { index: usize },

    #[error("unsupported agreement protocol: {0}")]
    UnknownProtocol(String),

    #[error("agreement protocol entry {index} has an invalid protocolVersion")]
    InvalidVersion { index: usize },

    #[error("agreement protocol entry {index} has invalid blockchains: {source}")]
    InvalidBlockchains {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Policy header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyHeader {
    pub name: String,
    pub version: String,
}

/// The service a policy covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    pub spec_ref: String,
    pub org: String,
    pub version: String,
    pub exclusive: bool,
    pub arch: String,
}

/// High-availability group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaGroup {
    pub partners: Vec<String>,
}

/// A compiled, publishable policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    pub header: PolicyHeader,
    pub api_specs: Vec<ApiSpec>,
    pub node_org: String,
    pub properties: BTreeMap<String, JsonValue>,
    pub ha_group: HaGroup,
    pub meter_policy: Meter,
    pub counter_party_properties: JsonValue,
    pub agreement_protocols: Vec<AgreementProtocol>,
    pub max_agreements: u32,
}

impl PolicyDocument {
    /// The single service this policy covers
    #[must_use]
    pub fn api_spec(&self) -> Option<&ApiSpec> {
        self.api_specs.first()
    }

    /// Pretty JSON, as written to disk by the sink
    ///
    /// # Errors
    /// Returns error if a property value cannot be serialized
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
