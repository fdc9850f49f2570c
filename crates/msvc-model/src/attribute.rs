//! Node-local service attributes
//!
//! Attributes are settings the node owner attaches to services. An attribute
//! with no service URLs applies to every service (common); one with URLs
//! applies only to those services (specific) and wins over common ones.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Bookkeeping shared by every attribute kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// Services this attribute is scoped to; empty means all services
    #[serde(default)]
    pub service_urls: Vec<String>,
    #[serde(default)]
    pub publishable: bool,
    #[serde(default)]
    pub host_only: bool,
}

/// Typed attribute payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeKind {
    Compute {
        cpus: i64,
        ram: i64,
    },
    Architecture {
        architecture: String,
    },
    HighAvailability {
        partners: Vec<String>,
    },
    Metering {
        tokens: u64,
        per_time_unit: String,
        notification_interval_s: u64,
    },
    CounterPartyProperty {
        expression: JsonValue,
    },
    Property {
        mappings: BTreeMap<String, JsonValue>,
    },
    /// Raw protocol list; validated when a policy is compiled
    AgreementProtocol {
        protocols: JsonValue,
    },
    /// Any kind this agent does not know about
    #[serde(other)]
    Unrecognized,
}

impl AttributeKind {
    /// Short kind name for log lines
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Compute { .. } => "compute",
            Self::Architecture { .. } => "architecture",
            Self::HighAvailability { .. } => "high_availability",
            Self::Metering { .. } => "metering",
            Self::CounterPartyProperty { .. } => "counter_party_property",
            Self::Property { .. } => "property",
            Self::AgreementProtocol { .. } => "agreement_protocol",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// A single attribute record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default)]
    pub meta: AttributeMeta,
    pub kind: AttributeKind,
}

impl Attribute {
    /// Attribute applying to every service
    #[must_use]
    pub fn common(kind: AttributeKind) -> Self {
        Self {
            meta: AttributeMeta::default(),
            kind,
        }
    }

    /// Attribute scoped to the given services
    #[must_use]
    pub fn scoped<I, S>(urls: I, kind: AttributeKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            meta: AttributeMeta {
                service_urls: urls.into_iter().map(Into::into).collect(),
                ..AttributeMeta::default()
            },
            kind,
        }
    }

    /// Scoped to specific services
    #[inline]
    #[must_use]
    pub fn is_specific(&self) -> bool {
        !self.meta.service_urls.is_empty()
    }

    /// Whether this attribute applies to `spec_ref`
    #[must_use]
    pub fn applies_to(&self, spec_ref: &str) -> bool {
        !self.is_specific() || self.meta.service_urls.iter().any(|u| u == spec_ref)
    }
}
