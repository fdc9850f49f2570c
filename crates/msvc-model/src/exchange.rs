//! Registry-side records
//!
//! Shapes of what the exchange returns. The serialized form of
//! [`ExchangeMicroservice`] is what the metadata hash covers, so field order
//! here is part of the fingerprint.

use serde::{Deserialize, Serialize};

/// Hardware a definition needs on the node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareMatch {
    #[serde(default)]
    pub usb_device_ids: String,
    #[serde(default)]
    pub devfiles: String,
}

/// A user input declared by a definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub input_type: String,
    #[serde(default)]
    pub default_value: String,
}

/// One deployable workload of a definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDeployment {
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub deployment_signature: String,
    #[serde(default)]
    pub torrent: String,
}

/// A microservice definition as published on the exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeMicroservice {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub spec_ref: String,
    pub version: String,
    pub arch: String,
    #[serde(default)]
    pub sharable: String,
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
}

/// A service registration held by a node on the exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredMicroservice {
    pub url: String,
    #[serde(default)]
    pub num_agreements: u32,
    #[serde(default)]
    pub policy: String,
}

/// A node record as returned by the exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub registered_microservices: Vec<RegisteredMicroservice>,
}

/// Body of a node update sent to the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePut {
    pub token: String,
    pub name: String,
    pub registered_microservices: Vec<RegisteredMicroservice>,
}

impl NodePut {
    /// Build an update carrying the node's credentials and name
    #[must_use]
    pub fn new(token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            registered_microservices: Vec::new(),
        }
    }

    /// Log-safe summary without the token
    #[must_use]
    pub fn short_string(&self) -> String {
        let urls: Vec<&str> = self
            .registered_microservices
            .iter()
            .map(|m| m.url.as_str())
            .collect();
        format!("name: {}, microservices: {urls:?}", self.name)
    }
}
