//! Running instances of a definition

use crate::definition::DefinitionId;
use serde::{Deserialize, Serialize};

/// A running container group created from a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroserviceInstance {
    pub instance_id: String,
    pub spec_ref: String,
    pub version: String,
    pub microservice_def_id: DefinitionId,
    /// Agreements currently bound to this instance
    #[serde(default)]
    pub associated_agreements: Vec<String>,
    #[serde(default)]
    pub archived: bool,
}

impl MicroserviceInstance {
    /// New instance with no agreements
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        spec_ref: impl Into<String>,
        version: impl Into<String>,
        microservice_def_id: DefinitionId,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            spec_ref: spec_ref.into(),
            version: version.into(),
            microservice_def_id,
            associated_agreements: Vec::new(),
            archived: false,
        }
    }

    /// Bind an agreement
    #[must_use]
    pub fn with_agreement(mut self, agreement_id: impl Into<String>) -> Self {
        self.associated_agreements.push(agreement_id.into());
        self
    }

    /// Bound by at least one live agreement
    #[inline]
    #[must_use]
    pub fn has_agreements(&self) -> bool {
        !self.associated_agreements.is_empty()
    }
}
