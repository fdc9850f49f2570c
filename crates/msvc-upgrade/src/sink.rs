//! Policy sink seam
//!
//! Compiled policies are handed to a [`PolicySink`] without waiting for them
//! to be persisted. The channel-backed sink forwards [`PolicyEvent`]s to
//! whoever writes policy files and registers services.

use crate::error::SinkError;
use msvc_model::{DefinitionId, MicroserviceDefinition, PolicyDocument};
use tokio::sync::mpsc;
use tracing::debug;

/// Request to retire the policy of one definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRemoval {
    pub spec_ref: String,
    pub org: String,
    pub version: String,
    /// Suffix the consumer archives the policy file under
    pub definition_id: DefinitionId,
}

impl PolicyRemoval {
    #[must_use]
    pub fn for_definition(def: &MicroserviceDefinition) -> Self {
        Self {
            spec_ref: def.spec_ref.clone(),
            org: def.org.clone(),
            version: def.version.clone(),
            definition_id: def.id,
        }
    }
}

/// Message carried by [`ChannelPolicySink`]
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    Publish(Box<PolicyDocument>),
    Remove(PolicyRemoval),
}

/// Destination for compiled policies
pub trait PolicySink: Send + Sync {
    /// Hand off a policy; returns once queued, not once persisted
    fn publish(&self, policy: PolicyDocument) -> Result<(), SinkError>;

    /// Ask for a definition's policy to be removed and archived
    fn remove(&self, removal: PolicyRemoval) -> Result<(), SinkError>;
}

/// Sink backed by an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelPolicySink {
    tx: mpsc::UnboundedSender<PolicyEvent>,
}

impl ChannelPolicySink {
    /// Create a sink and the receiving end of its channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PolicyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PolicySink for ChannelPolicySink {
    fn publish(&self, policy: PolicyDocument) -> Result<(), SinkError> {
        debug!(policy = %policy.header.name, "queueing policy");
        self.tx
            .send(PolicyEvent::Publish(Box::new(policy)))
            .map_err(|_| SinkError::Closed)
    }

    fn remove(&self, removal: PolicyRemoval) -> Result<(), SinkError> {
        debug!(
            spec_ref = %removal.spec_ref,
            version = %removal.version,
            key = %removal.definition_id,
            "queueing policy removal"
        );
        self.tx
            .send(PolicyEvent::Remove(removal))
            .map_err(|_| SinkError::Closed)
    }
}

/// Remove the policy published for `def`
///
/// # Errors
/// Returns [`SinkError`] if the sink is gone
pub fn remove_policy(sink: &dyn PolicySink, def: &MicroserviceDefinition) -> Result<(), SinkError> {
    debug!(org = %def.org, spec_ref = %def.spec_ref, version = %def.version, key = %def.id, "removing policy");
    sink.remove(PolicyRemoval::for_definition(def))
}
