//! Exchange registration changes

use crate::error::UpgradeError;
use crate::registry::RegistryClient;
use msvc_model::NodePut;
use tracing::{debug, info};

/// Remove `spec_ref` from the services the node advertises on the exchange.
///
/// Reads the node record and writes it back without the given service. A
/// node with no registered services is left alone. Transient failures are
/// retried by whatever wrapper `registry` carries.
///
/// # Errors
/// Returns [`UpgradeError::Node`] if the node cannot be read or updated
pub async fn unregister_from_exchange<R>(
    registry: &R,
    node_id: &str,
    node_token: &str,
    spec_ref: &str,
) -> Result<(), UpgradeError>
where
    R: RegistryClient + ?Sized,
{
    debug!(node_id, spec_ref, "unregistering service from exchange");

    let node = registry
        .get_node(node_id)
        .await
        .map_err(|source| UpgradeError::Node {
            node_id: node_id.to_string(),
            source,
        })?;

    if node.registered_microservices.is_empty() {
        debug!(node_id, "node has no registered services");
        return Ok(());
    }

    let mut body = NodePut::new(node_token, node.name);
    body.registered_microservices = node
        .registered_microservices
        .into_iter()
        .filter(|ms| ms.url != spec_ref)
        .collect();

    debug!(node_id, update = %body.short_string(), "updating node");
    registry
        .put_node(node_id, &body)
        .await
        .map_err(|source| UpgradeError::Node {
            node_id: node_id.to_string(),
            source,
        })?;

    info!(node_id, spec_ref, "unregistered service from exchange");
    Ok(())
}
