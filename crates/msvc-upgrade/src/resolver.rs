//! Upgrade candidate resolution
//!
//! Asks the registry for the newest definition inside a definition's upgrade
//! range and decides whether it is materially different from what is
//! installed. Resolution is read-only: calling it twice against an unchanged
//! registry gives the same answer.

use crate::error::UpgradeError;
use crate::registry::RegistryClient;
use crate::store::RecordStore;
use msvc_model::{MicroserviceDefinition, VersionPrecedence, VersionRange};
use std::cmp::Ordering;
use tracing::{debug, info};

/// Find the definition `def` should upgrade to, if any.
///
/// Returns `None` when the registry's best match is older than `def`, is the
/// same version with the same content, or is the exact definition a previous
/// upgrade of `def` already tried and rolled back from.
///
/// # Errors
/// - [`UpgradeError::InvalidRange`] if the upgrade range does not parse
/// - [`UpgradeError::Registry`] if the registry lookup fails
/// - [`UpgradeError::Conversion`] if the registry record cannot be hashed
/// - [`UpgradeError::Store`] if the previous successor cannot be read
pub async fn resolve_upgrade_candidate<R, S>(
    def: &MicroserviceDefinition,
    registry: &R,
    store: &S,
    precedence: VersionPrecedence,
) -> Result<Option<MicroserviceDefinition>, UpgradeError>
where
    R: RegistryClient + ?Sized,
    S: RecordStore + ?Sized,
{
    debug!(definition = %def, range = %def.upgrade_version_range, "resolving upgrade candidate");

    let range: VersionRange =
        def.upgrade_version_range
            .parse()
            .map_err(|source| UpgradeError::InvalidRange {
                spec_ref: def.spec_ref.clone(),
                range: def.upgrade_version_range.clone(),
                source,
            })?;

    let ems = registry
        .highest_matching_version(&def.spec_ref, &def.org, &range, &def.arch)
        .await
        .map_err(|source| UpgradeError::Registry {
            spec_ref: def.spec_ref.clone(),
            org: def.org.clone(),
            range: range.expression(),
            source,
        })?;

    let mut candidate = MicroserviceDefinition::from_exchange(&ems, &def.org).map_err(|source| {
        UpgradeError::Conversion {
            spec_ref: def.spec_ref.clone(),
            source,
        }
    })?;

    match precedence.compare(&candidate.version, &def.version) {
        Ordering::Less => {
            debug!(definition = %def, candidate = %candidate.version, "registry only has older versions");
            return Ok(None);
        }
        Ordering::Equal if candidate.metadata_hash == def.metadata_hash => {
            debug!(definition = %def, "no change on the registry");
            return Ok(None);
        }
        Ordering::Equal | Ordering::Greater => {}
    }

    if let Some(tried) = def.upgrade_new_ms_id {
        let previous = store
            .get_definition(tried)
            .map_err(|source| UpgradeError::store(format!("reading previous successor {tried}"), source))?;
        if let Some(previous) = previous {
            if previous.archived
                && previous.version == candidate.version
                && previous.metadata_hash == candidate.metadata_hash
            {
                debug!(
                    definition = %def,
                    candidate = %candidate.version,
                    "candidate already failed an upgrade, not retrying"
                );
                return Ok(None);
            }
        }
    }

    candidate.name.clone_from(&def.name);
    candidate
        .upgrade_version_range
        .clone_from(&def.upgrade_version_range);
    candidate.auto_upgrade = def.auto_upgrade;
    candidate.active_upgrade = def.active_upgrade;

    info!(
        definition = %def,
        candidate = %candidate.version,
        hash = %candidate.metadata_hash.short(),
        "found upgrade candidate"
    );
    Ok(Some(candidate))
}
