//! Rollback target lookup

use crate::error::UpgradeError;
use crate::store::{DefinitionFilter, RecordStore};
use msvc_model::MicroserviceDefinition;
use tracing::{debug, warn};

/// Find the archived definition that `def` replaced.
///
/// The predecessor link on `def` is followed first and accepted only if the
/// record it names is archived and points back at `def`. Otherwise archived
/// definitions of the same spec ref are scanned for one whose successor is
/// `def`. Nothing is modified.
///
/// # Errors
/// Returns [`UpgradeError::Store`] if the store cannot be read
pub fn find_rollback_target<S>(
    def: &MicroserviceDefinition,
    store: &S,
) -> Result<Option<MicroserviceDefinition>, UpgradeError>
where
    S: RecordStore + ?Sized,
{
    if let Some(prev_id) = def.upgrade_prev_ms_id {
        let prev = store
            .get_definition(prev_id)
            .map_err(|source| UpgradeError::store(format!("reading predecessor {prev_id}"), source))?;
        match prev {
            Some(prev) if prev.archived && prev.upgrade_new_ms_id == Some(def.id) => {
                debug!(definition = %def, target = %prev, "rollback target from predecessor link");
                return Ok(Some(prev));
            }
            Some(prev) => {
                warn!(definition = %def, target = %prev, "predecessor link not confirmed, scanning");
            }
            None => {
                warn!(definition = %def, missing = %prev_id, "predecessor record missing, scanning");
            }
        }
    }

    let archived = store
        .find_definitions(&[
            DefinitionFilter::SpecRef(def.spec_ref.clone()),
            DefinitionFilter::Archived,
        ])
        .map_err(|source| {
            UpgradeError::store(format!("reading archived definitions of {}", def.spec_ref), source)
        })?;

    let target = archived
        .into_iter()
        .find(|d| d.upgrade_new_ms_id == Some(def.id));
    match &target {
        Some(t) => debug!(definition = %def, target = %t, "rollback target from archive scan"),
        None => debug!(definition = %def, "no rollback target"),
    }
    Ok(target)
}
