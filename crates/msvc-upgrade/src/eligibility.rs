//! Upgrade eligibility
//!
//! Decides whether a definition may begin upgrading now. Rules are checked in
//! order and the first failing rule answers:
//!
//! 1. archived definitions never upgrade
//! 2. auto upgrade must be switched on
//! 3. no upgrade may already be in flight
//! 4. without active upgrade, no instance of this definition may hold an
//!    agreement (store errors count as "holds one")

use crate::store::{InstanceFilter, RecordStore};
use msvc_model::MicroserviceDefinition;
use tracing::{debug, error};

/// Whether `def` may start an upgrade. Has no side effects.
pub fn can_upgrade<S>(def: &MicroserviceDefinition, store: &S) -> bool
where
    S: RecordStore + ?Sized,
{
    if def.archived {
        debug!(definition = %def, "not eligible for upgrade: archived");
        return false;
    }
    if !def.auto_upgrade {
        debug!(definition = %def, "not eligible for upgrade: auto upgrade off");
        return false;
    }
    if def.progress.phase().is_in_flight() {
        debug!(definition = %def, phase = %def.progress.phase(), "not eligible for upgrade: upgrade in progress");
        return false;
    }
    if !def.active_upgrade {
        let filters = [
            InstanceFilter::AllInstances {
                spec_ref: def.spec_ref.clone(),
                version: def.version.clone(),
            },
            InstanceFilter::Unarchived,
        ];
        match store.find_instances(&filters) {
            Err(e) => {
                error!(definition = %def, error = %e, "cannot read instances, treating as busy");
                return false;
            }
            Ok(instances) => {
                let busy = instances
                    .iter()
                    .any(|i| i.microservice_def_id == def.id && i.has_agreements());
                if busy {
                    debug!(definition = %def, "not eligible for upgrade: instance has agreements");
                    return false;
                }
            }
        }
    }
    true
}
