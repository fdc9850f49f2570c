//! Stall detection for in-flight upgrades

use crate::clock::Clock;
use msvc_model::MicroserviceDefinition;

/// Whether the upgrade of `def` has stalled at time `now`.
///
/// An upgrade stalls when it started more than `exec_timeout_secs` ago and
/// its containers have not started executing. Exactly at the timeout it is
/// still given a chance.
#[must_use]
pub fn needs_rollback_at(def: &MicroserviceDefinition, now: u64, exec_timeout_secs: u64) -> bool {
    let Some(started) = def.progress.started_at() else {
        return false;
    };
    if def.progress.execution_started_at().is_some() {
        return false;
    }
    now.saturating_sub(started) > exec_timeout_secs
}

/// [`needs_rollback_at`] using the current time of `clock`
#[inline]
#[must_use]
pub fn needs_rollback(def: &MicroserviceDefinition, clock: &dyn Clock, exec_timeout_secs: u64) -> bool {
    needs_rollback_at(def, clock.now(), exec_timeout_secs)
}
