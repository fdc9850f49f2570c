//! Record and attribute store seams
//!
//! The engine reads and writes definitions, instances and attributes through
//! these traits. Queries take a conjunction of filters: a record is returned
//! only if every filter matches.

use crate::error::StoreError;
use msvc_model::{Attribute, DefinitionId, MicroserviceDefinition, MicroserviceInstance};
use tracing::error;

/// Definition query predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionFilter {
    Unarchived,
    Archived,
    SpecRef(String),
    SpecRefVersion { spec_ref: String, version: String },
    Id(DefinitionId),
}

impl DefinitionFilter {
    /// Whether `def` satisfies this predicate
    #[must_use]
    pub fn matches(&self, def: &MicroserviceDefinition) -> bool {
        match self {
            Self::Unarchived => !def.archived,
            Self::Archived => def.archived,
            Self::SpecRef(spec_ref) => def.spec_ref == *spec_ref,
            Self::SpecRefVersion { spec_ref, version } => {
                def.spec_ref == *spec_ref && def.version == *version
            }
            Self::Id(id) => def.id == *id,
        }
    }
}

/// Instance query predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceFilter {
    /// Every instance of (spec ref, version), archived or not
    AllInstances { spec_ref: String, version: String },
    Unarchived,
}

impl InstanceFilter {
    /// Whether `inst` satisfies this predicate
    #[must_use]
    pub fn matches(&self, inst: &MicroserviceInstance) -> bool {
        match self {
            Self::AllInstances { spec_ref, version } => {
                inst.spec_ref == *spec_ref && inst.version == *version
            }
            Self::Unarchived => !inst.archived,
        }
    }
}

/// Persistent definition and instance records
pub trait RecordStore: Send + Sync {
    /// Definitions matching every filter
    fn find_definitions(
        &self,
        filters: &[DefinitionFilter],
    ) -> Result<Vec<MicroserviceDefinition>, StoreError>;

    fn get_definition(&self, id: DefinitionId) -> Result<Option<MicroserviceDefinition>, StoreError>;

    /// Insert or replace by id
    fn put_definition(&self, def: &MicroserviceDefinition) -> Result<(), StoreError>;

    /// Write several definitions as one change.
    ///
    /// Stores with transactions should override this. The default writes in
    /// order and, if a write fails, puts the earlier records back to what
    /// they were; a record that did not exist before cannot be taken back,
    /// so callers put newly created records last.
    ///
    /// # Errors
    /// Returns the first write error; restore failures are logged
    fn put_definitions(&self, defs: &[MicroserviceDefinition]) -> Result<(), StoreError> {
        let previous = defs
            .iter()
            .map(|d| self.get_definition(d.id))
            .collect::<Result<Vec<_>, _>>()?;

        for (written, def) in defs.iter().enumerate() {
            if let Err(err) = self.put_definition(def) {
                for prev in previous[..written].iter().flatten() {
                    if let Err(restore) = self.put_definition(prev) {
                        error!(definition = %prev, error = %restore, "failed to restore definition");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Instances matching every filter
    fn find_instances(
        &self,
        filters: &[InstanceFilter],
    ) -> Result<Vec<MicroserviceInstance>, StoreError>;

    /// Insert or replace by instance id
    fn put_instance(&self, inst: &MicroserviceInstance) -> Result<(), StoreError>;
}

/// Node-local attributes
pub trait AttributeStore: Send + Sync {
    /// Attributes that apply to `spec_ref`: common ones plus those scoped to it
    fn find_applicable(&self, spec_ref: &str) -> Result<Vec<Attribute>, StoreError>;
}

/// Record store that fails one chosen single-record write and keeps the
/// default batch behaviour
#[cfg(test)]
pub(crate) struct FailingPut {
    pub(crate) inner: crate::memory::InMemoryStore,
    countdown: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl FailingPut {
    /// Fail the `nth` `put_definition` call from now (1-based)
    pub(crate) fn new(inner: crate::memory::InMemoryStore, nth: u32) -> Self {
        Self {
            inner,
            countdown: std::sync::atomic::AtomicU32::new(nth),
        }
    }
}

#[cfg(test)]
impl RecordStore for FailingPut {
    fn find_definitions(
        &self,
        filters: &[DefinitionFilter],
    ) -> Result<Vec<MicroserviceDefinition>, StoreError> {
        self.inner.find_definitions(filters)
    }

    fn get_definition(&self, id: DefinitionId) -> Result<Option<MicroserviceDefinition>, StoreError> {
        self.inner.get_definition(id)
    }

    fn put_definition(&self, def: &MicroserviceDefinition) -> Result<(), StoreError> {
        use std::sync::atomic::Ordering;
        let before = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if before == 1 {
            return Err(StoreError::Unavailable("write rejected".into()));
        }
        self.inner.put_definition(def)
    }

    fn find_instances(
        &self,
        filters: &[InstanceFilter],
    ) -> Result<Vec<MicroserviceInstance>, StoreError> {
        self.inner.find_instances(filters)
    }

    fn put_instance(&self, inst: &MicroserviceInstance) -> Result<(), StoreError> {
        self.inner.put_instance(inst)
    }
}
