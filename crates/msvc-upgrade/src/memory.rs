//! In-memory collaborators
//!
//! Store and registry implementations held entirely in memory. The agent's
//! `plan` command runs against them, and tests use their failure switches
//! to exercise error paths.

use crate::error::{RegistryError, StoreError};
use crate::registry::RegistryClient;
use crate::store::{AttributeStore, DefinitionFilter, InstanceFilter, RecordStore};
use async_trait::async_trait;
use dashmap::DashMap;
use msvc_model::{
    Attribute, DefinitionId, ExchangeMicroservice, ExchangeNode, MicroserviceDefinition,
    MicroserviceInstance, NodePut, Version, VersionRange,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Serialized node state: what the record and attribute stores hold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSnapshot {
    pub definitions: Vec<MicroserviceDefinition>,
    pub instances: Vec<MicroserviceInstance>,
    pub attributes: Vec<Attribute>,
}

/// Record and attribute store backed by maps
#[derive(Debug, Default)]
pub struct InMemoryStore {
    definitions: RwLock<BTreeMap<DefinitionId, MicroserviceDefinition>>,
    instances: RwLock<BTreeMap<String, MicroserviceInstance>>,
    attributes: RwLock<Vec<Attribute>>,
    unavailable: AtomicBool,
    failing_writes: AtomicU32,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate from a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: NodeSnapshot) -> Self {
        let store = Self::new();
        {
            let mut defs = store.definitions.write();
            for def in snapshot.definitions {
                defs.insert(def.id, def);
            }
            let mut insts = store.instances.write();
            for inst in snapshot.instances {
                insts.insert(inst.instance_id.clone(), inst);
            }
        }
        *store.attributes.write() = snapshot.attributes;
        store
    }

    /// Current contents
    #[must_use]
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            definitions: self.definitions.read().values().cloned().collect(),
            instances: self.instances.read().values().cloned().collect(),
            attributes: self.attributes.read().clone(),
        }
    }

    pub fn add_attribute(&self, attr: Attribute) {
        self.attributes.write().push(attr);
    }

    /// Make every subsequent call fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` definition writes (single or batched)
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn take_write_failure(&self) -> Result<(), StoreError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(StoreError::Unavailable("injected write failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for InMemoryStore {
    fn find_definitions(
        &self,
        filters: &[DefinitionFilter],
    ) -> Result<Vec<MicroserviceDefinition>, StoreError> {
        self.check_available()?;
        Ok(self
            .definitions
            .read()
            .values()
            .filter(|d| filters.iter().all(|f| f.matches(d)))
            .cloned()
            .collect())
    }

    fn get_definition(&self, id: DefinitionId) -> Result<Option<MicroserviceDefinition>, StoreError> {
        self.check_available()?;
        Ok(self.definitions.read().get(&id).cloned())
    }

    fn put_definition(&self, def: &MicroserviceDefinition) -> Result<(), StoreError> {
        self.check_available()?;
        self.take_write_failure()?;
        self.definitions.write().insert(def.id, def.clone());
        Ok(())
    }

    /// Applied under one write lock: either every record lands or none does
    fn put_definitions(&self, defs: &[MicroserviceDefinition]) -> Result<(), StoreError> {
        self.check_available()?;
        self.take_write_failure()?;
        let mut map = self.definitions.write();
        for def in defs {
            map.insert(def.id, def.clone());
        }
        Ok(())
    }

    fn find_instances(
        &self,
        filters: &[InstanceFilter],
    ) -> Result<Vec<MicroserviceInstance>, StoreError> {
        self.check_available()?;
        Ok(self
            .instances
            .read()
            .values()
            .filter(|i| filters.iter().all(|f| f.matches(i)))
            .cloned()
            .collect())
    }

    fn put_instance(&self, inst: &MicroserviceInstance) -> Result<(), StoreError> {
        self.check_available()?;
        self.instances
            .write()
            .insert(inst.instance_id.clone(), inst.clone());
        Ok(())
    }
}

impl AttributeStore for InMemoryStore {
    fn find_applicable(&self, spec_ref: &str) -> Result<Vec<Attribute>, StoreError> {
        self.check_available()?;
        Ok(self
            .attributes
            .read()
            .iter()
            .filter(|a| a.applies_to(spec_ref))
            .cloned()
            .collect())
    }
}

/// One published service version and the org that owns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub org: String,
    pub microservice: ExchangeMicroservice,
}

/// Exchange stand-in serving a fixed catalog
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    catalog: RwLock<Vec<CatalogEntry>>,
    nodes: DashMap<String, ExchangeNode>,
    puts: Mutex<Vec<(String, NodePut)>>,
    transient_failures: AtomicU32,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_catalog(entries: Vec<CatalogEntry>) -> Self {
        Self {
            catalog: RwLock::new(entries),
            ..Self::default()
        }
    }

    /// Publish a service version
    pub fn publish(&self, org: impl Into<String>, microservice: ExchangeMicroservice) {
        self.catalog.write().push(CatalogEntry {
            org: org.into(),
            microservice,
        });
    }

    pub fn insert_node(&self, node_id: impl Into<String>, node: ExchangeNode) {
        self.nodes.insert(node_id.into(), node);
    }

    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<ExchangeNode> {
        self.nodes.get(node_id).map(|n| n.value().clone())
    }

    /// Node updates received so far
    #[must_use]
    pub fn puts(&self) -> Vec<(String, NodePut)> {
        self.puts.lock().clone()
    }

    /// Fail the next `count` calls with a transport error
    pub fn fail_next(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<(), RegistryError> {
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(RegistryError::Transport("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn highest_matching_version(
        &self,
        spec_ref: &str,
        org: &str,
        range: &VersionRange,
        arch: &str,
    ) -> Result<ExchangeMicroservice, RegistryError> {
        self.take_failure()?;
        self.catalog
            .read()
            .iter()
            .filter(|e| {
                e.org == org && e.microservice.spec_ref == spec_ref && e.microservice.arch == arch
            })
            .filter_map(|e| {
                let version: Version = e.microservice.version.parse().ok()?;
                range.contains(&version).then_some((version, &e.microservice))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, ems)| ems.clone())
            .ok_or_else(|| RegistryError::NotFound {
                spec_ref: spec_ref.to_string(),
                range: range.expression(),
            })
    }

    async fn get_node(&self, node_id: &str) -> Result<ExchangeNode, RegistryError> {
        self.take_failure()?;
        self.node(node_id).ok_or_else(|| RegistryError::Status {
            status: 404,
            message: format!("node {node_id} not found"),
        })
    }

    async fn put_node(&self, node_id: &str, body: &NodePut) -> Result<(), RegistryError> {
        self.take_failure()?;
        self.nodes.insert(
            node_id.to_string(),
            ExchangeNode {
                name: body.name.clone(),
                registered_microservices: body.registered_microservices.clone(),
            },
        );
        self.puts.lock().push((node_id.to_string(), body.clone()));
        Ok(())
    }
}
