//! Testing utilities for MSVC workspace
//!
//! Shared fixtures and a fully wired in-memory node.

#![allow(missing_docs)]

use msvc_model::{DefinitionId, ExchangeMicroservice, MicroserviceDefinition, UpgradeEvent};
use msvc_upgrade::{
    ChannelPolicySink, EngineConfig, InMemoryRegistry, InMemoryStore, ManualClock, PolicyEvent,
    RecordStore, UpgradeEngine,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub const GPS_SPEC_REF: &str = "https://acme.com/svc/gps";
pub const TEST_ORG: &str = "acme";
pub const TEST_ARCH: &str = "amd64";
pub const START_TIME: u64 = 1_000;

pub fn exchange_record(version: &str) -> ExchangeMicroservice {
    exchange_record_for(GPS_SPEC_REF, version)
}

pub fn exchange_record_for(spec_ref: &str, version: &str) -> ExchangeMicroservice {
    ExchangeMicroservice {
        owner: "acme/dev".into(),
        label: "gps".into(),
        description: "location service".into(),
        spec_ref: spec_ref.into(),
        version: version.into(),
        arch: TEST_ARCH.into(),
        sharable: "single".into(),
        ..Default::default()
    }
}

/// Definition with auto upgrade on and an open-ended range from 1.0.0
pub fn installed_definition(version: &str) -> MicroserviceDefinition {
    let mut def = MicroserviceDefinition::from_exchange(&exchange_record(version), TEST_ORG).unwrap();
    def.auto_upgrade = true;
    def.upgrade_version_range = "[1.0.0,INFINITY)".into();
    def
}

/// Definition whose upgrade started at `started_at`
pub fn started_definition(version: &str, started_at: u64) -> MicroserviceDefinition {
    let mut def = installed_definition(version);
    def.progress.apply(UpgradeEvent::Start, started_at).unwrap();
    def
}

/// Engine wired to in-memory collaborators and a manual clock
pub struct TestNode {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<InMemoryRegistry>,
    pub clock: Arc<ManualClock>,
    pub events: UnboundedReceiver<PolicyEvent>,
    pub engine: UpgradeEngine,
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let clock = Arc::new(ManualClock::new(START_TIME));
        let (sink, events) = ChannelPolicySink::channel();
        let engine = UpgradeEngine::new(
            store.clone(),
            store.clone(),
            registry.clone(),
            Arc::new(sink),
            config,
        )
        .with_clock(clock.clone())
        .with_node_org(TEST_ORG);
        Self {
            store,
            registry,
            clock,
            events,
            engine,
        }
    }

    /// Store an installed definition and publish its version on the registry
    pub fn install(&self, version: &str) -> MicroserviceDefinition {
        let def = installed_definition(version);
        self.store.put_definition(&def).unwrap();
        self.registry.publish(TEST_ORG, exchange_record(version));
        def
    }

    pub fn publish(&self, version: &str) {
        self.registry.publish(TEST_ORG, exchange_record(version));
    }

    pub fn definition(&self, id: DefinitionId) -> MicroserviceDefinition {
        self.store.get_definition(id).unwrap().unwrap()
    }

    pub fn drain_events(&mut self) -> Vec<PolicyEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}
