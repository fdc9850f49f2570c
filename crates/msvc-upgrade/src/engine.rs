//! Reconciliation driver
//!
//! [`UpgradeEngine`] ties the pieces together. Each cycle walks the active
//! definitions and, for each one:
//!
//! - rolls back a failed or stalled upgrade to its predecessor
//! - otherwise checks eligibility and asks the registry for a candidate
//! - starts an upgrade when a genuinely new definition is found
//!
//! Work on one (spec ref, org, arch) lineage is serialized by a keyed async
//! mutex. The lock is dropped around the registry call, so the record is
//! re-read afterwards and the upgrade only starts if it has not changed.

use crate::clock::{Clock, SystemClock};
use crate::compiler::prepare_policy;
use crate::config::EngineConfig;
use crate::eligibility::can_upgrade;
use crate::error::UpgradeError;
use crate::phase::needs_rollback_at;
use crate::registry::RegistryClient;
use crate::resolver::resolve_upgrade_candidate;
use crate::rollback::find_rollback_target;
use crate::sink::{remove_policy, PolicySink};
use crate::store::{AttributeStore, DefinitionFilter, RecordStore};
use dashmap::DashMap;
use futures::future::join_all;
use msvc_model::{
    DefinitionId, FailureReason, LineageKey, MicroserviceDefinition, PolicyDocument, UpgradeEvent,
    UpgradePhase, UpgradeProgress,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of reconciling one definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Failed or stalled upgrade reverted to its predecessor
    RolledBack {
        from: DefinitionId,
        to: DefinitionId,
    },
    /// Failed or stalled upgrade with nothing to revert to
    RollbackUnavailable { definition: DefinitionId },
    /// New definition created and marked started
    UpgradeStarted {
        from: DefinitionId,
        to: DefinitionId,
        version: String,
    },
    /// Registry has nothing newer
    UpToDate { definition: DefinitionId },
    /// Definition may not upgrade now
    Ineligible { definition: DefinitionId },
    /// Record changed or was archived while being looked at
    Superseded { definition: DefinitionId },
}

/// A definition whose reconciliation failed
#[derive(Debug)]
pub struct CycleFailure {
    pub definition: DefinitionId,
    pub error: UpgradeError,
}

/// Everything one cycle did
#[derive(Debug, Default)]
pub struct CycleReport {
    pub decisions: Vec<Decision>,
    pub failures: Vec<CycleFailure>,
}

impl CycleReport {
    /// Number of upgrades started this cycle
    #[must_use]
    pub fn upgrades_started(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d, Decision::UpgradeStarted { .. }))
            .count()
    }

    /// Number of rollbacks performed this cycle
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| matches!(d, Decision::RolledBack { .. }))
            .count()
    }
}

/// Upgrade and rollback driver for one node
pub struct UpgradeEngine {
    records: Arc<dyn RecordStore>,
    attributes: Arc<dyn AttributeStore>,
    registry: Arc<dyn RegistryClient>,
    sink: Arc<dyn PolicySink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    node_org: String,
    locks: DashMap<LineageKey, Arc<Mutex<()>>>,
}

impl UpgradeEngine {
    /// Create an engine using the system clock
    pub fn new(
        records: Arc<dyn RecordStore>,
        attributes: Arc<dyn AttributeStore>,
        registry: Arc<dyn RegistryClient>,
        sink: Arc<dyn PolicySink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            records,
            attributes,
            registry,
            sink,
            clock: Arc::new(SystemClock),
            config,
            node_org: String::new(),
            locks: DashMap::new(),
        }
    }

    /// With a custom clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// With the org of the node, written into every policy
    #[must_use]
    pub fn with_node_org(mut self, org: impl Into<String>) -> Self {
        self.node_org = org.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_for(&self, key: LineageKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(key).or_default().value())
    }

    /// Drop locks for lineages with no active definition that nobody holds
    fn prune_locks(&self, active: &[MicroserviceDefinition]) {
        let live: HashSet<LineageKey> = active.iter().map(MicroserviceDefinition::lineage_key).collect();
        self.locks
            .retain(|key, lock| live.contains(key) || Arc::strong_count(lock) > 1);
    }

    fn load(&self, id: DefinitionId) -> Result<MicroserviceDefinition, UpgradeError> {
        self.records
            .get_definition(id)
            .map_err(|source| UpgradeError::store(format!("reading definition {id}"), source))?
            .ok_or(UpgradeError::NotFound(id))
    }

    fn save(&self, def: &MicroserviceDefinition) -> Result<(), UpgradeError> {
        self.records
            .put_definition(def)
            .map_err(|source| UpgradeError::store(format!("saving definition {}", def.id), source))
    }

    /// Write records that change together; the record being activated goes last
    fn save_all(&self, defs: &[MicroserviceDefinition]) -> Result<(), UpgradeError> {
        self.records.put_definitions(defs).map_err(|source| {
            let ids: Vec<String> = defs.iter().map(|d| d.id.to_string()).collect();
            UpgradeError::store(format!("saving definitions {}", ids.join(", ")), source)
        })
    }

    /// Record a newly installed definition and publish its policy
    ///
    /// # Errors
    /// Returns error if the policy cannot be compiled or the record saved;
    /// nothing is written in that case
    pub async fn install(
        &self,
        def: &MicroserviceDefinition,
    ) -> Result<PolicyDocument, UpgradeError> {
        let lock = self.lock_for(def.lineage_key());
        let _guard = lock.lock().await;

        let doc = prepare_policy(def, self.attributes.as_ref(), &self.node_org)?;
        self.save(def)?;
        self.sink.publish(doc.clone())?;
        info!(definition = %def, "installed definition");
        Ok(doc)
    }

    /// Run one reconciliation pass over every active definition
    ///
    /// # Errors
    /// Returns error only if the active definitions cannot be listed;
    /// per-definition failures are collected in the report
    pub async fn run_cycle(&self) -> Result<CycleReport, UpgradeError> {
        let active = self
            .records
            .find_definitions(&[DefinitionFilter::Unarchived])
            .map_err(|source| UpgradeError::store("listing active definitions", source))?;
        debug!(count = active.len(), "starting reconciliation cycle");

        let outcomes = join_all(active.iter().map(|def| self.reconcile(def.id))).await;

        let mut report = CycleReport::default();
        for (def, outcome) in active.iter().zip(outcomes) {
            match outcome {
                Ok(decision) => report.decisions.push(decision),
                Err(error) => {
                    warn!(
                        definition = %def,
                        error = %error,
                        retryable = error.is_retryable(),
                        "reconciliation failed"
                    );
                    report.failures.push(CycleFailure {
                        definition: def.id,
                        error,
                    });
                }
            }
        }
        self.prune_locks(&active);
        info!(
            decisions = report.decisions.len(),
            failures = report.failures.len(),
            upgrades = report.upgrades_started(),
            rollbacks = report.rollbacks(),
            "reconciliation cycle done"
        );
        Ok(report)
    }

    /// Reconcile one definition
    ///
    /// # Errors
    /// Returns error if a collaborator fails; the record is left as it was
    /// before the failing step
    pub async fn reconcile(&self, id: DefinitionId) -> Result<Decision, UpgradeError> {
        let snapshot = {
            let def = self.load(id)?;
            let lock = self.lock_for(def.lineage_key());
            let _guard = lock.lock().await;

            let def = self.load(id)?;
            if def.archived {
                return Ok(Decision::Superseded { definition: id });
            }

            let now = self.clock.now();
            if def.progress.phase() == UpgradePhase::Failed
                || needs_rollback_at(&def, now, self.config.exec_timeout_secs)
            {
                return self.roll_back(def, now);
            }

            if !can_upgrade(&def, self.records.as_ref()) {
                return Ok(Decision::Ineligible { definition: id });
            }
            def
        };

        let candidate = resolve_upgrade_candidate(
            &snapshot,
            self.registry.as_ref(),
            self.records.as_ref(),
            self.config.version_precedence,
        )
        .await?;

        let Some(candidate) = candidate else {
            return Ok(Decision::UpToDate { definition: id });
        };

        let lock = self.lock_for(snapshot.lineage_key());
        let _guard = lock.lock().await;

        let current = self.load(id)?;
        if current != snapshot {
            debug!(definition = %current, "definition changed during resolution, skipping");
            return Ok(Decision::Superseded { definition: id });
        }
        self.start_upgrade(current, candidate)
    }

    fn start_upgrade(
        &self,
        mut old: MicroserviceDefinition,
        mut new: MicroserviceDefinition,
    ) -> Result<Decision, UpgradeError> {
        new.progress
            .apply(UpgradeEvent::Start, self.clock.now())
            .map_err(|source| UpgradeError::Transition {
                definition: new.to_string(),
                source,
            })?;
        new.upgrade_prev_ms_id = Some(old.id);
        old.upgrade_new_ms_id = Some(new.id);
        old.archived = true;

        self.save_all(&[old.clone(), new.clone()])?;

        info!(from = %old, to = %new, "upgrade started");
        Ok(Decision::UpgradeStarted {
            from: old.id,
            to: new.id,
            version: new.version,
        })
    }

    fn roll_back(&self, mut failed: MicroserviceDefinition, now: u64) -> Result<Decision, UpgradeError> {
        let stalled = failed.progress.phase().is_in_flight();
        if stalled {
            warn!(
                definition = %failed,
                phase = %failed.progress.phase(),
                timeout_secs = self.config.exec_timeout_secs,
                "upgrade stalled"
            );
            failed
                .progress
                .apply(UpgradeEvent::Fail(FailureReason::ExecutionFailed), now)
                .map_err(|source| UpgradeError::Transition {
                    definition: failed.to_string(),
                    source,
                })?;
        }

        let Some(mut target) = find_rollback_target(&failed, self.records.as_ref())? else {
            error!(definition = %failed, "upgrade failed and there is nothing to roll back to");
            if stalled {
                self.save(&failed)?;
            }
            return Ok(Decision::RollbackUnavailable {
                definition: failed.id,
            });
        };

        target.archived = false;
        target.progress = UpgradeProgress::stable();
        let doc = prepare_policy(&target, self.attributes.as_ref(), &self.node_org)?;

        failed.archived = true;
        self.save_all(&[failed.clone(), target.clone()])?;

        remove_policy(self.sink.as_ref(), &failed)?;
        self.sink.publish(doc)?;

        info!(from = %failed, to = %target, "rolled back");
        Ok(Decision::RolledBack {
            from: failed.id,
            to: target.id,
        })
    }

    /// Advance a definition's upgrade phase.
    ///
    /// On [`UpgradeEvent::Reregistered`] the predecessor's policy is removed
    /// and policy for this definition is published. A failure event leaves the
    /// rollback to the next cycle.
    ///
    /// # Errors
    /// - [`UpgradeError::Transition`] if the event is not allowed now
    /// - store, compile or sink errors; the phase is not advanced if the
    ///   policy cannot be compiled
    pub async fn record_event(
        &self,
        id: DefinitionId,
        event: UpgradeEvent,
    ) -> Result<UpgradePhase, UpgradeError> {
        let def = self.load(id)?;
        let lock = self.lock_for(def.lineage_key());
        let _guard = lock.lock().await;

        let mut def = self.load(id)?;
        let doc = match event {
            UpgradeEvent::Reregistered => Some(prepare_policy(
                &def,
                self.attributes.as_ref(),
                &self.node_org,
            )?),
            _ => None,
        };

        let phase = def
            .progress
            .apply(event, self.clock.now())
            .map_err(|source| UpgradeError::Transition {
                definition: def.to_string(),
                source,
            })?;
        self.save(&def)?;
        info!(definition = %def, %phase, "upgrade phase advanced");

        if let Some(doc) = doc {
            if let Some(prev_id) = def.upgrade_prev_ms_id {
                match self.records.get_definition(prev_id) {
                    Ok(Some(prev)) => remove_policy(self.sink.as_ref(), &prev)?,
                    Ok(None) => warn!(definition = %def, missing = %prev_id, "predecessor record missing"),
                    Err(source) => {
                        return Err(UpgradeError::store(
                            format!("reading predecessor {prev_id}"),
                            source,
                        ))
                    }
                }
            }
            self.sink.publish(doc)?;
        }
        Ok(phase)
    }

    /// Run cycles on the configured interval until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.cycle_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.cycle_interval_secs, "upgrade engine running");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "reconciliation cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("upgrade engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{InMemoryRegistry, InMemoryStore};
    use crate::sink::{ChannelPolicySink, PolicyEvent};
    use crate::store::FailingPut;
    use msvc_model::{Attribute, AttributeKind, ExchangeMicroservice};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    const GPS: &str = "https://acme.com/svc/gps";

    fn ems(version: &str) -> ExchangeMicroservice {
        ExchangeMicroservice {
            spec_ref: GPS.into(),
            version: version.into(),
            arch: "amd64".into(),
            sharable: "single".into(),
            ..Default::default()
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        registry: Arc<InMemoryRegistry>,
        clock: Arc<ManualClock>,
        events: UnboundedReceiver<PolicyEvent>,
        engine: UpgradeEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let registry = Arc::new(InMemoryRegistry::new());
            let clock = Arc::new(ManualClock::new(1000));
            let (sink, events) = ChannelPolicySink::channel();
            let engine = UpgradeEngine::new(
                store.clone(),
                store.clone(),
                registry.clone(),
                Arc::new(sink),
                EngineConfig::default(),
            )
            .with_clock(clock.clone())
            .with_node_org("acme");
            Self {
                store,
                registry,
                clock,
                events,
                engine,
            }
        }

        fn install(&self, version: &str) -> MicroserviceDefinition {
            let mut def = MicroserviceDefinition::from_exchange(&ems(version), "acme").unwrap();
            def.auto_upgrade = true;
            def.upgrade_version_range = "[1.0.0,INFINITY)".into();
            self.store.put_definition(&def).unwrap();
            self.registry.publish("acme", ems(version));
            def
        }

        fn drain(&mut self) -> Vec<PolicyEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.events.try_recv() {
                out.push(ev);
            }
            out
        }

        async fn start_upgrade(&self, old: &MicroserviceDefinition) -> DefinitionId {
            match self.engine.reconcile(old.id).await.unwrap() {
                Decision::UpgradeStarted { to, .. } => to,
                other => panic!("expected upgrade, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn up_to_date_definition_is_left_alone() {
        let f = Fixture::new();
        let def = f.install("1.0.0");
        assert_eq!(
            f.engine.reconcile(def.id).await.unwrap(),
            Decision::UpToDate { definition: def.id }
        );
        assert_eq!(f.store.get_definition(def.id).unwrap().unwrap(), def);
    }

    #[tokio::test]
    async fn newer_version_starts_upgrade_with_links() {
        let f = Fixture::new();
        let old = f.install("1.0.0");
        f.registry.publish("acme", ems("1.1.0"));

        let new_id = f.start_upgrade(&old).await;

        let old = f.store.get_definition(old.id).unwrap().unwrap();
        let new = f.store.get_definition(new_id).unwrap().unwrap();
        assert!(old.archived);
        assert_eq!(old.upgrade_new_ms_id, Some(new_id));
        assert!(!new.archived);
        assert_eq!(new.upgrade_prev_ms_id, Some(old.id));
        assert_eq!(new.progress.phase(), UpgradePhase::Started);
        assert_eq!(new.progress.started_at(), Some(1000));
        assert_eq!(new.version, "1.1.0");
        assert!(new.auto_upgrade);
    }

    #[tokio::test]
    async fn ineligible_definitions_are_not_resolved() {
        let f = Fixture::new();
        let mut def = f.install("1.0.0");
        def.auto_upgrade = false;
        f.store.put_definition(&def).unwrap();
        f.registry.publish("acme", ems("2.0.0"));

        assert_eq!(
            f.engine.reconcile(def.id).await.unwrap(),
            Decision::Ineligible { definition: def.id }
        );
    }

    #[tokio::test]
    async fn stalled_upgrade_rolls_back_after_timeout() {
        let mut f = Fixture::new();
        let old = f.install("1.0.0");
        f.registry.publish("acme", ems("1.1.0"));
        let new_id = f.start_upgrade(&old).await;

        f.clock.advance(180);
        assert_eq!(
            f.engine.reconcile(new_id).await.unwrap(),
            Decision::Ineligible { definition: new_id }
        );

        f.clock.advance(1);
        assert_eq!(
            f.engine.reconcile(new_id).await.unwrap(),
            Decision::RolledBack {
                from: new_id,
                to: old.id
            }
        );

        let failed = f.store.get_definition(new_id).unwrap().unwrap();
        assert!(failed.archived);
        assert_eq!(failed.progress.phase(), UpgradePhase::Failed);
        assert_eq!(
            failed.progress.failure().unwrap().reason,
            FailureReason::ExecutionFailed
        );

        let restored = f.store.get_definition(old.id).unwrap().unwrap();
        assert!(!restored.archived);
        assert_eq!(restored.progress.phase(), UpgradePhase::Stable);
        assert_eq!(restored.upgrade_new_ms_id, Some(new_id));

        let events = f.drain();
        assert!(matches!(&events[0], PolicyEvent::Remove(r) if r.definition_id == new_id));
        assert!(matches!(&events[1], PolicyEvent::Publish(p) if p.api_spec().unwrap().version == "1.0.0"));
    }

    #[tokio::test]
    async fn rolled_back_candidate_is_not_retried() {
        let f = Fixture::new();
        let old = f.install("1.0.0");
        f.registry.publish("acme", ems("1.1.0"));
        let new_id = f.start_upgrade(&old).await;

        f.engine
            .record_event(new_id, UpgradeEvent::Fail(FailureReason::ImageLoadFailed))
            .await
            .unwrap();
        assert!(matches!(
            f.engine.reconcile(new_id).await.unwrap(),
            Decision::RolledBack { .. }
        ));

        assert_eq!(
            f.engine.reconcile(old.id).await.unwrap(),
            Decision::UpToDate { definition: old.id }
        );

        // a later release is picked up again
        f.registry.publish("acme", ems("1.1.1"));
        assert!(matches!(
            f.engine.reconcile(old.id).await.unwrap(),
            Decision::UpgradeStarted { .. }
        ));
    }

    #[tokio::test]
    async fn failed_without_predecessor_is_reported() {
        let f = Fixture::new();
        let mut def = f.install("1.0.0");
        def.progress.apply(UpgradeEvent::Start, 700).unwrap();
        f.store.put_definition(&def).unwrap();

        assert_eq!(
            f.engine.reconcile(def.id).await.unwrap(),
            Decision::RollbackUnavailable { definition: def.id }
        );
        let stored = f.store.get_definition(def.id).unwrap().unwrap();
        assert_eq!(stored.progress.phase(), UpgradePhase::Failed);
        assert!(!stored.archived);
    }

    #[tokio::test]
    async fn reregistered_swaps_policies() {
        let mut f = Fixture::new();
        f.store.add_attribute(Attribute::scoped(
            [GPS],
            AttributeKind::Property {
                mappings: [("tier".to_string(), json!("gold"))].into_iter().collect(),
            },
        ));
        let old = f.install("1.0.0");
        f.registry.publish("acme", ems("1.1.0"));
        let new_id = f.start_upgrade(&old).await;

        for event in [
            UpgradeEvent::Unregistered,
            UpgradeEvent::AgreementsCleared,
            UpgradeEvent::ExecutionStarted,
        ] {
            f.engine.record_event(new_id, event).await.unwrap();
        }
        assert!(f.drain().is_empty());

        let phase = f
            .engine
            .record_event(new_id, UpgradeEvent::Reregistered)
            .await
            .unwrap();
        assert_eq!(phase, UpgradePhase::Reregistered);

        let events = f.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], PolicyEvent::Remove(r) if r.definition_id == old.id));
        match &events[1] {
            PolicyEvent::Publish(doc) => {
                assert_eq!(doc.api_spec().unwrap().version, "1.1.0");
                assert_eq!(doc.properties.get("tier"), Some(&json!("gold")));
                assert_eq!(doc.max_agreements, 2);
                assert_eq!(doc.node_org, "acme");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn illegal_event_leaves_record_untouched() {
        let f = Fixture::new();
        let old = f.install("1.0.0");
        f.registry.publish("acme", ems("1.1.0"));
        let new_id = f.start_upgrade(&old).await;
        let before = f.store.get_definition(new_id).unwrap().unwrap();

        let err = f
            .engine
            .record_event(new_id, UpgradeEvent::Reregistered)
            .await
            .unwrap_err();
        assert!(matches!(err, UpgradeError::Transition { .. }));
        assert_eq!(f.store.get_definition(new_id).unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn cycle_collects_failures_and_decisions() {
        let f = Fixture::new();
        let ok = f.install("1.0.0");

        let mut broken = MicroserviceDefinition::from_exchange(
            &ExchangeMicroservice {
                spec_ref: "https://acme.com/svc/cpu".into(),
                ..ems("1.0.0")
            },
            "acme",
        )
        .unwrap();
        broken.auto_upgrade = true;
        broken.upgrade_version_range = "not a range".into();
        f.store.put_definition(&broken).unwrap();

        let report = f.engine.run_cycle().await.unwrap();
        assert_eq!(report.decisions, vec![Decision::UpToDate { definition: ok.id }]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].definition, broken.id);
        assert!(matches!(
            report.failures[0].error,
            UpgradeError::InvalidRange { .. }
        ));
    }

    #[tokio::test]
    async fn cycle_fails_when_store_is_down() {
        let f = Fixture::new();
        f.store.set_unavailable(true);
        assert!(matches!(
            f.engine.run_cycle().await,
            Err(UpgradeError::Store { .. })
        ));
    }

    #[tokio::test]
    async fn install_publishes_policy() {
        let mut f = Fixture::new();
        let def = MicroserviceDefinition::from_exchange(&ems("1.0.0"), "acme").unwrap();
        let doc = f.engine.install(&def).await.unwrap();
        assert_eq!(f.store.get_definition(def.id).unwrap().unwrap(), def);
        assert!(matches!(&f.drain()[..], [PolicyEvent::Publish(p)] if **p == doc));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = Fixture::new();
        let (tx, rx) = watch::channel(false);
        let engine = f.engine;
        let handle = tokio::spawn(async move { engine.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    fn auto_definition(version: &str) -> MicroserviceDefinition {
        let mut def = MicroserviceDefinition::from_exchange(&ems(version), "acme").unwrap();
        def.auto_upgrade = true;
        def.upgrade_version_range = "[1.0.0,INFINITY)".into();
        def
    }

    fn engine_over(
        records: Arc<FailingPut>,
    ) -> (UpgradeEngine, Arc<InMemoryRegistry>, UnboundedReceiver<PolicyEvent>) {
        let registry = Arc::new(InMemoryRegistry::new());
        let (sink, events) = ChannelPolicySink::channel();
        let engine = UpgradeEngine::new(
            records,
            Arc::new(InMemoryStore::new()),
            registry.clone(),
            Arc::new(sink),
            EngineConfig::default(),
        )
        .with_clock(Arc::new(ManualClock::new(1000)))
        .with_node_org("acme");
        (engine, registry, events)
    }

    #[tokio::test]
    async fn interrupted_upgrade_start_keeps_old_active() {
        let inner = InMemoryStore::new();
        let old = auto_definition("1.0.0");
        inner.put_definition(&old).unwrap();
        let records = Arc::new(FailingPut::new(inner, 2));
        let (engine, registry, mut events) = engine_over(records.clone());
        registry.publish("acme", ems("1.1.0"));

        let err = engine.reconcile(old.id).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Store { .. }));
        assert_eq!(records.find_definitions(&[]).unwrap(), vec![old.clone()]);

        // the retry starts exactly one upgrade
        assert!(matches!(
            engine.reconcile(old.id).await.unwrap(),
            Decision::UpgradeStarted { .. }
        ));
        let active = records
            .find_definitions(&[DefinitionFilter::Unarchived])
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, "1.1.0");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn interrupted_rollback_keeps_a_definition_active() {
        let mut old = auto_definition("1.0.0");
        let mut new = auto_definition("1.1.0");
        new.progress.apply(UpgradeEvent::Start, 100).unwrap();
        new.upgrade_prev_ms_id = Some(old.id);
        old.upgrade_new_ms_id = Some(new.id);
        old.archived = true;

        let inner = InMemoryStore::new();
        inner.put_definition(&old).unwrap();
        inner.put_definition(&new).unwrap();
        let records = Arc::new(FailingPut::new(inner, 2));
        let (engine, _registry, mut events) = engine_over(records.clone());

        let err = engine.reconcile(new.id).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Store { .. }));
        assert_eq!(records.get_definition(new.id).unwrap(), Some(new.clone()));
        assert_eq!(records.get_definition(old.id).unwrap(), Some(old.clone()));
        assert!(events.try_recv().is_err());

        assert_eq!(
            engine.reconcile(new.id).await.unwrap(),
            Decision::RolledBack {
                from: new.id,
                to: old.id
            }
        );
        let active = records
            .find_definitions(&[DefinitionFilter::Unarchived])
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, old.id);
    }

    #[tokio::test]
    async fn failed_batch_write_changes_nothing() {
        let f = Fixture::new();
        let old = f.install("1.0.0");
        f.registry.publish("acme", ems("1.1.0"));

        f.store.fail_next_writes(1);
        assert!(f.engine.reconcile(old.id).await.is_err());
        assert_eq!(f.store.find_definitions(&[]).unwrap(), vec![old.clone()]);

        assert!(matches!(
            f.engine.reconcile(old.id).await.unwrap(),
            Decision::UpgradeStarted { .. }
        ));
    }

    #[tokio::test]
    async fn locks_of_retired_lineages_are_dropped() {
        let f = Fixture::new();
        let def = f.install("1.0.0");
        f.engine.run_cycle().await.unwrap();
        assert_eq!(f.engine.locks.len(), 1);

        let mut retired = def.clone();
        retired.archived = true;
        f.store.put_definition(&retired).unwrap();
        f.engine.run_cycle().await.unwrap();
        assert!(f.engine.locks.is_empty());
    }
}
