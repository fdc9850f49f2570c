//! One-shot reconciliation plan

use anyhow::Context;
use msvc_model::{DefinitionId, PolicyDocument};
use msvc_upgrade::{
    CatalogEntry, ChannelPolicySink, Clock, Decision, EngineConfig, InMemoryRegistry,
    InMemoryStore, ManualClock, NodeSnapshot, PolicyEvent, SystemClock, UpgradeEngine,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Everything a plan run needs
#[derive(Debug, Clone, Default)]
pub struct PlanInput {
    pub snapshot: NodeSnapshot,
    pub catalog: Vec<CatalogEntry>,
    pub config: EngineConfig,
    /// Pin the clock; defaults to the wall clock
    pub now: Option<u64>,
    pub node_org: String,
}

/// A definition whose reconciliation failed
#[derive(Debug, Clone, Serialize)]
pub struct PlanFailure {
    pub definition: DefinitionId,
    pub error: String,
    pub retryable: bool,
}

/// A policy the sink was asked to remove
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRemoval {
    pub spec_ref: String,
    pub org: String,
    pub version: String,
    pub definition_id: DefinitionId,
}

/// Result of a plan run
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutput {
    pub decisions: Vec<Decision>,
    pub failures: Vec<PlanFailure>,
    pub policies: Vec<PolicyDocument>,
    pub removals: Vec<PlannedRemoval>,
    /// Node state after the cycle
    pub state: NodeSnapshot,
}

impl PlanOutput {
    /// Human readable summary
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Decisions:");
        if self.decisions.is_empty() {
            let _ = writeln!(out, "  (no active definitions)");
        }
        for decision in &self.decisions {
            let line = match decision {
                Decision::RolledBack { from, to } => format!("rolled back {from} -> {to}"),
                Decision::RollbackUnavailable { definition } => {
                    format!("{definition}: failed, nothing to roll back to")
                }
                Decision::UpgradeStarted { from, to, version } => {
                    format!("upgrade started {from} -> {to} (version {version})")
                }
                Decision::UpToDate { definition } => format!("{definition}: up to date"),
                Decision::Ineligible { definition } => format!("{definition}: not eligible"),
                Decision::Superseded { definition } => format!("{definition}: superseded"),
            };
            let _ = writeln!(out, "  {line}");
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out, "Failures:");
            for failure in &self.failures {
                let retry = if failure.retryable { " (will retry)" } else { "" };
                let _ = writeln!(out, "  {}: {}{retry}", failure.definition, failure.error);
            }
        }

        if !self.removals.is_empty() {
            let _ = writeln!(out, "Policies removed:");
            for removal in &self.removals {
                let _ = writeln!(
                    out,
                    "  {}/{} version {} key {}",
                    removal.org, removal.spec_ref, removal.version, removal.definition_id
                );
            }
        }

        if !self.policies.is_empty() {
            let _ = writeln!(out, "Policies published:");
            for policy in &self.policies {
                let version = policy.api_spec().map_or("?", |a| a.version.as_str());
                let _ = writeln!(
                    out,
                    "  {} (version {version}, max agreements {})",
                    policy.header.name, policy.max_agreements
                );
            }
        }
        out
    }
}

/// Read a node snapshot from a JSON file
///
/// # Errors
/// Returns error if the file cannot be read or parsed
pub fn load_snapshot(path: &Path) -> anyhow::Result<NodeSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading node state {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing node state {}", path.display()))
}

/// Read a registry catalog (array of `{org, microservice}`) from a JSON file
///
/// # Errors
/// Returns error if the file cannot be read or parsed
pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<CatalogEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing catalog {}", path.display()))
}

/// Engine wired to in-memory collaborators seeded from a plan input
pub struct LocalNode {
    pub store: Arc<InMemoryStore>,
    pub engine: UpgradeEngine,
    pub events: UnboundedReceiver<PolicyEvent>,
}

impl LocalNode {
    #[must_use]
    pub fn new(input: PlanInput) -> Self {
        let store = Arc::new(InMemoryStore::from_snapshot(input.snapshot));
        let registry = Arc::new(InMemoryRegistry::from_catalog(input.catalog));
        let (sink, events) = ChannelPolicySink::channel();
        let clock: Arc<dyn Clock> = match input.now {
            Some(now) => Arc::new(ManualClock::new(now)),
            None => Arc::new(SystemClock),
        };
        let engine = UpgradeEngine::new(
            store.clone(),
            store.clone(),
            registry,
            Arc::new(sink),
            input.config,
        )
        .with_clock(clock)
        .with_node_org(input.node_org);
        Self {
            store,
            engine,
            events,
        }
    }

    /// Split queued sink events into published policies and removals
    pub fn drain_events(&mut self) -> (Vec<PolicyDocument>, Vec<PlannedRemoval>) {
        let mut policies = Vec::new();
        let mut removals = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            match event {
                PolicyEvent::Publish(doc) => policies.push(*doc),
                PolicyEvent::Remove(r) => removals.push(PlannedRemoval {
                    spec_ref: r.spec_ref,
                    org: r.org,
                    version: r.version,
                    definition_id: r.definition_id,
                }),
            }
        }
        (policies, removals)
    }
}

/// Run one reconciliation cycle over the input
///
/// # Errors
/// Returns error if the cycle cannot list definitions
pub async fn run_plan(input: PlanInput) -> anyhow::Result<PlanOutput> {
    let mut node = LocalNode::new(input);
    let report = node
        .engine
        .run_cycle()
        .await
        .context("running reconciliation cycle")?;
    let (policies, removals) = node.drain_events();

    Ok(PlanOutput {
        decisions: report.decisions,
        failures: report
            .failures
            .into_iter()
            .map(|f| PlanFailure {
                definition: f.definition,
                retryable: f.error.is_retryable(),
                error: f.error.to_string(),
            })
            .collect(),
        policies,
        removals,
        state: node.store.snapshot(),
    })
}
