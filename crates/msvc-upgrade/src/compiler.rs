//! Attribute to policy compilation
//!
//! Attributes that apply to a service come in two groups: common ones (no
//! service scoping) and specific ones (scoped to this service). Each group is
//! folded on its own into an [`AttributeFold`]; the specific fold is then
//! merged over the common one, so specific settings win.
//!
//! Within a group, free-form property mappings override typed properties
//! (compute). Across groups the whole specific bag overrides the common one,
//! so a specific compute `ram` beats a common `ram` mapping.

use crate::error::{PolicyCompileError, UpgradeError};
use crate::sink::PolicySink;
use crate::store::AttributeStore;
use msvc_model::{
    parse_agreement_protocols, ApiSpec, Attribute, AttributeKind, HaGroup, Meter,
    MicroserviceDefinition, PolicyDocument, PolicyHeader, Sharable, POLICY_FORMAT_VERSION,
};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Settings collected from one group of attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeFold {
    pub typed_properties: BTreeMap<String, JsonValue>,
    pub mappings: BTreeMap<String, JsonValue>,
    pub arch: Option<String>,
    pub ha_partners: Option<Vec<String>>,
    pub meter: Option<Meter>,
    pub counter_party: Option<JsonValue>,
    pub agreement_protocols: Option<JsonValue>,
}

impl AttributeFold {
    /// Fold attributes in order; later attributes override earlier ones
    ///
    /// # Errors
    /// Returns [`PolicyCompileError::InvalidCompute`] for negative resources
    pub fn fold<'a, I>(attrs: I) -> Result<Self, PolicyCompileError>
    where
        I: IntoIterator<Item = &'a Attribute>,
    {
        let mut acc = Self::default();
        for attr in attrs {
            match &attr.kind {
                AttributeKind::Compute { cpus, ram } => {
                    if *cpus < 0 || *ram < 0 {
                        return Err(PolicyCompileError::InvalidCompute(format!(
                            "cpus {cpus}, ram {ram}"
                        )));
                    }
                    acc.typed_properties
                        .insert("cpus".into(), JsonValue::String(cpus.to_string()));
                    acc.typed_properties
                        .insert("ram".into(), JsonValue::String(ram.to_string()));
                }
                AttributeKind::Architecture { architecture } => {
                    acc.arch = Some(architecture.clone());
                }
                AttributeKind::HighAvailability { partners } => {
                    acc.ha_partners = Some(partners.clone());
                }
                AttributeKind::Metering {
                    tokens,
                    per_time_unit,
                    notification_interval_s,
                } => {
                    acc.meter = Some(Meter {
                        tokens: *tokens,
                        per_time_unit: per_time_unit.clone(),
                        notification_interval_s: *notification_interval_s,
                    });
                }
                AttributeKind::CounterPartyProperty { expression } => {
                    acc.counter_party = Some(expression.clone());
                }
                AttributeKind::Property { mappings } => {
                    acc.mappings
                        .extend(mappings.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                AttributeKind::AgreementProtocol { protocols } => {
                    acc.agreement_protocols = Some(protocols.clone());
                }
                AttributeKind::Unrecognized => {
                    debug!(id = %attr.meta.id, label = %attr.meta.label, "ignoring unhandled attribute type");
                }
            }
        }
        Ok(acc)
    }

    /// Combine two folds into a new one; `over` wins wherever it has a value.
    ///
    /// The result's typed layer is the whole base bag overlaid by `over`'s
    /// typed properties, and its mappings are `over`'s, so
    /// [`AttributeFold::properties`] layers base typed, base mappings, over
    /// typed, over mappings.
    #[must_use]
    pub fn merge(base: &Self, over: &Self) -> Self {
        let mut typed_properties = base.properties();
        typed_properties.extend(over.typed_properties.clone());
        let mappings = over.mappings.clone();

        Self {
            typed_properties,
            mappings,
            arch: over.arch.clone().or_else(|| base.arch.clone()),
            ha_partners: over.ha_partners.clone().or_else(|| base.ha_partners.clone()),
            meter: over.meter.clone().or_else(|| base.meter.clone()),
            counter_party: over
                .counter_party
                .clone()
                .or_else(|| base.counter_party.clone()),
            agreement_protocols: over
                .agreement_protocols
                .clone()
                .or_else(|| base.agreement_protocols.clone()),
        }
    }

    /// Final property bag: typed properties overlaid by mappings
    #[must_use]
    pub fn properties(&self) -> BTreeMap<String, JsonValue> {
        let mut props = self.typed_properties.clone();
        props.extend(self.mappings.clone());
        props
    }
}

/// Agreements a single instance may serve for a sharing mode
#[inline]
#[must_use]
pub fn max_agreements(sharable: Sharable) -> u32 {
    match sharable {
        Sharable::Exclusive => 1,
        Sharable::Single | Sharable::Multiple => 2,
    }
}

/// Build the policy for `def` from its applicable attributes
///
/// # Errors
/// Returns [`PolicyCompileError`] for malformed compute or agreement
/// protocol data
pub fn build_policy(
    def: &MicroserviceDefinition,
    attrs: &[Attribute],
    node_org: &str,
) -> Result<PolicyDocument, PolicyCompileError> {
    let (specific, common): (Vec<&Attribute>, Vec<&Attribute>) =
        attrs.iter().partition(|a| a.is_specific());

    let merged = AttributeFold::merge(
        &AttributeFold::fold(common)?,
        &AttributeFold::fold(specific)?,
    );

    let agreement_protocols =
        parse_agreement_protocols(merged.agreement_protocols.as_ref().unwrap_or(&JsonValue::Null))?;

    let display_name = if def.name.is_empty() {
        def.short_name()
    } else {
        def.name.as_str()
    };

    Ok(PolicyDocument {
        header: PolicyHeader {
            name: format!("Policy for {display_name}"),
            version: POLICY_FORMAT_VERSION.to_string(),
        },
        api_specs: vec![ApiSpec {
            spec_ref: def.spec_ref.clone(),
            org: def.org.clone(),
            version: def.version.clone(),
            exclusive: def.sharable == Sharable::Exclusive,
            arch: merged.arch.clone().unwrap_or_else(|| def.arch.clone()),
        }],
        node_org: node_org.to_string(),
        properties: merged.properties(),
        ha_group: HaGroup {
            partners: merged.ha_partners.unwrap_or_default(),
        },
        meter_policy: merged.meter.unwrap_or_default(),
        counter_party_properties: merged.counter_party.unwrap_or(JsonValue::Null),
        agreement_protocols,
        max_agreements: max_agreements(def.sharable),
    })
}

/// Compile the policy for `def` and hand it to the sink.
///
/// Nothing is published if any step fails.
///
/// # Errors
/// - [`UpgradeError::Store`] if attributes cannot be read
/// - [`UpgradeError::PolicyCompile`] if attribute data is malformed
/// - [`UpgradeError::Sink`] if the sink is gone
pub fn compile_policy<A, P>(
    def: &MicroserviceDefinition,
    attributes: &A,
    sink: &P,
    node_org: &str,
) -> Result<PolicyDocument, UpgradeError>
where
    A: AttributeStore + ?Sized,
    P: PolicySink + ?Sized,
{
    let doc = prepare_policy(def, attributes, node_org)?;
    sink.publish(doc.clone())?;
    Ok(doc)
}

/// Read attributes and build the policy without publishing it
pub(crate) fn prepare_policy<A>(
    def: &MicroserviceDefinition,
    attributes: &A,
    node_org: &str,
) -> Result<PolicyDocument, UpgradeError>
where
    A: AttributeStore + ?Sized,
{
    debug!(definition = %def, "generating policy");
    let attrs = attributes.find_applicable(&def.spec_ref).map_err(|source| {
        UpgradeError::store(format!("reading attributes for {}", def.spec_ref), source)
    })?;

    let doc = build_policy(def, &attrs, node_org).map_err(|source| UpgradeError::PolicyCompile {
        spec_ref: def.spec_ref.clone(),
        version: def.version.clone(),
        source,
    })?;
    info!(
        definition = %def,
        attributes = attrs.len(),
        max_agreements = doc.max_agreements,
        "compiled policy"
    );
    Ok(doc)
}
