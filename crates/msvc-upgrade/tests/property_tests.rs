use msvc_model::{
    Attribute, AttributeKind, FailureReason, UpgradeEvent, UpgradePhase, UpgradeProgress,
    VersionPrecedence,
};
use msvc_test_utils::{exchange_record, installed_definition, started_definition, GPS_SPEC_REF};
use msvc_upgrade::{
    build_policy, can_upgrade, needs_rollback_at, resolve_upgrade_candidate, InMemoryRegistry,
    InMemoryStore,
};
use proptest::prelude::*;
use serde_json::json;

fn any_phase() -> impl Strategy<Value = UpgradePhase> {
    prop_oneof![
        Just(UpgradePhase::Stable),
        Just(UpgradePhase::Started),
        Just(UpgradePhase::Unregistered),
        Just(UpgradePhase::AgreementsCleared),
        Just(UpgradePhase::ExecutionStarted),
        Just(UpgradePhase::Reregistered),
        Just(UpgradePhase::Failed),
    ]
}

fn any_event() -> impl Strategy<Value = UpgradeEvent> {
    prop_oneof![
        Just(UpgradeEvent::Start),
        Just(UpgradeEvent::Unregistered),
        Just(UpgradeEvent::AgreementsCleared),
        Just(UpgradeEvent::ExecutionStarted),
        Just(UpgradeEvent::Reregistered),
        Just(UpgradeEvent::Fail(FailureReason::ExecutionFailed)),
        Just(UpgradeEvent::Fail(FailureReason::UnregisterExchangeFailed)),
    ]
}

/// Walk the happy path up to `phase`
fn progress_at(phase: UpgradePhase) -> UpgradeProgress {
    let path = [
        (UpgradePhase::Started, UpgradeEvent::Start),
        (UpgradePhase::Unregistered, UpgradeEvent::Unregistered),
        (UpgradePhase::AgreementsCleared, UpgradeEvent::AgreementsCleared),
        (UpgradePhase::ExecutionStarted, UpgradeEvent::ExecutionStarted),
        (UpgradePhase::Reregistered, UpgradeEvent::Reregistered),
    ];
    let mut progress = UpgradeProgress::stable();
    if phase == UpgradePhase::Stable {
        return progress;
    }
    if phase == UpgradePhase::Failed {
        progress.apply(UpgradeEvent::Start, 1).unwrap();
        progress
            .apply(UpgradeEvent::Fail(FailureReason::ExecutionFailed), 2)
            .unwrap();
        return progress;
    }
    for (i, (reached, event)) in path.iter().enumerate() {
        progress.apply(*event, i as u64 + 1).unwrap();
        if *reached == phase {
            break;
        }
    }
    progress
}

proptest! {
    #[test]
    fn prop_archived_is_never_eligible(
        auto_upgrade in any::<bool>(),
        active_upgrade in any::<bool>(),
        phase in any_phase(),
    ) {
        let mut def = installed_definition("1.0.0");
        def.archived = true;
        def.auto_upgrade = auto_upgrade;
        def.active_upgrade = active_upgrade;
        def.progress = progress_at(phase);
        prop_assert!(!can_upgrade(&def, &InMemoryStore::new()));
    }

    #[test]
    fn prop_manual_upgrade_is_never_eligible(
        archived in any::<bool>(),
        active_upgrade in any::<bool>(),
        phase in any_phase(),
    ) {
        let mut def = installed_definition("1.0.0");
        def.auto_upgrade = false;
        def.archived = archived;
        def.active_upgrade = active_upgrade;
        def.progress = progress_at(phase);
        prop_assert!(!can_upgrade(&def, &InMemoryStore::new()));
    }

    #[test]
    fn prop_in_flight_is_never_eligible(phase in any_phase()) {
        let mut def = installed_definition("1.0.0");
        def.progress = progress_at(phase);
        let eligible = can_upgrade(&def, &InMemoryStore::new());
        prop_assert_eq!(eligible, !phase.is_in_flight());
    }

    #[test]
    fn prop_not_started_never_needs_rollback(now in any::<u64>(), timeout in any::<u64>()) {
        let def = installed_definition("1.0.0");
        prop_assert!(!needs_rollback_at(&def, now, timeout));
    }

    #[test]
    fn prop_rollback_boundary(
        started in 0u64..1_000_000,
        elapsed in 0u64..10_000,
        timeout in 0u64..10_000,
    ) {
        let def = started_definition("1.0.1", started);
        prop_assert_eq!(
            needs_rollback_at(&def, started + elapsed, timeout),
            elapsed > timeout
        );
    }

    #[test]
    fn prop_transitions_follow_allowed_table(from in any_phase(), event in any_event()) {
        let mut progress = progress_at(from);
        let before = progress.clone();
        let allowed = from.allowed_transitions().contains(&event.target());
        match progress.apply(event, 100) {
            Ok(to) => {
                prop_assert!(allowed);
                prop_assert_eq!(to, event.target());
                prop_assert_eq!(progress.phase(), to);
            }
            Err(err) => {
                prop_assert!(!allowed);
                prop_assert_eq!(err.from, from);
                prop_assert_eq!(progress, before);
            }
        }
    }

    #[test]
    fn prop_specific_property_overrides_common(
        common in "[a-z]{1,8}",
        specific in "[a-z]{1,8}",
        specific_first in any::<bool>(),
    ) {
        let common_attr = Attribute::common(AttributeKind::Property {
            mappings: [("k".to_string(), json!(common))].into_iter().collect(),
        });
        let specific_attr = Attribute::scoped(
            [GPS_SPEC_REF],
            AttributeKind::Property {
                mappings: [("k".to_string(), json!(specific.clone()))].into_iter().collect(),
            },
        );
        let attrs = if specific_first {
            vec![specific_attr, common_attr]
        } else {
            vec![common_attr, specific_attr]
        };
        let doc = build_policy(&installed_definition("1.0.0"), &attrs, "acme").unwrap();
        prop_assert_eq!(doc.properties.get("k"), Some(&json!(specific)));
    }

    #[test]
    fn prop_resolution_is_idempotent(
        installed in (1u64..4, 0u64..12, 0u64..12),
        published in proptest::collection::vec((1u64..4, 0u64..12, 0u64..12), 1..6),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let def = installed_definition(&format!("{}.{}.{}", installed.0, installed.1, installed.2));
        let registry = InMemoryRegistry::new();
        for (a, b, c) in &published {
            registry.publish("acme", exchange_record(&format!("{a}.{b}.{c}")));
        }
        let store = InMemoryStore::new();

        let first = runtime
            .block_on(resolve_upgrade_candidate(&def, &registry, &store, VersionPrecedence::Semantic))
            .unwrap();
        let second = runtime
            .block_on(resolve_upgrade_candidate(&def, &registry, &store, VersionPrecedence::Semantic))
            .unwrap();

        prop_assert_eq!(first.is_some(), second.is_some());
        if let (Some(a), Some(b)) = (first, second) {
            prop_assert_eq!(&a.version, &b.version);
            prop_assert_eq!(a.metadata_hash, b.metadata_hash);
            prop_assert!(VersionPrecedence::Semantic.compare(&a.version, &def.version).is_ge());
        }
    }
}

#[test]
fn test_passive_upgrade_blocked_by_agreements() {
    let store = InMemoryStore::new();
    let mut def = installed_definition("1.0.0");
    def.active_upgrade = false;
    let inst = msvc_model::MicroserviceInstance::new("i1", GPS_SPEC_REF, "1.0.0", def.id)
        .with_agreement("ag-1");
    msvc_upgrade::RecordStore::put_instance(&store, &inst).unwrap();
    assert!(!can_upgrade(&def, &store));
}

#[test]
fn test_rollback_scenario_boundary() {
    let def = started_definition("1.0.1", 1000);
    assert!(needs_rollback_at(&def, 1301, 300));
    assert!(!needs_rollback_at(&def, 1300, 300));
}
