//! Integration test: version lifecycle invariants

use std::sync::Arc;

use chrono::Utc;
use modelwatch::prelude::*;

fn setup() -> (Arc<MemoryStorage>, VersionRegistry, i64) {
    let storage = Arc::new(MemoryStorage::new());
    let model = storage
        .insert_model(Model {
            id: 0,
            name: "anomaly-scorer".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();
    let registry = VersionRegistry::new(storage.clone());
    (storage, registry, model.id)
}

fn active_count(storage: &Arc<MemoryStorage>, model_id: i64) -> usize {
    storage
        .list_versions(model_id)
        .unwrap()
        .iter()
        .filter(|v| v.is_active)
        .count()
}

#[test]
fn exactly_one_active_version_after_any_deploy_sequence() {
    let (storage, registry, model_id) = setup();
    let mut ids = Vec::new();
    for i in 0..5 {
        let v = registry
            .create_version(NewVersion {
                model_id,
                accuracy: Some(0.80 + i as f64 * 0.02),
                ..NewVersion::default()
            })
            .unwrap();
        ids.push(v.id);
    }
    assert_eq!(active_count(&storage, model_id), 0);

    for &id in &ids {
        registry.deploy_version(id).unwrap();
        assert_eq!(active_count(&storage, model_id), 1);
    }
    // versions deploy in order, so the last deployed is active
    let active = registry.get_active_version(model_id).unwrap().unwrap();
    assert_eq!(active.id, *ids.last().unwrap());
}

#[test]
fn rollback_swaps_active_and_completes_record() {
    let (storage, registry, model_id) = setup();
    let v1 = registry
        .create_version(NewVersion {
            model_id,
            accuracy: Some(0.82),
            ..NewVersion::default()
        })
        .unwrap();
    let v2 = registry
        .create_version(NewVersion {
            model_id,
            accuracy: Some(0.86),
            ..NewVersion::default()
        })
        .unwrap();
    registry.deploy_version(v2.id).unwrap();

    let outcome = registry
        .rollback(model_id, v1.id, "bad release", RollbackType::Manual)
        .unwrap();

    assert_eq!(active_count(&storage, model_id), 1);
    assert!(registry.get_version(v1.id).unwrap().is_active);
    assert!(!registry.get_version(v2.id).unwrap().is_active);
    assert_eq!(
        outcome.record.status,
        modelwatch::versioning::RollbackStatus::Completed
    );
}

#[test]
fn retired_version_rejects_rollback_without_mutation() {
    let (storage, registry, model_id) = setup();
    let v1 = registry
        .create_version(NewVersion {
            model_id,
            ..NewVersion::default()
        })
        .unwrap();
    let v2 = registry
        .create_version(NewVersion {
            model_id,
            ..NewVersion::default()
        })
        .unwrap();
    registry.deploy_version(v2.id).unwrap();
    registry.retire_version(v1.id).unwrap();

    assert!(registry
        .rollback(model_id, v1.id, "should fail", RollbackType::Manual)
        .is_err());
    assert!(registry.get_version(v2.id).unwrap().is_active);
    assert_eq!(active_count(&storage, model_id), 1);
}

#[test]
fn comparison_and_trend_agree_on_the_better_version() {
    let (_, registry, model_id) = setup();
    let old = registry
        .create_version(NewVersion {
            model_id,
            accuracy: Some(0.80),
            f1_score: Some(0.78),
            root_mean_squared_error: Some(0.30),
            ..NewVersion::default()
        })
        .unwrap();
    let new = registry
        .create_version(NewVersion {
            model_id,
            accuracy: Some(0.88),
            f1_score: Some(0.85),
            root_mean_squared_error: Some(0.22),
            ..NewVersion::default()
        })
        .unwrap();

    let comparison = registry.compare_versions(old.id, new.id).unwrap();
    assert_eq!(
        comparison.overall,
        modelwatch::versioning::ComparisonWinner::VersionB
    );

    let trend = registry.get_performance_trend(model_id, "accuracy").unwrap();
    assert_eq!(
        trend.direction,
        modelwatch::drift::TrendDirection::Improving
    );

    let trend = registry
        .get_performance_trend(model_id, "root_mean_squared_error")
        .unwrap();
    assert_eq!(
        trend.direction,
        modelwatch::drift::TrendDirection::Improving
    );
}
