//! Integration test: adaptive thresholds over recorded metric history

use std::sync::Arc;

use chrono::{Duration, Utc};
use modelwatch::prelude::*;
use modelwatch::thresholds::{ThresholdConfigUpdate, UpdateFrequency};

fn seed_model(storage: &Arc<MemoryStorage>) -> i64 {
    storage
        .insert_model(Model {
            id: 0,
            name: "throughput-model".to_string(),
            created_at: Utc::now(),
        })
        .unwrap()
        .id
}

fn record_drift_history(storage: &Arc<MemoryStorage>, model_id: i64, drops: &[f64]) {
    let base = Utc::now() - Duration::hours(drops.len() as i64);
    for (i, &drop) in drops.iter().enumerate() {
        storage
            .insert_metrics_sample(modelwatch::drift::MetricsSample {
                id: 0,
                model_id,
                accuracy: 0.9 - drop,
                precision: None,
                recall: None,
                f1_score: None,
                prediction_count: 100,
                accuracy_drop: Some(drop),
                feature_drift: Some(drop / 2.0),
                prediction_drift: Some(drop / 3.0),
                recorded_at: base + Duration::hours(i as i64),
            })
            .unwrap();
    }
}

#[test]
fn config_defaults_update_and_validation() {
    let storage = Arc::new(MemoryStorage::new());
    let model_id = seed_model(&storage);
    let service = ThresholdService::new(storage.clone());

    // defaults come back for an unconfigured model
    let config = service.get_config(model_id).unwrap();
    assert_eq!(config.algorithm, ThresholdAlgorithm::Adaptive);
    assert_eq!(config.window_size, 100);
    assert!(!config.enabled);

    let config = service
        .update_config(
            model_id,
            ThresholdConfigUpdate {
                enabled: Some(true),
                algorithm: Some(ThresholdAlgorithm::MovingAverage),
                window_size: Some(50),
                update_frequency: Some(UpdateFrequency::Hourly),
                ..ThresholdConfigUpdate::default()
            },
        )
        .unwrap();
    assert!(config.enabled);
    assert_eq!(config.window_size, 50);

    // invalid bounds are rejected before any write
    let err = service
        .update_config(
            model_id,
            ThresholdConfigUpdate {
                min_threshold: Some(0.6),
                max_threshold: Some(0.2),
                ..ThresholdConfigUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ModelWatchError::Validation(_)));
    // the stored config kept its previous bounds
    let config = service.get_config(model_id).unwrap();
    assert!(config.min_threshold < config.max_threshold);
}

#[test]
fn calculation_persists_and_stays_clamped() {
    let storage = Arc::new(MemoryStorage::new());
    let model_id = seed_model(&storage);
    let service = ThresholdService::new(storage.clone());

    let drops: Vec<f64> = (0..60).map(|i| 0.02 + (i % 7) as f64 * 0.01).collect();
    record_drift_history(&storage, model_id, &drops);

    let thresholds = service.calculate(model_id).unwrap();
    assert_eq!(thresholds.data_points, 60);
    assert!((thresholds.confidence - 0.6).abs() < 1e-9);
    for value in [
        thresholds.accuracy_drop,
        thresholds.feature_drift,
        thresholds.prediction_drift,
    ] {
        assert!((0.01..=0.5).contains(&value), "threshold {} escaped clamp", value);
    }

    // the calculation landed on the stored config
    let config = service.get_config(model_id).unwrap();
    assert!(config.last_calculated.is_some());
    assert!(config.last_updated.is_some());
}

#[test]
fn effectiveness_and_suggestion_flow() {
    let storage = Arc::new(MemoryStorage::new());
    let model_id = seed_model(&storage);
    let service = ThresholdService::new(storage.clone());

    // without a prior calculation the analysis asks for one
    let report = service.analyze(model_id).unwrap();
    assert!(report.recommendation.contains("Run a calculation"));

    let drops: Vec<f64> = (0..80).map(|i| 0.02 + (i % 5) as f64 * 0.005).collect();
    record_drift_history(&storage, model_id, &drops);
    service.calculate(model_id).unwrap();

    let report = service.analyze(model_id).unwrap();
    assert!(report.false_positive_rate >= 0.0 && report.false_positive_rate <= 1.0);
    assert!(report.false_negative_rate >= 0.0 && report.false_negative_rate <= 1.0);
    assert!(!report.recommendation.is_empty());

    let suggestion = service.suggest(model_id).unwrap();
    assert!(!suggestion.reason.is_empty());
}

#[test]
fn suggestion_reacts_to_history_size() {
    let storage = Arc::new(MemoryStorage::new());
    let model_id = seed_model(&storage);
    let service = ThresholdService::new(storage.clone());

    record_drift_history(&storage, model_id, &[0.05; 10]);
    let suggestion = service.suggest(model_id).unwrap();
    assert_eq!(suggestion.algorithm, ThresholdAlgorithm::Percentile);
    assert!(suggestion.reason.contains("10 samples"));
}
