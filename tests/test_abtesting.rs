//! Integration test: A/B experiment lifecycle end to end
//! Flow: create test -> route traffic -> record outcomes -> compare ->
//! auto-complete with the winner.

use std::sync::Arc;

use chrono::Utc;
use modelwatch::prelude::*;

fn seed(storage: &Arc<MemoryStorage>, name: &str) -> i64 {
    storage
        .insert_model(Model {
            id: 0,
            name: name.to_string(),
            created_at: Utc::now(),
        })
        .unwrap()
        .id
}

fn setup() -> (AbTestEngine, i64, i64) {
    let storage = Arc::new(MemoryStorage::new());
    let a = seed(&storage, "gbm-v1");
    let b = seed(&storage, "gbm-v2");
    (AbTestEngine::new(storage).with_seed(7), a, b)
}

#[test]
fn full_experiment_reaches_a_significant_winner() {
    let (engine, model_a, model_b) = setup();

    let test = engine
        .create_test(NewAbTest {
            name: "gbm-v1 vs gbm-v2".to_string(),
            model_a_id: model_a,
            model_b_id: model_b,
            traffic_split_a: Some(50),
            traffic_split_b: Some(50),
            min_sample_size: Some(200),
            confidence_level: Some(0.95),
            ..NewAbTest::default()
        })
        .unwrap();
    engine.start_test(test.id).unwrap();

    // variant B genuinely better: 85% vs 70% correct
    for i in 0..250u64 {
        let (_, variant) = engine.select_model_for_prediction(&test);
        let correct_rate = match variant {
            Variant::A => 70,
            Variant::B => 85,
        };
        engine
            .record_result(NewTestResult {
                test_id: test.id,
                variant,
                prediction_id: Some(i as i64),
                predicted_value: 1.0,
                actual_value: Some(1.0),
                is_correct: Some(i % 100 < correct_rate),
                response_time_ms: Some(15),
            })
            .unwrap();
    }
    // top up both variants past the sample floor with deterministic routing
    for variant in [Variant::A, Variant::B] {
        let correct_rate = match variant {
            Variant::A => 70,
            Variant::B => 85,
        };
        for i in 0..200u64 {
            engine
                .record_result(NewTestResult {
                    test_id: test.id,
                    variant,
                    prediction_id: None,
                    predicted_value: 1.0,
                    actual_value: Some(1.0),
                    is_correct: Some(i % 100 < correct_rate),
                    response_time_ms: Some(15),
                })
                .unwrap();
        }
    }

    let comparison = engine.compare_models(test.id).unwrap();
    assert!(comparison.sample_size_reached);
    assert!(comparison.is_significant);
    assert_eq!(comparison.winner, Some(TestWinner::B));
    assert!(comparison.recommendation.contains("model B"));

    assert!(engine.auto_complete_if_ready(test.id).unwrap());
    let test = engine.get_test(test.id).unwrap();
    assert_eq!(test.status, TestStatus::Completed);
    assert_eq!(test.winner_id, Some(model_b));
}

#[test]
fn undecided_experiment_keeps_running() {
    let (engine, model_a, model_b) = setup();

    let test = engine
        .create_test(NewAbTest {
            name: "close race".to_string(),
            model_a_id: model_a,
            model_b_id: model_b,
            min_sample_size: Some(100),
            ..NewAbTest::default()
        })
        .unwrap();
    engine.start_test(test.id).unwrap();

    for variant in [Variant::A, Variant::B] {
        for i in 0..120u64 {
            engine
                .record_result(NewTestResult {
                    test_id: test.id,
                    variant,
                    prediction_id: None,
                    predicted_value: 1.0,
                    actual_value: Some(1.0),
                    is_correct: Some(i % 100 < 75),
                    response_time_ms: None,
                })
                .unwrap();
        }
    }

    let comparison = engine.compare_models(test.id).unwrap();
    assert!(comparison.sample_size_reached);
    assert!(!comparison.is_significant);
    assert!(!engine.auto_complete_if_ready(test.id).unwrap());
    assert_eq!(engine.get_test(test.id).unwrap().status, TestStatus::Running);
}

#[test]
fn listing_filters_by_status() {
    let (engine, model_a, model_b) = setup();

    for name in ["one", "two", "three"] {
        engine
            .create_test(NewAbTest {
                name: name.to_string(),
                model_a_id: model_a,
                model_b_id: model_b,
                ..NewAbTest::default()
            })
            .unwrap();
    }
    let (drafts, total) = engine.list_tests(Some(TestStatus::Draft), 50, 0).unwrap();
    assert_eq!(total, 3);
    assert_eq!(drafts.len(), 3);

    engine.start_test(drafts[0].id).unwrap();
    let running = engine.get_running_tests().unwrap();
    assert_eq!(running.len(), 1);

    let (drafts, total) = engine.list_tests(Some(TestStatus::Draft), 50, 0).unwrap();
    assert_eq!(total, 2);
    assert_eq!(drafts.len(), 2);
}

#[test]
fn cancelled_test_is_terminal() {
    let (engine, model_a, model_b) = setup();
    let test = engine
        .create_test(NewAbTest {
            name: "doomed".to_string(),
            model_a_id: model_a,
            model_b_id: model_b,
            ..NewAbTest::default()
        })
        .unwrap();

    let test = engine.cancel_test(test.id).unwrap();
    assert_eq!(test.status, TestStatus::Cancelled);
    assert!(test.end_date.is_some());
    assert!(engine.start_test(test.id).is_err());
}
