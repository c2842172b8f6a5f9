//! A/B testing
//!
//! Controlled experiments between two model variants: traffic splitting,
//! append-only result recording, and statistical winner determination.

mod significance;

pub use significance::{
    normal_cdf, two_proportion_test, z_critical, ConfidenceInterval, SignificanceOutcome,
    TestWinner, MIN_OBSERVATIONS,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ModelWatchError, Result};
use crate::notify::{self, Notifier};
use crate::storage::Storage;

/// Experiment lifecycle state. Draft is initial; Completed and Cancelled
/// are terminal; Running and Paused are mutually reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

/// Experiment variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::A => f.write_str("A"),
            Variant::B => f.write_str("B"),
        }
    }
}

/// A persisted A/B test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub model_a_id: i64,
    pub model_b_id: i64,
    /// Percentage of traffic routed to variant A; splits sum to 100
    pub traffic_split_a: u8,
    pub traffic_split_b: u8,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub status: TestStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub winner_id: Option<i64>,
    pub p_value: Option<f64>,
    pub is_significant: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating an A/B test
#[derive(Debug, Clone, Default)]
pub struct NewAbTest {
    pub name: String,
    pub description: Option<String>,
    pub model_a_id: i64,
    pub model_b_id: i64,
    pub traffic_split_a: Option<u8>,
    pub traffic_split_b: Option<u8>,
    pub min_sample_size: Option<u64>,
    pub confidence_level: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// One served prediction's outcome, appended to the result log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestResult {
    pub id: i64,
    pub test_id: i64,
    pub variant: Variant,
    pub prediction_id: Option<i64>,
    pub predicted_value: f64,
    pub actual_value: Option<f64>,
    pub is_correct: Option<bool>,
    pub response_time_ms: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}

/// Input for recording a test result
#[derive(Debug, Clone)]
pub struct NewTestResult {
    pub test_id: i64,
    pub variant: Variant,
    pub prediction_id: Option<i64>,
    pub predicted_value: f64,
    pub actual_value: Option<f64>,
    pub is_correct: Option<bool>,
    pub response_time_ms: Option<u64>,
}

/// Aggregated performance of one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantStats {
    pub model_id: i64,
    pub model_name: String,
    pub total_predictions: u64,
    pub correct_predictions: u64,
    pub accuracy: f64,
    pub mean_error: f64,
    pub mean_absolute_error: f64,
    pub root_mean_squared_error: f64,
    pub avg_response_time_ms: f64,
}

/// Full comparison between the two variants of a test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestComparison {
    pub test_id: i64,
    pub test_name: String,
    pub status: TestStatus,
    pub variant_a: VariantStats,
    pub variant_b: VariantStats,
    pub winner: Option<TestWinner>,
    pub is_significant: bool,
    pub p_value: f64,
    pub confidence_interval: ConfidenceInterval,
    pub sample_size_reached: bool,
    pub recommendation: String,
}

/// Runs the experiment lifecycle and the statistical comparison between two
/// model variants. Holds its own seeded RNG so traffic splitting is
/// reproducible under test.
pub struct AbTestEngine {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    rng: Mutex<Xoshiro256PlusPlus>,
}

impl AbTestEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            notifier: Arc::new(notify::LogNotifier),
            rng: Mutex::new(Xoshiro256PlusPlus::from_entropy()),
        }
    }

    /// Replace the completion notifier (defaults to log-only delivery).
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Seed the traffic-split RNG for deterministic tests.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    // ----- lifecycle -----

    /// Create a test in Draft. Traffic splits must sum to exactly 100.
    pub fn create_test(&self, input: NewAbTest) -> Result<AbTest> {
        let split_a = input.traffic_split_a.unwrap_or(50);
        let split_b = input.traffic_split_b.unwrap_or(50);
        if split_a as u16 + split_b as u16 != 100 {
            return Err(ModelWatchError::Validation(
                "traffic split must sum to 100%".to_string(),
            ));
        }

        for model_id in [input.model_a_id, input.model_b_id] {
            self.storage
                .get_model(model_id)?
                .ok_or_else(|| ModelWatchError::not_found("model", model_id))?;
        }

        self.storage.insert_test(AbTest {
            id: 0,
            name: input.name,
            description: input.description,
            model_a_id: input.model_a_id,
            model_b_id: input.model_b_id,
            traffic_split_a: split_a,
            traffic_split_b: split_b,
            min_sample_size: input.min_sample_size.unwrap_or(1000),
            confidence_level: input.confidence_level.unwrap_or(0.95),
            status: TestStatus::Draft,
            start_date: input.start_date,
            end_date: input.end_date,
            winner_id: None,
            p_value: None,
            is_significant: None,
            created_at: Utc::now(),
        })
    }

    pub fn start_test(&self, test_id: i64) -> Result<AbTest> {
        let mut test = self.get_test(test_id)?;
        match test.status {
            TestStatus::Draft | TestStatus::Paused => {}
            other => {
                return Err(ModelWatchError::Validation(format!(
                    "cannot start a test in status {:?}",
                    other
                )))
            }
        }
        if test.start_date.is_none() {
            test.start_date = Some(Utc::now());
        }
        test.status = TestStatus::Running;
        self.storage.update_test(&test)?;
        Ok(test)
    }

    pub fn pause_test(&self, test_id: i64) -> Result<AbTest> {
        let mut test = self.get_test(test_id)?;
        if test.status != TestStatus::Running {
            return Err(ModelWatchError::Validation(format!(
                "cannot pause a test in status {:?}",
                test.status
            )));
        }
        test.status = TestStatus::Paused;
        self.storage.update_test(&test)?;
        Ok(test)
    }

    /// Complete a test, optionally recording the winning model. Sends a
    /// best-effort completion notification.
    pub fn complete_test(&self, test_id: i64, winner_id: Option<i64>) -> Result<AbTest> {
        let mut test = self.get_test(test_id)?;
        match test.status {
            TestStatus::Running | TestStatus::Paused => {}
            other => {
                return Err(ModelWatchError::Validation(format!(
                    "cannot complete a test in status {:?}",
                    other
                )))
            }
        }
        test.status = TestStatus::Completed;
        test.end_date = Some(Utc::now());
        test.winner_id = winner_id;
        self.storage.update_test(&test)?;
        info!(test_id, ?winner_id, "A/B test completed");
        self.notify_completion(&test);
        Ok(test)
    }

    pub fn cancel_test(&self, test_id: i64) -> Result<AbTest> {
        let mut test = self.get_test(test_id)?;
        if matches!(test.status, TestStatus::Completed | TestStatus::Cancelled) {
            return Err(ModelWatchError::Validation(format!(
                "test {} is already finished",
                test_id
            )));
        }
        test.status = TestStatus::Cancelled;
        test.end_date = Some(Utc::now());
        self.storage.update_test(&test)?;
        Ok(test)
    }

    pub fn get_test(&self, test_id: i64) -> Result<AbTest> {
        self.storage
            .get_test(test_id)?
            .ok_or_else(|| ModelWatchError::not_found("A/B test", test_id))
    }

    pub fn list_tests(
        &self,
        status: Option<TestStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<AbTest>, u64)> {
        self.storage.list_tests(status, limit, offset)
    }

    pub fn get_running_tests(&self) -> Result<Vec<AbTest>> {
        self.storage.running_tests()
    }

    // ----- serving -----

    /// Route one prediction request to a variant: a uniform draw in
    /// [0, 100) against the variant A split.
    pub fn select_model_for_prediction(&self, test: &AbTest) -> (i64, Variant) {
        let draw: f64 = self.rng.lock().gen_range(0.0..100.0);
        if draw < test.traffic_split_a as f64 {
            (test.model_a_id, Variant::A)
        } else {
            (test.model_b_id, Variant::B)
        }
    }

    /// Append one served prediction's outcome to the result log.
    pub fn record_result(&self, input: NewTestResult) -> Result<AbTestResult> {
        self.get_test(input.test_id)?;
        self.storage.insert_test_result(AbTestResult {
            id: 0,
            test_id: input.test_id,
            variant: input.variant,
            prediction_id: input.prediction_id,
            predicted_value: input.predicted_value,
            actual_value: input.actual_value,
            is_correct: input.is_correct,
            response_time_ms: input.response_time_ms,
            recorded_at: Utc::now(),
        })
    }

    // ----- analysis -----

    /// Per-variant aggregates for a test.
    pub fn get_test_stats(&self, test_id: i64) -> Result<(VariantStats, VariantStats)> {
        let test = self.get_test(test_id)?;
        let stats_a = self.variant_stats(&test, Variant::A)?;
        let stats_b = self.variant_stats(&test, Variant::B)?;
        Ok((stats_a, stats_b))
    }

    fn variant_stats(&self, test: &AbTest, variant: Variant) -> Result<VariantStats> {
        let model_id = match variant {
            Variant::A => test.model_a_id,
            Variant::B => test.model_b_id,
        };
        let model_name = self
            .storage
            .get_model(model_id)?
            .map(|m| m.name)
            .unwrap_or_else(|| format!("Model {}", variant));

        let results = self.storage.test_results(test.id, Some(variant))?;
        let total = results.len() as u64;
        let correct = results
            .iter()
            .filter(|r| r.is_correct == Some(true))
            .count() as u64;

        let mut sum_error = 0.0;
        let mut sum_abs_error = 0.0;
        let mut sum_squared_error = 0.0;
        let mut error_count = 0u64;
        let mut sum_response = 0.0;
        let mut response_count = 0u64;

        for r in &results {
            if let Some(actual) = r.actual_value {
                let error = actual - r.predicted_value;
                sum_error += error;
                sum_abs_error += error.abs();
                sum_squared_error += error * error;
                error_count += 1;
            }
            if let Some(rt) = r.response_time_ms {
                sum_response += rt as f64;
                response_count += 1;
            }
        }

        let ratio = |num: f64, denom: u64| if denom > 0 { num / denom as f64 } else { 0.0 };

        Ok(VariantStats {
            model_id,
            model_name,
            total_predictions: total,
            correct_predictions: correct,
            accuracy: ratio(correct as f64, total),
            mean_error: ratio(sum_error, error_count),
            mean_absolute_error: ratio(sum_abs_error, error_count),
            root_mean_squared_error: ratio(sum_squared_error, error_count).sqrt(),
            avg_response_time_ms: ratio(sum_response, response_count),
        })
    }

    /// Two-proportion z-test between the variants' accuracies.
    pub fn determine_winner(
        &self,
        stats_a: &VariantStats,
        stats_b: &VariantStats,
        confidence_level: f64,
    ) -> SignificanceOutcome {
        two_proportion_test(
            stats_a.accuracy,
            stats_a.total_predictions,
            stats_b.accuracy,
            stats_b.total_predictions,
            confidence_level,
        )
    }

    /// Full comparison: aggregates, significance, sample-size progress, and
    /// a human-readable recommendation.
    pub fn compare_models(&self, test_id: i64) -> Result<TestComparison> {
        let test = self.get_test(test_id)?;
        let (variant_a, variant_b) = self.get_test_stats(test_id)?;
        let outcome = self.determine_winner(&variant_a, &variant_b, test.confidence_level);
        let sample_size_reached = variant_a.total_predictions >= test.min_sample_size
            && variant_b.total_predictions >= test.min_sample_size;

        let recommendation = if !sample_size_reached {
            let missing_a = test.min_sample_size.saturating_sub(variant_a.total_predictions);
            let missing_b = test.min_sample_size.saturating_sub(variant_b.total_predictions);
            format!(
                "Need {} more predictions for variant A and {} more for variant B to reach the minimum sample size.",
                missing_a, missing_b
            )
        } else if !outcome.is_significant {
            "No statistically significant difference between the two models yet. Keep collecting data or adjust the traffic split.".to_string()
        } else {
            match outcome.winner {
                Some(TestWinner::A) => format!(
                    "Model A ({}) performs better with accuracy {:.2}%. Recommend deploying model A.",
                    variant_a.model_name,
                    variant_a.accuracy * 100.0
                ),
                Some(TestWinner::B) => format!(
                    "Model B ({}) performs better with accuracy {:.2}%. Recommend deploying model B.",
                    variant_b.model_name,
                    variant_b.accuracy * 100.0
                ),
                _ => "Both models perform equivalently; either can be deployed.".to_string(),
            }
        };

        Ok(TestComparison {
            test_id,
            test_name: test.name,
            status: test.status,
            variant_a,
            variant_b,
            winner: outcome.winner,
            is_significant: outcome.is_significant,
            p_value: outcome.p_value,
            confidence_interval: outcome.confidence_interval,
            sample_size_reached,
            recommendation,
        })
    }

    /// Persist the current comparison outcome onto the test row.
    pub fn update_stats(&self, test_id: i64) -> Result<AbTest> {
        let comparison = self.compare_models(test_id)?;
        let mut test = self.get_test(test_id)?;
        test.p_value = Some(comparison.p_value);
        test.is_significant = Some(comparison.is_significant);
        test.winner_id = winner_model_id(&test, comparison.winner);
        self.storage.update_test(&test)?;
        Ok(test)
    }

    /// Complete a running test when the evidence supports it: either the
    /// sample target is reached with a significant result, or the scheduled
    /// end date has passed (the current leader is recorded either way).
    pub fn auto_complete_if_ready(&self, test_id: i64) -> Result<bool> {
        let test = self.get_test(test_id)?;
        if test.status != TestStatus::Running {
            return Ok(false);
        }

        let comparison = self.compare_models(test_id)?;

        if comparison.sample_size_reached && comparison.is_significant {
            self.complete_test(test_id, winner_model_id(&test, comparison.winner))?;
            return Ok(true);
        }

        // Past the scheduled end, the current leader is recorded even
        // without statistical significance.
        let past_end_date = test.end_date.map(|d| Utc::now() > d).unwrap_or(false);
        if past_end_date {
            let winner = comparison.winner.or_else(|| current_leader(&comparison));
            self.complete_test(test_id, winner_model_id(&test, winner))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn notify_completion(&self, test: &AbTest) {
        let payload = match self.get_test_stats(test.id) {
            Ok((stats_a, stats_b)) => {
                let outcome = self.determine_winner(&stats_a, &stats_b, test.confidence_level);
                notify::ab_test_completion(test, &stats_a, &stats_b, &outcome)
            }
            Err(e) => {
                warn!(test_id = test.id, error = %e, "could not assemble completion stats");
                return;
            }
        };
        if let Err(e) = self.notifier.send(&payload) {
            warn!(test_id = test.id, error = %e, "A/B completion notification failed");
        }
    }
}

fn winner_model_id(test: &AbTest, winner: Option<TestWinner>) -> Option<i64> {
    match winner {
        Some(TestWinner::A) => Some(test.model_a_id),
        Some(TestWinner::B) => Some(test.model_b_id),
        _ => None,
    }
}

fn current_leader(comparison: &TestComparison) -> Option<TestWinner> {
    if comparison.variant_a.accuracy > comparison.variant_b.accuracy {
        Some(TestWinner::A)
    } else if comparison.variant_b.accuracy > comparison.variant_a.accuracy {
        Some(TestWinner::B)
    } else {
        None
    }
}
