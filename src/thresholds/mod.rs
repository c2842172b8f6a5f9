//! Adaptive alert thresholds
//!
//! Derives per-metric alert thresholds from a window of historical drift
//! metrics, grades how well the current thresholds separate real drift from
//! noise, and suggests a fitting algorithm for the data at hand.

mod calculator;

pub use calculator::{
    analyze_effectiveness, calculate_thresholds, suggest_algorithm, validate_config,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::drift::MetricsSample;
use crate::storage::Storage;
use crate::Result;

/// Threshold derivation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdAlgorithm {
    MovingAverage,
    Percentile,
    StdDeviation,
    Adaptive,
}

/// How often recalculation is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    Hourly,
    Daily,
    Weekly,
}

/// Per-model threshold calculation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub model_id: i64,
    pub enabled: bool,
    pub algorithm: ThresholdAlgorithm,
    /// Number of historical samples fed into each calculation
    pub window_size: usize,
    /// Scales how aggressively thresholds track the data (0.1 to 5.0)
    pub sensitivity_factor: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub update_frequency: UpdateFrequency,
    pub last_calculated: Option<CalculatedThresholds>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ThresholdConfig {
    /// Fleet defaults for a model that has never been configured
    pub fn default_for(model_id: i64) -> Self {
        Self {
            model_id,
            enabled: false,
            algorithm: ThresholdAlgorithm::Adaptive,
            window_size: 100,
            sensitivity_factor: 1.0,
            min_threshold: 0.01,
            max_threshold: 0.5,
            update_frequency: UpdateFrequency::Daily,
            last_calculated: None,
            last_updated: None,
        }
    }
}

/// Partial update to a threshold config
#[derive(Debug, Clone, Default)]
pub struct ThresholdConfigUpdate {
    pub enabled: Option<bool>,
    pub algorithm: Option<ThresholdAlgorithm>,
    pub window_size: Option<usize>,
    pub sensitivity_factor: Option<f64>,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub update_frequency: Option<UpdateFrequency>,
}

/// Most recent calculation output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedThresholds {
    pub accuracy_drop: f64,
    pub feature_drift: f64,
    pub prediction_drift: f64,
    /// How much of the configured window was available, capped at 1.0
    pub confidence: f64,
    pub data_points: usize,
    pub calculated_at: DateTime<Utc>,
}

/// One historical observation of the three drift metrics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftMetricPoint {
    pub accuracy_drop: f64,
    pub feature_drift: f64,
    pub prediction_drift: f64,
}

impl DriftMetricPoint {
    fn from_sample(sample: &MetricsSample) -> Self {
        Self {
            accuracy_drop: sample.accuracy_drop.unwrap_or(0.0),
            feature_drift: sample.feature_drift.unwrap_or(0.0),
            prediction_drift: sample.prediction_drift.unwrap_or(0.0),
        }
    }
}

/// Replay verdict for the current thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivenessReport {
    pub false_positive_rate: f64,
    pub false_negative_rate: f64,
    pub recommendation: String,
}

/// Suggested algorithm with its justification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmSuggestion {
    pub algorithm: ThresholdAlgorithm,
    pub reason: String,
}

/// Storage-backed wrapper around the threshold calculator.
pub struct ThresholdService {
    storage: Arc<dyn Storage>,
}

impl ThresholdService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Stored config for a model, or the fleet defaults when none exists.
    pub fn get_config(&self, model_id: i64) -> Result<ThresholdConfig> {
        Ok(self
            .storage
            .get_threshold_config(model_id)?
            .unwrap_or_else(|| ThresholdConfig::default_for(model_id)))
    }

    /// Validate and persist config changes.
    pub fn update_config(
        &self,
        model_id: i64,
        updates: ThresholdConfigUpdate,
    ) -> Result<ThresholdConfig> {
        let mut config = self.get_config(model_id)?;
        if let Some(v) = updates.enabled {
            config.enabled = v;
        }
        if let Some(v) = updates.algorithm {
            config.algorithm = v;
        }
        if let Some(v) = updates.window_size {
            config.window_size = v;
        }
        if let Some(v) = updates.sensitivity_factor {
            config.sensitivity_factor = v;
        }
        if let Some(v) = updates.min_threshold {
            config.min_threshold = v;
        }
        if let Some(v) = updates.max_threshold {
            config.max_threshold = v;
        }
        if let Some(v) = updates.update_frequency {
            config.update_frequency = v;
        }
        config.last_updated = Some(Utc::now());

        validate_config(&config)?;
        self.storage.upsert_threshold_config(config.clone())?;
        Ok(config)
    }

    /// Recalculate thresholds from the model's metric history and persist
    /// the result on the config.
    pub fn calculate(&self, model_id: i64) -> Result<CalculatedThresholds> {
        let mut config = self.get_config(model_id)?;
        let history = self.history(model_id, config.window_size)?;
        let thresholds = calculate_thresholds(&history, &config);

        config.last_calculated = Some(thresholds.clone());
        config.last_updated = Some(Utc::now());
        self.storage.upsert_threshold_config(config)?;

        Ok(thresholds)
    }

    /// Suggest an algorithm for the model's recent metric behavior.
    pub fn suggest(&self, model_id: i64) -> Result<AlgorithmSuggestion> {
        let history = self.history(model_id, 100)?;
        Ok(suggest_algorithm(&history))
    }

    /// Grade the most recently calculated thresholds against the model's
    /// recent history. Without a prior calculation this reports zero rates
    /// and asks for one.
    pub fn analyze(&self, model_id: i64) -> Result<EffectivenessReport> {
        let config = self.get_config(model_id)?;
        let Some(thresholds) = config.last_calculated else {
            return Ok(EffectivenessReport {
                false_positive_rate: 0.0,
                false_negative_rate: 0.0,
                recommendation: "No calculated thresholds yet. Run a calculation first."
                    .to_string(),
            });
        };
        let history = self.history(model_id, 100)?;
        Ok(analyze_effectiveness(&history, &thresholds))
    }

    /// Metric history as drift points, oldest first.
    fn history(&self, model_id: i64, limit: usize) -> Result<Vec<DriftMetricPoint>> {
        let mut samples = self.storage.recent_metrics(model_id, limit)?;
        samples.reverse();
        Ok(samples.iter().map(DriftMetricPoint::from_sample).collect())
    }
}
