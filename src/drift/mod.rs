//! Drift detection
//!
//! Detects accuracy and feature-distribution drift against a recorded
//! baseline, classifies severity, and manages the resulting alerts.

mod detector;

pub use detector::{CurrentMetrics, DriftDetector, DriftReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::{FeatureStats, HistogramBin};

/// Ordinal drift severity, classified against multiples of the configured
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftSeverity::Low => "low",
            DriftSeverity::Medium => "medium",
            DriftSeverity::High => "high",
            DriftSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Kind of drift that produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    AccuracyDrop,
    FeatureDrift,
    PredictionDrift,
    DataQuality,
}

impl std::fmt::Display for DriftType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriftType::AccuracyDrop => "accuracy_drop",
            DriftType::FeatureDrift => "feature_drift",
            DriftType::PredictionDrift => "prediction_drift",
            DriftType::DataQuality => "data_quality",
        };
        f.write_str(s)
    }
}

/// Alert lifecycle state. Resolved and Ignored are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Ignored,
}

/// Per-model drift monitoring configuration. At most one enabled config per
/// model; a missing config means "not monitored", never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    pub id: i64,
    pub model_id: i64,
    pub is_enabled: bool,
    pub accuracy_drop_threshold: f64,
    pub feature_drift_threshold: f64,
    pub prediction_drift_threshold: f64,
    pub monitoring_window_hours: u32,
    pub alert_cooldown_minutes: u32,
    pub auto_rollback_enabled: bool,
    pub auto_rollback_threshold: f64,
    pub notify_owner: bool,
    pub notify_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a drift config. Unset fields take the defaults the
/// fleet has been tuned around.
#[derive(Debug, Clone, Default)]
pub struct DriftConfigInput {
    pub model_id: i64,
    pub accuracy_drop_threshold: Option<f64>,
    pub feature_drift_threshold: Option<f64>,
    pub prediction_drift_threshold: Option<f64>,
    pub monitoring_window_hours: Option<u32>,
    pub alert_cooldown_minutes: Option<u32>,
    pub auto_rollback_enabled: Option<bool>,
    pub auto_rollback_threshold: Option<f64>,
    pub notify_owner: Option<bool>,
    pub notify_email: Option<String>,
}

/// Partial update for an existing drift config
#[derive(Debug, Clone, Default)]
pub struct DriftConfigUpdate {
    pub accuracy_drop_threshold: Option<f64>,
    pub feature_drift_threshold: Option<f64>,
    pub prediction_drift_threshold: Option<f64>,
    pub monitoring_window_hours: Option<u32>,
    pub alert_cooldown_minutes: Option<u32>,
    pub auto_rollback_enabled: Option<bool>,
    pub auto_rollback_threshold: Option<f64>,
    pub notify_owner: Option<bool>,
    pub notify_email: Option<String>,
}

/// One row of the per-metric drift breakdown attached to a report or alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftDetail {
    pub metric: String,
    pub baseline_value: f64,
    pub current_value: f64,
    pub change_percent: f64,
    pub threshold: f64,
}

/// A persisted drift alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftAlert {
    pub id: i64,
    pub model_id: i64,
    pub drift_type: DriftType,
    pub severity: DriftSeverity,
    pub drift_score: f64,
    pub details: Vec<DriftDetail>,
    pub recommendation: String,
    pub status: AlertStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for alert listing
#[derive(Debug, Clone)]
pub struct AlertFilter {
    pub model_id: Option<i64>,
    pub status: Option<AlertStatus>,
    pub severity: Option<DriftSeverity>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            model_id: None,
            status: None,
            severity: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// A periodic accuracy sample for one model.
///
/// The three drift columns are filled in by the monitoring check when it
/// evaluates the window; caller-recorded samples usually leave them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub id: i64,
    pub model_id: i64,
    pub accuracy: f64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub prediction_count: u64,
    pub accuracy_drop: Option<f64>,
    pub feature_drift: Option<f64>,
    pub prediction_drift: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Input for recording a metrics sample
#[derive(Debug, Clone, Default)]
pub struct MetricsInput {
    pub accuracy: f64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub prediction_count: u64,
}

/// A persisted per-feature statistics snapshot, optionally marked as the
/// baseline drift comparisons run against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub id: i64,
    pub model_id: i64,
    pub feature_name: String,
    pub stats: FeatureStats,
    pub is_baseline: bool,
    pub created_at: DateTime<Utc>,
}

/// Direction of the recent alert-score trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

/// Aggregate alert statistics for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_alerts: u64,
    pub active_alerts: u64,
    pub critical_alerts: u64,
    pub avg_drift_score: f64,
    pub recent_trend: TrendDirection,
}

/// Kolmogorov-Smirnov style statistic between two binned distributions.
///
/// Aligns the union of bin centers in ascending order, accumulates each
/// side's normalized cumulative counts, and returns the maximum absolute
/// difference between the cumulative fractions. A bin missing on one side
/// contributes zero count for that side. Either side empty (or with zero
/// total count) yields 0.0 rather than an error, since an absent histogram
/// means "no baseline yet".
pub fn ks_statistic(baseline: &[HistogramBin], current: &[HistogramBin]) -> f64 {
    if baseline.is_empty() || current.is_empty() {
        return 0.0;
    }

    let baseline_total: u64 = baseline.iter().map(|b| b.count).sum();
    let current_total: u64 = current.iter().map(|b| b.count).sum();
    if baseline_total == 0 || current_total == 0 {
        return 0.0;
    }

    let mut centers: Vec<f64> = baseline
        .iter()
        .chain(current.iter())
        .map(|b| b.bin)
        .collect();
    centers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    centers.dedup();

    let count_at = |bins: &[HistogramBin], center: f64| -> u64 {
        bins.iter()
            .find(|b| b.bin == center)
            .map(|b| b.count)
            .unwrap_or(0)
    };

    let mut baseline_cum = 0.0;
    let mut current_cum = 0.0;
    let mut max_diff: f64 = 0.0;

    for &center in &centers {
        baseline_cum += count_at(baseline, center) as f64 / baseline_total as f64;
        current_cum += count_at(current, center) as f64 / current_total as f64;
        max_diff = max_diff.max((baseline_cum - current_cum).abs());
    }

    max_diff
}
