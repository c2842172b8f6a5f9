//! Drift detection service

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ModelWatchError, Result};
use crate::stats;
use crate::storage::Storage;

use super::{
    ks_statistic, AlertFilter, AlertStatus, DashboardStats, DriftAlert, DriftConfig,
    DriftConfigInput, DriftConfigUpdate, DriftDetail, DriftSeverity, DriftType, FeatureSnapshot,
    MetricsInput, MetricsSample, TrendDirection,
};

/// Current observations for one model, as supplied by the serving layer
#[derive(Debug, Clone, Default)]
pub struct CurrentMetrics {
    /// Observed accuracy over the evaluation window
    pub accuracy: f64,
    /// Raw per-feature samples to compare against stored baselines
    pub features: HashMap<String, Vec<f64>>,
}

impl CurrentMetrics {
    pub fn accuracy_only(accuracy: f64) -> Self {
        Self {
            accuracy,
            features: HashMap::new(),
        }
    }
}

/// Outcome of a drift evaluation. Not persisted by itself; the orchestrator
/// turns reports into alerts so that ad-hoc detection stays side-effect free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub has_drift: bool,
    pub severity: DriftSeverity,
    pub drift_score: f64,
    pub drift_type: DriftType,
    pub details: Vec<DriftDetail>,
    pub recommendation: String,
}

impl DriftReport {
    /// Benign report used when a model has no drift configuration
    fn not_configured() -> Self {
        Self {
            has_drift: false,
            severity: DriftSeverity::Low,
            drift_score: 0.0,
            drift_type: DriftType::AccuracyDrop,
            details: Vec::new(),
            recommendation: "No drift monitoring configuration found for this model.".to_string(),
        }
    }
}

/// Compares live observations against the active version's baseline and
/// manages the drift alert lifecycle.
pub struct DriftDetector {
    storage: Arc<dyn Storage>,
}

impl DriftDetector {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    // ----- configuration -----

    /// Create a drift config for a model. Thresholds must lie in [0, 1].
    pub fn create_config(&self, input: DriftConfigInput) -> Result<DriftConfig> {
        let now = Utc::now();
        let config = DriftConfig {
            id: 0,
            model_id: input.model_id,
            is_enabled: true,
            accuracy_drop_threshold: input.accuracy_drop_threshold.unwrap_or(0.05),
            feature_drift_threshold: input.feature_drift_threshold.unwrap_or(0.1),
            prediction_drift_threshold: input.prediction_drift_threshold.unwrap_or(0.1),
            monitoring_window_hours: input.monitoring_window_hours.unwrap_or(24),
            alert_cooldown_minutes: input.alert_cooldown_minutes.unwrap_or(60),
            auto_rollback_enabled: input.auto_rollback_enabled.unwrap_or(false),
            auto_rollback_threshold: input.auto_rollback_threshold.unwrap_or(0.15),
            notify_owner: input.notify_owner.unwrap_or(true),
            notify_email: input.notify_email,
            created_at: now,
            updated_at: now,
        };
        validate_config(&config)?;
        self.storage.insert_drift_config(config)
    }

    /// Fetch the enabled config for a model; `None` means not monitored.
    pub fn get_config(&self, model_id: i64) -> Result<Option<DriftConfig>> {
        self.storage.get_drift_config(model_id)
    }

    /// Apply a partial update to an existing config.
    pub fn update_config(&self, config_id: i64, updates: DriftConfigUpdate) -> Result<DriftConfig> {
        let mut config = self
            .storage
            .get_drift_config_by_id(config_id)?
            .ok_or_else(|| ModelWatchError::not_found("drift config", config_id))?;

        if let Some(v) = updates.accuracy_drop_threshold {
            config.accuracy_drop_threshold = v;
        }
        if let Some(v) = updates.feature_drift_threshold {
            config.feature_drift_threshold = v;
        }
        if let Some(v) = updates.prediction_drift_threshold {
            config.prediction_drift_threshold = v;
        }
        if let Some(v) = updates.monitoring_window_hours {
            config.monitoring_window_hours = v;
        }
        if let Some(v) = updates.alert_cooldown_minutes {
            config.alert_cooldown_minutes = v;
        }
        if let Some(v) = updates.auto_rollback_enabled {
            config.auto_rollback_enabled = v;
        }
        if let Some(v) = updates.auto_rollback_threshold {
            config.auto_rollback_threshold = v;
        }
        if let Some(v) = updates.notify_owner {
            config.notify_owner = v;
        }
        if let Some(v) = updates.notify_email {
            config.notify_email = Some(v);
        }
        config.updated_at = Utc::now();

        validate_config(&config)?;
        self.storage.update_drift_config(&config)?;
        Ok(config)
    }

    // ----- detection -----

    /// Evaluate current observations against the model's baseline.
    ///
    /// A model without a drift config yields a benign no-drift report. The
    /// highest scoring metric decides the drift type and severity; severity
    /// escalates at 1x / 2x / 3x the accuracy-drop threshold.
    pub fn detect_drift(&self, model_id: i64, current: &CurrentMetrics) -> Result<DriftReport> {
        let Some(config) = self.storage.get_drift_config(model_id)? else {
            return Ok(DriftReport::not_configured());
        };

        let active = self.storage.get_active_version(model_id)?;
        let baseline_accuracy = active.and_then(|v| v.accuracy).unwrap_or(0.0);
        let threshold = config.accuracy_drop_threshold;

        let mut details = Vec::new();
        let mut max_score = 0.0_f64;
        let mut drift_type = DriftType::AccuracyDrop;

        if baseline_accuracy > 0.0 {
            let accuracy_drop = (baseline_accuracy - current.accuracy) / baseline_accuracy;
            details.push(DriftDetail {
                metric: "accuracy".to_string(),
                baseline_value: baseline_accuracy,
                current_value: current.accuracy,
                change_percent: accuracy_drop * 100.0,
                threshold: threshold * 100.0,
            });
            if accuracy_drop > max_score {
                max_score = accuracy_drop;
            }
        }

        // Deterministic feature ordering keeps detail rows stable across runs.
        let mut feature_names: Vec<&String> = current.features.keys().collect();
        feature_names.sort();

        for name in feature_names {
            let values = &current.features[name];
            let Some(baseline) = self.storage.latest_baseline_snapshot(model_id, name)? else {
                continue;
            };
            let current_stats = stats::compute(values);
            let score = ks_statistic(&baseline.stats.histogram, &current_stats.histogram);

            details.push(DriftDetail {
                metric: format!("feature:{}", name),
                baseline_value: baseline.stats.mean,
                current_value: current_stats.mean,
                change_percent: score * 100.0,
                threshold: config.feature_drift_threshold * 100.0,
            });

            if score > max_score {
                max_score = score;
                drift_type = DriftType::FeatureDrift;
            }
        }

        let severity = classify_severity(max_score, threshold);
        let has_drift = max_score > threshold;

        Ok(DriftReport {
            has_drift,
            severity,
            drift_score: max_score,
            drift_type,
            details,
            recommendation: recommendation_for(has_drift, severity).to_string(),
        })
    }

    // ----- alerts -----

    /// Persist an active alert from a drift report. Detection and alerting
    /// are decoupled so callers can probe without generating noise.
    pub fn create_alert(&self, model_id: i64, report: &DriftReport) -> Result<DriftAlert> {
        let alert = self.storage.insert_alert(DriftAlert {
            id: 0,
            model_id,
            drift_type: report.drift_type,
            severity: report.severity,
            drift_score: report.drift_score,
            details: report.details.clone(),
            recommendation: report.recommendation.clone(),
            status: AlertStatus::Active,
            acknowledged_at: None,
            resolved_at: None,
            resolution: None,
            created_at: Utc::now(),
        })?;
        info!(
            model_id,
            alert_id = alert.id,
            severity = %alert.severity,
            score = alert.drift_score,
            "drift alert created"
        );
        Ok(alert)
    }

    pub fn get_active_alerts(&self, model_id: Option<i64>) -> Result<Vec<DriftAlert>> {
        self.storage.active_alerts(model_id)
    }

    pub fn list_alerts(&self, filter: &AlertFilter) -> Result<(Vec<DriftAlert>, u64)> {
        self.storage.list_alerts(filter)
    }

    pub fn acknowledge_alert(&self, alert_id: i64) -> Result<DriftAlert> {
        let mut alert = self.fetch_alert(alert_id)?;
        if alert.status != AlertStatus::Active {
            return Err(ModelWatchError::Validation(format!(
                "alert {} is not active and cannot be acknowledged",
                alert_id
            )));
        }
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        self.storage.update_alert(&alert)?;
        Ok(alert)
    }

    pub fn resolve_alert(&self, alert_id: i64, resolution: &str) -> Result<DriftAlert> {
        let mut alert = self.fetch_alert(alert_id)?;
        ensure_open(&alert)?;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        alert.resolution = Some(resolution.to_string());
        self.storage.update_alert(&alert)?;
        Ok(alert)
    }

    pub fn ignore_alert(&self, alert_id: i64, reason: &str) -> Result<DriftAlert> {
        let mut alert = self.fetch_alert(alert_id)?;
        ensure_open(&alert)?;
        alert.status = AlertStatus::Ignored;
        alert.resolution = Some(reason.to_string());
        self.storage.update_alert(&alert)?;
        Ok(alert)
    }

    fn fetch_alert(&self, alert_id: i64) -> Result<DriftAlert> {
        self.storage
            .get_alert(alert_id)?
            .ok_or_else(|| ModelWatchError::not_found("drift alert", alert_id))
    }

    // ----- metrics history -----

    pub fn record_metrics(&self, model_id: i64, input: MetricsInput) -> Result<MetricsSample> {
        self.storage.insert_metrics_sample(MetricsSample {
            id: 0,
            model_id,
            accuracy: input.accuracy,
            precision: input.precision,
            recall: input.recall,
            f1_score: input.f1_score,
            prediction_count: input.prediction_count,
            accuracy_drop: None,
            feature_drift: None,
            prediction_drift: None,
            recorded_at: Utc::now(),
        })
    }

    /// Samples recorded within the trailing `hours`, oldest first.
    pub fn get_metrics_history(&self, model_id: i64, hours: u32) -> Result<Vec<MetricsSample>> {
        let since = Utc::now() - Duration::hours(hours as i64);
        self.storage.metrics_since(model_id, since)
    }

    // ----- feature statistics -----

    /// Compute and persist a feature statistics snapshot.
    pub fn save_feature_statistics(
        &self,
        model_id: i64,
        feature_name: &str,
        data: &[f64],
        is_baseline: bool,
    ) -> Result<FeatureSnapshot> {
        self.storage.insert_feature_snapshot(FeatureSnapshot {
            id: 0,
            model_id,
            feature_name: feature_name.to_string(),
            stats: stats::compute(data),
            is_baseline,
            created_at: Utc::now(),
        })
    }

    /// Latest baseline snapshot for a feature, if one has been recorded.
    pub fn get_baseline_stats(
        &self,
        model_id: i64,
        feature_name: &str,
    ) -> Result<Option<FeatureSnapshot>> {
        self.storage.latest_baseline_snapshot(model_id, feature_name)
    }

    // ----- dashboard -----

    /// Aggregate alert statistics, optionally scoped to one model.
    pub fn get_dashboard_stats(&self, model_id: Option<i64>) -> Result<DashboardStats> {
        let base = AlertFilter {
            model_id,
            ..AlertFilter::default()
        };
        let (_, total) = self.storage.list_alerts(&AlertFilter {
            limit: 1,
            ..base.clone()
        })?;
        let (_, active) = self.storage.list_alerts(&AlertFilter {
            status: Some(AlertStatus::Active),
            limit: 1,
            ..base.clone()
        })?;
        let (_, critical) = self.storage.list_alerts(&AlertFilter {
            severity: Some(DriftSeverity::Critical),
            limit: 1,
            ..base.clone()
        })?;

        let (recent, _) = self.storage.list_alerts(&AlertFilter {
            limit: 10,
            ..base
        })?;

        let avg_drift_score = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|a| a.drift_score).sum::<f64>() / recent.len() as f64
        };

        Ok(DashboardStats {
            total_alerts: total,
            active_alerts: active,
            critical_alerts: critical,
            avg_drift_score,
            recent_trend: score_trend(&recent),
        })
    }
}

fn validate_config(config: &DriftConfig) -> Result<()> {
    let bounded = [
        ("accuracy_drop_threshold", config.accuracy_drop_threshold),
        ("feature_drift_threshold", config.feature_drift_threshold),
        (
            "prediction_drift_threshold",
            config.prediction_drift_threshold,
        ),
        ("auto_rollback_threshold", config.auto_rollback_threshold),
    ];
    for (name, value) in bounded {
        if !(0.0..=1.0).contains(&value) {
            return Err(ModelWatchError::Validation(format!(
                "{} must be within [0, 1], got {}",
                name, value
            )));
        }
    }
    Ok(())
}

fn ensure_open(alert: &DriftAlert) -> Result<()> {
    match alert.status {
        AlertStatus::Active | AlertStatus::Acknowledged => Ok(()),
        AlertStatus::Resolved | AlertStatus::Ignored => Err(ModelWatchError::Validation(format!(
            "alert {} is already closed",
            alert.id
        ))),
    }
}

fn classify_severity(score: f64, threshold: f64) -> DriftSeverity {
    if score > threshold * 3.0 {
        DriftSeverity::Critical
    } else if score > threshold * 2.0 {
        DriftSeverity::High
    } else if score > threshold {
        DriftSeverity::Medium
    } else {
        DriftSeverity::Low
    }
}

fn recommendation_for(has_drift: bool, severity: DriftSeverity) -> &'static str {
    if !has_drift {
        return "Model performance is within acceptable thresholds.";
    }
    match severity {
        DriftSeverity::Critical => {
            "Critical drift detected. Immediate action required; consider rolling back to a previous model version."
        }
        DriftSeverity::High => {
            "Significant drift detected. Review recent data changes and consider retraining the model."
        }
        DriftSeverity::Medium => {
            "Moderate drift detected. Monitor closely and prepare for a model update."
        }
        DriftSeverity::Low => "Minor drift detected. Continue monitoring.",
    }
}

/// Classify the trend of recent alert scores: the newest three against the
/// three before them, with a 10% dead band.
fn score_trend(recent: &[DriftAlert]) -> TrendDirection {
    if recent.len() < 6 {
        return TrendDirection::Stable;
    }
    let newest: f64 = recent[..3].iter().map(|a| a.drift_score).sum::<f64>() / 3.0;
    let older: f64 = recent[3..6].iter().map(|a| a.drift_score).sum::<f64>() / 3.0;
    if newest < older * 0.9 {
        TrendDirection::Improving
    } else if newest > older * 1.1 {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}
