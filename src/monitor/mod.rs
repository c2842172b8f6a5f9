//! Monitoring orchestration
//!
//! Periodic batch driver: for every model with drift monitoring enabled it
//! evaluates the recent metric window, enforces alert cooldown, triggers
//! automatic rollback where configured, and fans the results out to the
//! notification collaborator.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::drift::{CurrentMetrics, DriftConfig, DriftDetector, DriftSeverity, MetricsSample};
use crate::error::{ModelWatchError, Result};
use crate::notify::{self, Notifier};
use crate::storage::{Model, Storage};
use crate::versioning::VersionRegistry;

/// How far back the per-model metric window reaches
const WINDOW_HOURS: i64 = 24;

/// At most this many recent samples are averaged per check
const WINDOW_SAMPLES: usize = 10;

/// Result of checking one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheckOutcome {
    pub model_id: i64,
    pub model_name: String,
    /// False when the model could not be evaluated (for example, no recent
    /// metrics); `error` then explains why. Not an exception.
    pub checked: bool,
    pub drift_detected: bool,
    pub severity: Option<DriftSeverity>,
    pub alert_id: Option<i64>,
    /// Drift was detected but a recent active alert suppressed a duplicate
    pub suppressed_by_cooldown: bool,
    pub rollback_performed: bool,
    pub rollback_version: Option<String>,
    pub error: Option<String>,
}

impl ModelCheckOutcome {
    fn skipped(model: &Model, reason: String) -> Self {
        Self {
            model_id: model.id,
            model_name: model.name.clone(),
            checked: false,
            drift_detected: false,
            severity: None,
            alert_id: None,
            suppressed_by_cooldown: false,
            rollback_performed: false,
            rollback_version: None,
            error: Some(reason),
        }
    }

    fn checked(model: &Model) -> Self {
        Self {
            model_id: model.id,
            model_name: model.name.clone(),
            checked: true,
            drift_detected: false,
            severity: None,
            alert_id: None,
            suppressed_by_cooldown: false,
            rollback_performed: false,
            rollback_version: None,
            error: None,
        }
    }
}

/// Alert counts per severity for one run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl SeverityCounts {
    fn bump(&mut self, severity: DriftSeverity) {
        match severity {
            DriftSeverity::Low => self.low += 1,
            DriftSeverity::Medium => self.medium += 1,
            DriftSeverity::High => self.high += 1,
            DriftSeverity::Critical => self.critical += 1,
        }
    }
}

/// Aggregate result of one monitoring sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub models_checked: usize,
    pub alerts_created: usize,
    pub alerts_by_severity: SeverityCounts,
    pub rollbacks_performed: usize,
    pub notification_failures: usize,
    pub errors: Vec<String>,
    pub outcomes: Vec<ModelCheckOutcome>,
}

/// Drives the periodic health check across the fleet.
///
/// The per-model loop is sequential: each model's cooldown and rollback
/// state is read and written before the next model is considered. The
/// cooldown test itself is a read-then-write without a lock, matching the
/// storage collaborator's contract; two concurrent sweeps over the same
/// model could race past it and double-alert.
pub struct MonitoringOrchestrator {
    storage: Arc<dyn Storage>,
    detector: DriftDetector,
    registry: VersionRegistry,
    notifier: Arc<dyn Notifier>,
    last_summary: RwLock<Option<CheckSummary>>,
}

impl MonitoringOrchestrator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            detector: DriftDetector::new(storage.clone()),
            registry: VersionRegistry::new(storage.clone()),
            notifier: Arc::new(notify::LogNotifier),
            storage,
            last_summary: RwLock::new(None),
        }
    }

    /// Replace the notification transport (defaults to log-only delivery).
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Every model with an enabled drift config, paired with that config.
    pub fn models_with_config(&self) -> Result<Vec<(Model, DriftConfig)>> {
        let configs = self.storage.list_enabled_drift_configs()?;
        let mut models = Vec::with_capacity(configs.len());
        for config in configs {
            match self.storage.get_model(config.model_id)? {
                Some(model) => models.push((model, config)),
                None => warn!(
                    model_id = config.model_id,
                    "drift config references a missing model"
                ),
            }
        }
        Ok(models)
    }

    /// Run one full monitoring sweep and hand the results to the
    /// notification collaborator. Notification failures are counted but
    /// never fail the run.
    pub fn run_check(&self) -> Result<CheckSummary> {
        let started_at = Utc::now();
        let mut outcomes = Vec::new();

        for (model, config) in self.models_with_config()? {
            outcomes.push(self.check_model(&model, &config)?);
        }

        let mut summary = CheckSummary {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            models_checked: outcomes.iter().filter(|o| o.checked).count(),
            alerts_created: 0,
            alerts_by_severity: SeverityCounts::default(),
            rollbacks_performed: outcomes.iter().filter(|o| o.rollback_performed).count(),
            notification_failures: 0,
            errors: outcomes.iter().filter_map(|o| o.error.clone()).collect(),
            outcomes,
        };

        self.dispatch_notifications(&mut summary)?;
        summary.finished_at = Utc::now();

        info!(
            run_id = %summary.run_id,
            models_checked = summary.models_checked,
            alerts = summary.alerts_created,
            rollbacks = summary.rollbacks_performed,
            "monitoring sweep finished"
        );
        *self.last_summary.write() = Some(summary.clone());
        Ok(summary)
    }

    /// Check a single model on demand. A model without an enabled config is
    /// reported as unchecked rather than an error.
    pub fn run_model_check(&self, model_id: i64) -> Result<ModelCheckOutcome> {
        let model = self
            .storage
            .get_model(model_id)?
            .ok_or_else(|| ModelWatchError::not_found("model", model_id))?;
        match self.storage.get_drift_config(model_id)? {
            Some(config) => self.check_model(&model, &config),
            None => Ok(ModelCheckOutcome::skipped(
                &model,
                "Drift monitoring is not configured for this model.".to_string(),
            )),
        }
    }

    /// Summary of the most recent sweep in this process, if any.
    pub fn last_check_summary(&self) -> Option<CheckSummary> {
        self.last_summary.read().clone()
    }

    fn check_model(&self, model: &Model, config: &DriftConfig) -> Result<ModelCheckOutcome> {
        let since = Utc::now() - Duration::hours(WINDOW_HOURS);
        let samples = self.storage.metrics_since(model.id, since)?;
        let window: Vec<&MetricsSample> = samples.iter().rev().take(WINDOW_SAMPLES).collect();

        if window.is_empty() {
            return Ok(ModelCheckOutcome::skipped(
                model,
                format!(
                    "No metrics recorded for model {} in the last {} hours.",
                    model.name, WINDOW_HOURS
                ),
            ));
        }

        let mean_accuracy =
            window.iter().map(|s| s.accuracy).sum::<f64>() / window.len() as f64;
        let report = self
            .detector
            .detect_drift(model.id, &CurrentMetrics::accuracy_only(mean_accuracy))?;

        // The evaluated window flows back into history so the threshold
        // calculator sees the computed drift scores.
        let accuracy_drop = report
            .details
            .iter()
            .find(|d| d.metric == "accuracy")
            .map(|d| d.change_percent / 100.0);
        self.storage.insert_metrics_sample(MetricsSample {
            id: 0,
            model_id: model.id,
            accuracy: mean_accuracy,
            precision: None,
            recall: None,
            f1_score: None,
            prediction_count: 1,
            accuracy_drop,
            feature_drift: None,
            prediction_drift: None,
            recorded_at: Utc::now(),
        })?;

        let mut outcome = ModelCheckOutcome::checked(model);
        outcome.severity = Some(report.severity);

        if !report.has_drift {
            return Ok(outcome);
        }
        outcome.drift_detected = true;

        // Cooldown: an active alert younger than the window suppresses a
        // duplicate, but the drift itself is still reported.
        let cooldown_cutoff = Utc::now() - Duration::minutes(config.alert_cooldown_minutes as i64);
        let recent_alert = self
            .storage
            .active_alerts(Some(model.id))?
            .iter()
            .any(|a| a.created_at > cooldown_cutoff);
        if recent_alert {
            outcome.suppressed_by_cooldown = true;
            return Ok(outcome);
        }

        let alert = self.detector.create_alert(model.id, &report)?;
        outcome.alert_id = Some(alert.id);

        if config.auto_rollback_enabled && report.severity == DriftSeverity::Critical {
            match self.registry.auto_rollback_if_needed(
                model.id,
                mean_accuracy,
                config.auto_rollback_threshold,
            ) {
                Ok(result) if result.rolled => {
                    let version = result
                        .to_version
                        .map(|v| v.version)
                        .unwrap_or_default();
                    self.detector.resolve_alert(
                        alert.id,
                        &format!("Automatic rollback to version {} completed.", version),
                    )?;
                    outcome.rollback_performed = true;
                    outcome.rollback_version = Some(version);
                }
                Ok(_) => {}
                // A failed rollback is already captured on its audit record;
                // the sweep moves on to the remaining models.
                Err(e @ ModelWatchError::Rollback(_)) => {
                    warn!(model_id = model.id, error = %e, "automatic rollback failed");
                    outcome.error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    fn dispatch_notifications(&self, summary: &mut CheckSummary) -> Result<()> {
        let mut critical_models = Vec::new();

        let outcomes = summary.outcomes.clone();
        for outcome in &outcomes {
            let Some(alert_id) = outcome.alert_id else {
                continue;
            };
            let Some(alert) = self.storage.get_alert(alert_id)? else {
                continue;
            };
            summary.alerts_created += 1;
            summary.alerts_by_severity.bump(alert.severity);

            if alert.severity >= DriftSeverity::High {
                let payload = notify::drift_alert(outcome.model_id, &outcome.model_name, &alert);
                if !notify::send_best_effort(self.notifier.as_ref(), &payload) {
                    summary.notification_failures += 1;
                }
            }
            if alert.severity == DriftSeverity::Critical {
                critical_models.push(outcome.model_name.clone());
            }
        }

        if summary.alerts_created > 0 {
            let payload = notify::run_summary(
                summary.models_checked,
                summary.alerts_created,
                summary.alerts_by_severity.critical,
                summary.rollbacks_performed,
                summary.errors.len(),
            );
            if !notify::send_best_effort(self.notifier.as_ref(), &payload) {
                summary.notification_failures += 1;
            }
        }

        if !critical_models.is_empty() {
            let payload = notify::owner_escalation(&critical_models);
            if !notify::send_best_effort(self.notifier.as_ref(), &payload) {
                summary.notification_failures += 1;
            }
        }

        Ok(())
    }
}
