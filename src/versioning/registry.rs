//! Version registry service

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::drift::TrendDirection;
use crate::error::{ModelWatchError, Result};
use crate::storage::Storage;

use super::{
    ComparisonWinner, MetricComparison, ModelVersion, NewVersion, PerformanceTrend,
    RollbackRecord, RollbackStatus, RollbackType, SemanticVersion, TrendPoint, VersionComparison,
};

/// Differences smaller than this are treated as noise, not a win.
const COMPARISON_EPSILON: f64 = 0.0001;

/// Relative change (first to last version) below which a trend is flat.
const TREND_DEAD_BAND: f64 = 0.05;

/// Outcome of a completed rollback
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub record: RollbackRecord,
    pub to_version: ModelVersion,
}

/// Outcome of an automatic rollback probe
#[derive(Debug, Clone)]
pub struct AutoRollbackOutcome {
    pub rolled: bool,
    pub to_version: Option<ModelVersion>,
}

impl AutoRollbackOutcome {
    fn none() -> Self {
        Self {
            rolled: false,
            to_version: None,
        }
    }
}

/// Owns version creation, the single-active-version invariant, deployment,
/// rollback, and version comparison for every model in the fleet.
pub struct VersionRegistry {
    storage: Arc<dyn Storage>,
}

impl VersionRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Register a new version. The sequence number continues from the
    /// model's last version; new versions start inactive and
    /// rollback-eligible.
    pub fn create_version(&self, input: NewVersion) -> Result<ModelVersion> {
        self.storage
            .get_model(input.model_id)?
            .ok_or_else(|| ModelWatchError::not_found("model", input.model_id))?;

        let existing = self.storage.list_versions(input.model_id)?;
        let next_number = existing
            .iter()
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1;

        self.storage.insert_version(ModelVersion {
            id: 0,
            model_id: input.model_id,
            version: SemanticVersion::from_sequence(next_number).to_string(),
            version_number: next_number,
            accuracy: input.accuracy,
            precision: input.precision,
            recall: input.recall,
            f1_score: input.f1_score,
            mean_absolute_error: input.mean_absolute_error,
            root_mean_squared_error: input.root_mean_squared_error,
            training_data_size: input.training_data_size,
            validation_data_size: input.validation_data_size,
            hyperparameters: input.hyperparameters,
            feature_importance: input.feature_importance,
            is_active: false,
            is_rollback_target: true,
            deployed_at: None,
            retired_at: None,
            change_log: input.change_log,
            created_at: Utc::now(),
        })
    }

    pub fn get_version(&self, version_id: i64) -> Result<ModelVersion> {
        self.storage
            .get_version(version_id)?
            .ok_or_else(|| ModelWatchError::not_found("model version", version_id))
    }

    pub fn get_active_version(&self, model_id: i64) -> Result<Option<ModelVersion>> {
        self.storage.get_active_version(model_id)
    }

    /// All versions of a model, newest first. Retired versions are hidden
    /// unless `include_retired` is set.
    pub fn list_versions(&self, model_id: i64, include_retired: bool) -> Result<Vec<ModelVersion>> {
        let versions = self.storage.list_versions(model_id)?;
        Ok(versions
            .into_iter()
            .filter(|v| include_retired || v.is_rollback_target || v.is_active)
            .collect())
    }

    /// Activate a version, deactivating whichever version currently holds
    /// the slot. The deactivate-then-activate pair executes as one storage
    /// transaction so the single-active invariant is never observably
    /// violated.
    pub fn deploy_version(&self, version_id: i64) -> Result<ModelVersion> {
        let version = self.get_version(version_id)?;
        let deployed = self.storage.activate_version_exclusive(
            version.model_id,
            version_id,
            Utc::now(),
        )?;
        info!(
            model_id = deployed.model_id,
            version = %deployed.version,
            "version deployed"
        );
        Ok(deployed)
    }

    /// Roll a model back to an earlier version, leaving an audit record.
    ///
    /// The eligibility check happens before any write; a failure during the
    /// activation itself is captured on the record as `Failed` and then
    /// re-raised.
    pub fn rollback(
        &self,
        model_id: i64,
        to_version_id: i64,
        reason: &str,
        rollback_type: RollbackType,
    ) -> Result<RollbackOutcome> {
        let target = self.get_version(to_version_id)?;
        if target.model_id != model_id {
            return Err(ModelWatchError::Validation(format!(
                "version {} does not belong to model {}",
                to_version_id, model_id
            )));
        }
        if !target.is_rollback_target {
            return Err(ModelWatchError::Validation(format!(
                "version {} is retired and cannot be rolled back to",
                target.version
            )));
        }

        let from = self.storage.get_active_version(model_id)?;
        let mut record = self.storage.insert_rollback(RollbackRecord {
            id: 0,
            model_id,
            from_version_id: from.as_ref().map(|v| v.id),
            to_version_id,
            reason: reason.to_string(),
            rollback_type,
            status: RollbackStatus::InProgress,
            error_message: None,
            completed_at: None,
            created_at: Utc::now(),
        })?;

        match self
            .storage
            .activate_version_exclusive(model_id, to_version_id, Utc::now())
        {
            Ok(activated) => {
                record.status = RollbackStatus::Completed;
                record.completed_at = Some(Utc::now());
                self.storage.update_rollback(&record)?;
                info!(
                    model_id,
                    to_version = %activated.version,
                    ?rollback_type,
                    "rollback completed"
                );
                Ok(RollbackOutcome {
                    record,
                    to_version: activated,
                })
            }
            Err(e) => {
                record.status = RollbackStatus::Failed;
                record.error_message = Some(e.to_string());
                if let Err(update_err) = self.storage.update_rollback(&record) {
                    error!(
                        model_id,
                        rollback_id = record.id,
                        error = %update_err,
                        "failed to persist rollback failure state"
                    );
                }
                Err(ModelWatchError::Rollback(e.to_string()))
            }
        }
    }

    /// Roll back automatically when the accuracy drop exceeds `threshold`.
    ///
    /// A model with no active version or a zero baseline accuracy is left
    /// alone. The target is the most recent non-active rollback-eligible
    /// version by sequence number.
    pub fn auto_rollback_if_needed(
        &self,
        model_id: i64,
        current_accuracy: f64,
        threshold: f64,
    ) -> Result<AutoRollbackOutcome> {
        let Some(active) = self.storage.get_active_version(model_id)? else {
            return Ok(AutoRollbackOutcome::none());
        };
        let baseline = active.accuracy.unwrap_or(0.0);
        if baseline <= 0.0 {
            return Ok(AutoRollbackOutcome::none());
        }

        let drop = (baseline - current_accuracy) / baseline;
        if drop <= threshold {
            return Ok(AutoRollbackOutcome::none());
        }

        let candidate = self
            .storage
            .list_versions(model_id)?
            .into_iter()
            .filter(|v| !v.is_active && v.is_rollback_target)
            .max_by_key(|v| v.version_number);

        let Some(candidate) = candidate else {
            warn!(model_id, "accuracy drop exceeded threshold but no rollback candidate exists");
            return Ok(AutoRollbackOutcome::none());
        };

        let reason = format!(
            "Automatic rollback: accuracy drop {:.1}% exceeded threshold {:.1}%",
            drop * 100.0,
            threshold * 100.0
        );
        let outcome = self.rollback(model_id, candidate.id, &reason, RollbackType::Automatic)?;
        Ok(AutoRollbackOutcome {
            rolled: true,
            to_version: Some(outcome.to_version),
        })
    }

    /// Pairwise metric comparison between two versions. Higher wins for
    /// quality metrics, lower wins for error metrics; differences within
    /// epsilon count as ties so noise cannot decide a winner.
    pub fn compare_versions(&self, version_a_id: i64, version_b_id: i64) -> Result<VersionComparison> {
        let a = self.get_version(version_a_id)?;
        let b = self.get_version(version_b_id)?;

        let pairs: [(&str, Option<f64>, Option<f64>, bool); 6] = [
            ("accuracy", a.accuracy, b.accuracy, true),
            ("precision", a.precision, b.precision, true),
            ("recall", a.recall, b.recall, true),
            ("f1_score", a.f1_score, b.f1_score, true),
            (
                "mean_absolute_error",
                a.mean_absolute_error,
                b.mean_absolute_error,
                false,
            ),
            (
                "root_mean_squared_error",
                a.root_mean_squared_error,
                b.root_mean_squared_error,
                false,
            ),
        ];

        let mut metrics = Vec::with_capacity(pairs.len());
        let mut wins_a = 0usize;
        let mut wins_b = 0usize;

        for (name, value_a, value_b, higher_is_better) in pairs {
            let winner = match (value_a, value_b) {
                (Some(va), Some(vb)) if (va - vb).abs() > COMPARISON_EPSILON => {
                    let a_wins = (va > vb) == higher_is_better;
                    if a_wins {
                        wins_a += 1;
                        Some(ComparisonWinner::VersionA)
                    } else {
                        wins_b += 1;
                        Some(ComparisonWinner::VersionB)
                    }
                }
                _ => None,
            };
            metrics.push(MetricComparison {
                metric: name.to_string(),
                value_a,
                value_b,
                winner,
            });
        }

        let overall = match wins_a.cmp(&wins_b) {
            std::cmp::Ordering::Greater => ComparisonWinner::VersionA,
            std::cmp::Ordering::Less => ComparisonWinner::VersionB,
            std::cmp::Ordering::Equal => ComparisonWinner::Tie,
        };

        Ok(VersionComparison {
            version_a: a.version,
            version_b: b.version,
            metrics,
            overall,
        })
    }

    /// Retire a version from rollback eligibility. The active version
    /// cannot be retired.
    pub fn retire_version(&self, version_id: i64) -> Result<ModelVersion> {
        let mut version = self.get_version(version_id)?;
        if version.is_active {
            return Err(ModelWatchError::Validation(format!(
                "version {} is active and cannot be retired",
                version.version
            )));
        }
        version.is_rollback_target = false;
        version.retired_at = Some(Utc::now());
        self.storage.update_version(&version)?;
        Ok(version)
    }

    /// Restore a retired version to rollback eligibility.
    pub fn restore_version(&self, version_id: i64) -> Result<ModelVersion> {
        let mut version = self.get_version(version_id)?;
        version.is_rollback_target = true;
        version.retired_at = None;
        self.storage.update_version(&version)?;
        Ok(version)
    }

    pub fn get_rollback_history(
        &self,
        model_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<RollbackRecord>, u64)> {
        self.storage.list_rollbacks(model_id, limit, offset)
    }

    /// Metric trajectory across versions, oldest first, with a trend
    /// direction over a 5% dead band.
    pub fn get_performance_trend(&self, model_id: i64, metric: &str) -> Result<PerformanceTrend> {
        let lower_is_better = match metric {
            "accuracy" | "precision" | "recall" | "f1_score" => false,
            "mean_absolute_error" | "root_mean_squared_error" => true,
            other => {
                return Err(ModelWatchError::Validation(format!(
                    "unknown metric: {}",
                    other
                )))
            }
        };

        let mut versions = self.storage.list_versions(model_id)?;
        versions.sort_by_key(|v| v.version_number);

        let points: Vec<TrendPoint> = versions
            .iter()
            .map(|v| TrendPoint {
                version: v.version.clone(),
                version_number: v.version_number,
                value: metric_value(v, metric),
                is_active: v.is_active,
            })
            .collect();

        let values: Vec<f64> = points.iter().filter_map(|p| p.value).collect();
        let (direction, improvement_rate) = trend_of(&values, lower_is_better);

        Ok(PerformanceTrend {
            model_id,
            metric: metric.to_string(),
            points,
            direction,
            improvement_rate,
        })
    }
}

fn metric_value(version: &ModelVersion, metric: &str) -> Option<f64> {
    match metric {
        "accuracy" => version.accuracy,
        "precision" => version.precision,
        "recall" => version.recall,
        "f1_score" => version.f1_score,
        "mean_absolute_error" => version.mean_absolute_error,
        "root_mean_squared_error" => version.root_mean_squared_error,
        _ => None,
    }
}

fn trend_of(values: &[f64], lower_is_better: bool) -> (TrendDirection, f64) {
    if values.len() < 2 {
        return (TrendDirection::Stable, 0.0);
    }
    let first = values[0];
    let last = values[values.len() - 1];
    if first.abs() < f64::EPSILON {
        return (TrendDirection::Stable, 0.0);
    }

    // Positive improvement means the metric moved in its good direction.
    let improvement = if lower_is_better {
        (first - last) / first
    } else {
        (last - first) / first
    };

    let direction = if improvement > TREND_DEAD_BAND {
        TrendDirection::Improving
    } else if improvement < -TREND_DEAD_BAND {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };
    (direction, (improvement * 1000.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Model};

    fn setup() -> (Arc<MemoryStorage>, VersionRegistry, i64) {
        let storage = Arc::new(MemoryStorage::new());
        let model = storage
            .insert_model(Model {
                id: 0,
                name: "defect-classifier".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();
        let registry = VersionRegistry::new(storage.clone());
        (storage, registry, model.id)
    }

    fn version_with_accuracy(
        registry: &VersionRegistry,
        model_id: i64,
        accuracy: f64,
    ) -> ModelVersion {
        registry
            .create_version(NewVersion {
                model_id,
                accuracy: Some(accuracy),
                ..NewVersion::default()
            })
            .unwrap()
    }

    #[test]
    fn test_version_numbering_and_semantic_string() {
        let (_, registry, model_id) = setup();
        let v1 = version_with_accuracy(&registry, model_id, 0.8);
        let v2 = version_with_accuracy(&registry, model_id, 0.85);

        assert_eq!(v1.version_number, 1);
        assert_eq!(v1.version, "0.0.1");
        assert_eq!(v2.version_number, 2);
        assert_eq!(v2.version, "0.0.2");
        assert!(!v1.is_active);
        assert!(v1.is_rollback_target);
    }

    #[test]
    fn test_create_version_unknown_model() {
        let (_, registry, _) = setup();
        let err = registry
            .create_version(NewVersion {
                model_id: 999,
                ..NewVersion::default()
            })
            .unwrap_err();
        assert!(matches!(err, ModelWatchError::NotFound { .. }));
    }

    #[test]
    fn test_deploy_keeps_single_active() {
        let (storage, registry, model_id) = setup();
        let v1 = version_with_accuracy(&registry, model_id, 0.8);
        let v2 = version_with_accuracy(&registry, model_id, 0.85);

        registry.deploy_version(v1.id).unwrap();
        registry.deploy_version(v2.id).unwrap();

        let versions = storage.list_versions(model_id).unwrap();
        let active: Vec<_> = versions.iter().filter(|v| v.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, v2.id);
        assert!(active[0].deployed_at.is_some());
    }

    #[test]
    fn test_rollback_completes_and_records() {
        let (storage, registry, model_id) = setup();
        let v1 = version_with_accuracy(&registry, model_id, 0.8);
        let v2 = version_with_accuracy(&registry, model_id, 0.85);
        registry.deploy_version(v2.id).unwrap();

        let outcome = registry
            .rollback(model_id, v1.id, "accuracy regression", RollbackType::Manual)
            .unwrap();

        assert_eq!(outcome.record.status, RollbackStatus::Completed);
        assert_eq!(outcome.record.from_version_id, Some(v2.id));
        assert_eq!(outcome.to_version.id, v1.id);
        assert!(outcome.record.completed_at.is_some());

        let active = storage.get_active_version(model_id).unwrap().unwrap();
        assert_eq!(active.id, v1.id);
        let old = storage.get_version(v2.id).unwrap().unwrap();
        assert!(!old.is_active);
    }

    #[test]
    fn test_rollback_to_retired_version_rejected() {
        let (storage, registry, model_id) = setup();
        let v1 = version_with_accuracy(&registry, model_id, 0.8);
        let v2 = version_with_accuracy(&registry, model_id, 0.85);
        registry.deploy_version(v2.id).unwrap();
        registry.retire_version(v1.id).unwrap();

        let err = registry
            .rollback(model_id, v1.id, "try anyway", RollbackType::Manual)
            .unwrap_err();
        assert!(matches!(err, ModelWatchError::Validation(_)));

        // nothing mutated
        let active = storage.get_active_version(model_id).unwrap().unwrap();
        assert_eq!(active.id, v2.id);
        let (records, total) = registry.get_rollback_history(model_id, 50, 0).unwrap();
        assert!(records.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_auto_rollback_triggers_on_threshold() {
        let (_, registry, model_id) = setup();
        let v1 = version_with_accuracy(&registry, model_id, 0.88);
        let v2 = version_with_accuracy(&registry, model_id, 0.90);
        registry.deploy_version(v2.id).unwrap();

        // drop = (0.90 - 0.70) / 0.90 ~ 0.22 > 0.15
        let outcome = registry
            .auto_rollback_if_needed(model_id, 0.70, 0.15)
            .unwrap();
        assert!(outcome.rolled);
        assert_eq!(outcome.to_version.unwrap().id, v1.id);
    }

    #[test]
    fn test_auto_rollback_noop_below_threshold() {
        let (_, registry, model_id) = setup();
        let _v1 = version_with_accuracy(&registry, model_id, 0.88);
        let v2 = version_with_accuracy(&registry, model_id, 0.90);
        registry.deploy_version(v2.id).unwrap();

        let outcome = registry
            .auto_rollback_if_needed(model_id, 0.88, 0.15)
            .unwrap();
        assert!(!outcome.rolled);
        assert!(outcome.to_version.is_none());
    }

    #[test]
    fn test_auto_rollback_noop_without_active_version() {
        let (_, registry, model_id) = setup();
        let outcome = registry
            .auto_rollback_if_needed(model_id, 0.5, 0.1)
            .unwrap();
        assert!(!outcome.rolled);
    }

    #[test]
    fn test_compare_versions_majority_wins() {
        let (_, registry, model_id) = setup();
        let a = registry
            .create_version(NewVersion {
                model_id,
                accuracy: Some(0.90),
                precision: Some(0.88),
                mean_absolute_error: Some(0.10),
                ..NewVersion::default()
            })
            .unwrap();
        let b = registry
            .create_version(NewVersion {
                model_id,
                accuracy: Some(0.85),
                precision: Some(0.86),
                mean_absolute_error: Some(0.20),
                ..NewVersion::default()
            })
            .unwrap();

        let comparison = registry.compare_versions(a.id, b.id).unwrap();
        assert_eq!(comparison.overall, ComparisonWinner::VersionA);
        let mae = comparison
            .metrics
            .iter()
            .find(|m| m.metric == "mean_absolute_error")
            .unwrap();
        assert_eq!(mae.winner, Some(ComparisonWinner::VersionA));
    }

    #[test]
    fn test_compare_versions_epsilon_tie() {
        let (_, registry, model_id) = setup();
        let a = version_with_accuracy(&registry, model_id, 0.90000);
        let b = version_with_accuracy(&registry, model_id, 0.90005);

        let comparison = registry.compare_versions(a.id, b.id).unwrap();
        assert_eq!(comparison.overall, ComparisonWinner::Tie);
        assert!(comparison.metrics.iter().all(|m| m.winner.is_none()));
    }

    #[test]
    fn test_retire_active_version_rejected() {
        let (_, registry, model_id) = setup();
        let v1 = version_with_accuracy(&registry, model_id, 0.8);
        registry.deploy_version(v1.id).unwrap();

        let err = registry.retire_version(v1.id).unwrap_err();
        assert!(matches!(err, ModelWatchError::Validation(_)));
    }

    #[test]
    fn test_retire_and_restore() {
        let (_, registry, model_id) = setup();
        let v1 = version_with_accuracy(&registry, model_id, 0.8);

        let retired = registry.retire_version(v1.id).unwrap();
        assert!(!retired.is_rollback_target);
        assert!(retired.retired_at.is_some());
        assert!(registry.list_versions(model_id, false).unwrap().is_empty());
        assert_eq!(registry.list_versions(model_id, true).unwrap().len(), 1);

        let restored = registry.restore_version(v1.id).unwrap();
        assert!(restored.is_rollback_target);
        assert!(restored.retired_at.is_none());
    }

    #[test]
    fn test_performance_trend_improving() {
        let (_, registry, model_id) = setup();
        for accuracy in [0.70, 0.78, 0.86] {
            version_with_accuracy(&registry, model_id, accuracy);
        }

        let trend = registry.get_performance_trend(model_id, "accuracy").unwrap();
        assert_eq!(trend.points.len(), 3);
        assert_eq!(trend.direction, TrendDirection::Improving);
        assert!(trend.improvement_rate > 0.0);
    }

    #[test]
    fn test_performance_trend_unknown_metric() {
        let (_, registry, model_id) = setup();
        assert!(registry.get_performance_trend(model_id, "latency").is_err());
    }
}
