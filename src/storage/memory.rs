//! In-memory storage backend
//!
//! Reference [`Storage`] implementation used by the test suites and by
//! single-process deployments that do not need durability. Ids are assigned
//! from one shared counter, mirroring the relational backend's
//! autoincrement columns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::abtest::{AbTest, AbTestResult, TestStatus, Variant};
use crate::drift::{AlertFilter, AlertStatus, DriftAlert, DriftConfig, FeatureSnapshot, MetricsSample};
use crate::error::{ModelWatchError, Result};
use crate::thresholds::ThresholdConfig;
use crate::versioning::{ModelVersion, RollbackRecord};

use super::{Model, Storage};

#[derive(Default)]
pub struct MemoryStorage {
    next_id: AtomicI64,
    models: RwLock<Vec<Model>>,
    versions: RwLock<Vec<ModelVersion>>,
    rollbacks: RwLock<Vec<RollbackRecord>>,
    drift_configs: RwLock<Vec<DriftConfig>>,
    snapshots: RwLock<Vec<FeatureSnapshot>>,
    alerts: RwLock<Vec<DriftAlert>>,
    samples: RwLock<Vec<MetricsSample>>,
    tests: RwLock<Vec<AbTest>>,
    results: RwLock<Vec<AbTestResult>>,
    threshold_configs: RwLock<HashMap<i64, ThresholdConfig>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn paginate<T: Clone>(rows: Vec<T>, limit: usize, offset: usize) -> (Vec<T>, u64) {
    let total = rows.len() as u64;
    let page = rows.into_iter().skip(offset).take(limit).collect();
    (page, total)
}

impl Storage for MemoryStorage {
    // ----- models -----

    fn insert_model(&self, mut model: Model) -> Result<Model> {
        model.id = self.next_id();
        self.models.write().push(model.clone());
        Ok(model)
    }

    fn get_model(&self, model_id: i64) -> Result<Option<Model>> {
        Ok(self.models.read().iter().find(|m| m.id == model_id).cloned())
    }

    fn list_models(&self) -> Result<Vec<Model>> {
        Ok(self.models.read().clone())
    }

    // ----- model versions -----

    fn insert_version(&self, mut version: ModelVersion) -> Result<ModelVersion> {
        version.id = self.next_id();
        self.versions.write().push(version.clone());
        Ok(version)
    }

    fn get_version(&self, version_id: i64) -> Result<Option<ModelVersion>> {
        Ok(self
            .versions
            .read()
            .iter()
            .find(|v| v.id == version_id)
            .cloned())
    }

    fn update_version(&self, version: &ModelVersion) -> Result<()> {
        let mut versions = self.versions.write();
        let slot = versions
            .iter_mut()
            .find(|v| v.id == version.id)
            .ok_or_else(|| ModelWatchError::not_found("model version", version.id))?;
        *slot = version.clone();
        Ok(())
    }

    fn list_versions(&self, model_id: i64) -> Result<Vec<ModelVersion>> {
        let mut rows: Vec<ModelVersion> = self
            .versions
            .read()
            .iter()
            .filter(|v| v.model_id == model_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(rows)
    }

    fn get_active_version(&self, model_id: i64) -> Result<Option<ModelVersion>> {
        Ok(self
            .versions
            .read()
            .iter()
            .find(|v| v.model_id == model_id && v.is_active)
            .cloned())
    }

    fn activate_version_exclusive(
        &self,
        model_id: i64,
        version_id: i64,
        deployed_at: DateTime<Utc>,
    ) -> Result<ModelVersion> {
        // Single write lock spans the deactivate-then-activate pair.
        let mut versions = self.versions.write();
        let target_idx = versions
            .iter()
            .position(|v| v.id == version_id && v.model_id == model_id)
            .ok_or_else(|| ModelWatchError::not_found("model version", version_id))?;

        for version in versions.iter_mut().filter(|v| v.model_id == model_id) {
            version.is_active = false;
        }
        let target = &mut versions[target_idx];
        target.is_active = true;
        target.deployed_at = Some(deployed_at);
        Ok(target.clone())
    }

    // ----- rollback records -----

    fn insert_rollback(&self, mut record: RollbackRecord) -> Result<RollbackRecord> {
        record.id = self.next_id();
        self.rollbacks.write().push(record.clone());
        Ok(record)
    }

    fn update_rollback(&self, record: &RollbackRecord) -> Result<()> {
        let mut rollbacks = self.rollbacks.write();
        let slot = rollbacks
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| ModelWatchError::not_found("rollback record", record.id))?;
        *slot = record.clone();
        Ok(())
    }

    fn list_rollbacks(
        &self,
        model_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<RollbackRecord>, u64)> {
        let mut rows: Vec<RollbackRecord> = self
            .rollbacks
            .read()
            .iter()
            .filter(|r| r.model_id == model_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(paginate(rows, limit, offset))
    }

    // ----- drift configs -----

    fn insert_drift_config(&self, mut config: DriftConfig) -> Result<DriftConfig> {
        config.id = self.next_id();
        self.drift_configs.write().push(config.clone());
        Ok(config)
    }

    fn get_drift_config(&self, model_id: i64) -> Result<Option<DriftConfig>> {
        Ok(self
            .drift_configs
            .read()
            .iter()
            .find(|c| c.model_id == model_id && c.is_enabled)
            .cloned())
    }

    fn get_drift_config_by_id(&self, config_id: i64) -> Result<Option<DriftConfig>> {
        Ok(self
            .drift_configs
            .read()
            .iter()
            .find(|c| c.id == config_id)
            .cloned())
    }

    fn update_drift_config(&self, config: &DriftConfig) -> Result<()> {
        let mut configs = self.drift_configs.write();
        let slot = configs
            .iter_mut()
            .find(|c| c.id == config.id)
            .ok_or_else(|| ModelWatchError::not_found("drift config", config.id))?;
        *slot = config.clone();
        Ok(())
    }

    fn list_enabled_drift_configs(&self) -> Result<Vec<DriftConfig>> {
        Ok(self
            .drift_configs
            .read()
            .iter()
            .filter(|c| c.is_enabled)
            .cloned()
            .collect())
    }

    // ----- feature snapshots -----

    fn insert_feature_snapshot(&self, mut snapshot: FeatureSnapshot) -> Result<FeatureSnapshot> {
        snapshot.id = self.next_id();
        self.snapshots.write().push(snapshot.clone());
        Ok(snapshot)
    }

    fn latest_baseline_snapshot(
        &self,
        model_id: i64,
        feature_name: &str,
    ) -> Result<Option<FeatureSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .iter()
            .filter(|s| s.model_id == model_id && s.feature_name == feature_name && s.is_baseline)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    // ----- drift alerts -----

    fn insert_alert(&self, mut alert: DriftAlert) -> Result<DriftAlert> {
        alert.id = self.next_id();
        self.alerts.write().push(alert.clone());
        Ok(alert)
    }

    fn get_alert(&self, alert_id: i64) -> Result<Option<DriftAlert>> {
        Ok(self.alerts.read().iter().find(|a| a.id == alert_id).cloned())
    }

    fn update_alert(&self, alert: &DriftAlert) -> Result<()> {
        let mut alerts = self.alerts.write();
        let slot = alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or_else(|| ModelWatchError::not_found("drift alert", alert.id))?;
        *slot = alert.clone();
        Ok(())
    }

    fn active_alerts(&self, model_id: Option<i64>) -> Result<Vec<DriftAlert>> {
        let mut rows: Vec<DriftAlert> = self
            .alerts
            .read()
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .filter(|a| model_id.map(|id| a.model_id == id).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    fn list_alerts(&self, filter: &AlertFilter) -> Result<(Vec<DriftAlert>, u64)> {
        let mut rows: Vec<DriftAlert> = self
            .alerts
            .read()
            .iter()
            .filter(|a| filter.model_id.map(|id| a.model_id == id).unwrap_or(true))
            .filter(|a| filter.status.map(|s| a.status == s).unwrap_or(true))
            .filter(|a| filter.severity.map(|s| a.severity == s).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(paginate(rows, filter.limit, filter.offset))
    }

    // ----- metrics samples -----

    fn insert_metrics_sample(&self, mut sample: MetricsSample) -> Result<MetricsSample> {
        sample.id = self.next_id();
        self.samples.write().push(sample.clone());
        Ok(sample)
    }

    fn metrics_since(&self, model_id: i64, since: DateTime<Utc>) -> Result<Vec<MetricsSample>> {
        let mut rows: Vec<MetricsSample> = self
            .samples
            .read()
            .iter()
            .filter(|s| s.model_id == model_id && s.recorded_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.recorded_at, a.id).cmp(&(b.recorded_at, b.id)));
        Ok(rows)
    }

    fn recent_metrics(&self, model_id: i64, limit: usize) -> Result<Vec<MetricsSample>> {
        let mut rows: Vec<MetricsSample> = self
            .samples
            .read()
            .iter()
            .filter(|s| s.model_id == model_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.recorded_at, b.id).cmp(&(a.recorded_at, a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    // ----- A/B tests -----

    fn insert_test(&self, mut test: AbTest) -> Result<AbTest> {
        test.id = self.next_id();
        self.tests.write().push(test.clone());
        Ok(test)
    }

    fn get_test(&self, test_id: i64) -> Result<Option<AbTest>> {
        Ok(self.tests.read().iter().find(|t| t.id == test_id).cloned())
    }

    fn update_test(&self, test: &AbTest) -> Result<()> {
        let mut tests = self.tests.write();
        let slot = tests
            .iter_mut()
            .find(|t| t.id == test.id)
            .ok_or_else(|| ModelWatchError::not_found("A/B test", test.id))?;
        *slot = test.clone();
        Ok(())
    }

    fn list_tests(
        &self,
        status: Option<TestStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<AbTest>, u64)> {
        let mut rows: Vec<AbTest> = self
            .tests
            .read()
            .iter()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(paginate(rows, limit, offset))
    }

    fn running_tests(&self) -> Result<Vec<AbTest>> {
        Ok(self
            .tests
            .read()
            .iter()
            .filter(|t| t.status == TestStatus::Running)
            .cloned()
            .collect())
    }

    fn insert_test_result(&self, mut result: AbTestResult) -> Result<AbTestResult> {
        result.id = self.next_id();
        self.results.write().push(result.clone());
        Ok(result)
    }

    fn test_results(&self, test_id: i64, variant: Option<Variant>) -> Result<Vec<AbTestResult>> {
        Ok(self
            .results
            .read()
            .iter()
            .filter(|r| r.test_id == test_id)
            .filter(|r| variant.map(|v| r.variant == v).unwrap_or(true))
            .cloned()
            .collect())
    }

    // ----- threshold configs -----

    fn get_threshold_config(&self, model_id: i64) -> Result<Option<ThresholdConfig>> {
        Ok(self.threshold_configs.read().get(&model_id).cloned())
    }

    fn upsert_threshold_config(&self, config: ThresholdConfig) -> Result<ThresholdConfig> {
        self.threshold_configs
            .write()
            .insert(config.model_id, config.clone());
        Ok(config)
    }
}
