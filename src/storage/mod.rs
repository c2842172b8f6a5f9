//! Storage collaborator interface
//!
//! All entities are owned by an external relational store. The core talks
//! to it through this narrow repository trait and never assumes an
//! in-memory graph persists between calls. Backend failures surface as
//! [`crate::ModelWatchError::Storage`] and propagate; there is no fallback
//! cache.

mod memory;

pub use memory::MemoryStorage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abtest::{AbTest, AbTestResult, TestStatus, Variant};
use crate::drift::{AlertFilter, DriftAlert, DriftConfig, FeatureSnapshot, MetricsSample};
use crate::error::Result;
use crate::thresholds::ThresholdConfig;
use crate::versioning::{ModelVersion, RollbackRecord};

/// A deployed predictive model. Created by the surrounding application;
/// this core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Repository interface to the storage collaborator.
///
/// Insert methods assign row ids (pass `id: 0`) and return the stored
/// entity; services stamp all timestamps themselves. Every method is
/// synchronous per the surrounding request/response model.
pub trait Storage: Send + Sync {
    // ----- models -----

    fn insert_model(&self, model: Model) -> Result<Model>;
    fn get_model(&self, model_id: i64) -> Result<Option<Model>>;
    fn list_models(&self) -> Result<Vec<Model>>;

    // ----- model versions -----

    fn insert_version(&self, version: ModelVersion) -> Result<ModelVersion>;
    fn get_version(&self, version_id: i64) -> Result<Option<ModelVersion>>;
    fn update_version(&self, version: &ModelVersion) -> Result<()>;
    /// All versions of a model, newest sequence number first.
    fn list_versions(&self, model_id: i64) -> Result<Vec<ModelVersion>>;
    fn get_active_version(&self, model_id: i64) -> Result<Option<ModelVersion>>;

    /// Atomically deactivate any active version of the model and activate
    /// the target, stamping its deployment time. This is the one multi-step
    /// write that must never be observably split: no interleaved reader may
    /// see zero or two active versions.
    fn activate_version_exclusive(
        &self,
        model_id: i64,
        version_id: i64,
        deployed_at: DateTime<Utc>,
    ) -> Result<ModelVersion>;

    // ----- rollback records -----

    fn insert_rollback(&self, record: RollbackRecord) -> Result<RollbackRecord>;
    fn update_rollback(&self, record: &RollbackRecord) -> Result<()>;
    /// Rollback history for a model, newest first, with the total count.
    fn list_rollbacks(
        &self,
        model_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<RollbackRecord>, u64)>;

    // ----- drift configs -----

    fn insert_drift_config(&self, config: DriftConfig) -> Result<DriftConfig>;
    /// The enabled config for a model; `None` means drift monitoring is off.
    fn get_drift_config(&self, model_id: i64) -> Result<Option<DriftConfig>>;
    fn get_drift_config_by_id(&self, config_id: i64) -> Result<Option<DriftConfig>>;
    fn update_drift_config(&self, config: &DriftConfig) -> Result<()>;
    fn list_enabled_drift_configs(&self) -> Result<Vec<DriftConfig>>;

    // ----- feature snapshots -----

    fn insert_feature_snapshot(&self, snapshot: FeatureSnapshot) -> Result<FeatureSnapshot>;
    fn latest_baseline_snapshot(
        &self,
        model_id: i64,
        feature_name: &str,
    ) -> Result<Option<FeatureSnapshot>>;

    // ----- drift alerts -----

    fn insert_alert(&self, alert: DriftAlert) -> Result<DriftAlert>;
    fn get_alert(&self, alert_id: i64) -> Result<Option<DriftAlert>>;
    fn update_alert(&self, alert: &DriftAlert) -> Result<()>;
    /// Active alerts, newest first, optionally scoped to one model.
    fn active_alerts(&self, model_id: Option<i64>) -> Result<Vec<DriftAlert>>;
    /// Filtered alert page, newest first, with the total matching count.
    fn list_alerts(&self, filter: &AlertFilter) -> Result<(Vec<DriftAlert>, u64)>;

    // ----- metrics samples -----

    fn insert_metrics_sample(&self, sample: MetricsSample) -> Result<MetricsSample>;
    /// Samples recorded at or after `since`, oldest first.
    fn metrics_since(&self, model_id: i64, since: DateTime<Utc>) -> Result<Vec<MetricsSample>>;
    /// The most recent samples, newest first.
    fn recent_metrics(&self, model_id: i64, limit: usize) -> Result<Vec<MetricsSample>>;

    // ----- A/B tests -----

    fn insert_test(&self, test: AbTest) -> Result<AbTest>;
    fn get_test(&self, test_id: i64) -> Result<Option<AbTest>>;
    fn update_test(&self, test: &AbTest) -> Result<()>;
    /// Test page, newest first, with the total matching count.
    fn list_tests(
        &self,
        status: Option<TestStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<AbTest>, u64)>;
    fn running_tests(&self) -> Result<Vec<AbTest>>;

    fn insert_test_result(&self, result: AbTestResult) -> Result<AbTestResult>;
    /// Results for a test in recording order, optionally one variant only.
    fn test_results(&self, test_id: i64, variant: Option<Variant>) -> Result<Vec<AbTestResult>>;

    // ----- threshold configs -----

    fn get_threshold_config(&self, model_id: i64) -> Result<Option<ThresholdConfig>>;
    fn upsert_threshold_config(&self, config: ThresholdConfig) -> Result<ThresholdConfig>;
}
