//! Model version lifecycle
//!
//! Version creation, exclusive deployment, manual and automatic rollback,
//! and version comparison.

mod registry;

pub use registry::{AutoRollbackOutcome, RollbackOutcome, VersionRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ModelWatchError, Result};

/// Semantic version derived from a model's monotonically increasing
/// version sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemanticVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Derive the three-part version from a sequence number: hundreds digit
    /// becomes major, tens minor, ones patch.
    pub fn from_sequence(n: u32) -> Self {
        Self {
            major: n / 100,
            minor: (n % 100) / 10,
            patch: n % 10,
        }
    }

    /// Parse from a "major.minor.patch" string
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(ModelWatchError::Validation(format!(
                "Invalid version format: {}",
                s
            )));
        }
        let parse_part = |part: &str, label: &str| {
            part.parse::<u32>().map_err(|_| {
                ModelWatchError::Validation(format!("Invalid {} version: {}", label, part))
            })
        };
        Ok(Self {
            major: parse_part(parts[0], "major")?,
            minor: parse_part(parts[1], "minor")?,
            patch: parse_part(parts[2], "patch")?,
        })
    }
}

impl std::fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One registered version of a deployed model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: i64,
    pub model_id: i64,
    /// Derived "major.minor.patch" string
    pub version: String,
    /// Monotonically increasing sequence number, scoped to the model
    pub version_number: u32,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub mean_absolute_error: Option<f64>,
    pub root_mean_squared_error: Option<f64>,
    pub training_data_size: Option<u64>,
    pub validation_data_size: Option<u64>,
    pub hyperparameters: Option<HashMap<String, serde_json::Value>>,
    pub feature_importance: Option<HashMap<String, f64>>,
    pub is_active: bool,
    /// False once retired; retired versions cannot be rolled back to
    pub is_rollback_target: bool,
    pub deployed_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    pub change_log: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a new model version
#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub model_id: i64,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub mean_absolute_error: Option<f64>,
    pub root_mean_squared_error: Option<f64>,
    pub training_data_size: Option<u64>,
    pub validation_data_size: Option<u64>,
    pub hyperparameters: Option<HashMap<String, serde_json::Value>>,
    pub feature_importance: Option<HashMap<String, f64>>,
    pub change_log: Option<String>,
}

/// How a rollback was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackType {
    Manual,
    Automatic,
}

/// Rollback record state. Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Audit record of one rollback attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub id: i64,
    pub model_id: i64,
    pub from_version_id: Option<i64>,
    pub to_version_id: i64,
    pub reason: String,
    pub rollback_type: RollbackType,
    pub status: RollbackStatus,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Which side won a metric comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonWinner {
    VersionA,
    VersionB,
    Tie,
}

/// One metric's pairwise comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub value_a: Option<f64>,
    pub value_b: Option<f64>,
    /// None when either side is missing the metric or the difference is
    /// within the comparison epsilon
    pub winner: Option<ComparisonWinner>,
}

/// Full comparison between two versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionComparison {
    pub version_a: String,
    pub version_b: String,
    pub metrics: Vec<MetricComparison>,
    pub overall: ComparisonWinner,
}

/// One point of a per-version metric trend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub version: String,
    pub version_number: u32,
    pub value: Option<f64>,
    pub is_active: bool,
}

/// Metric trajectory across a model's versions, oldest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTrend {
    pub model_id: i64,
    pub metric: String,
    pub points: Vec<TrendPoint>,
    pub direction: crate::drift::TrendDirection,
    /// Relative change from first to last recorded value, in percent
    pub improvement_rate: f64,
}
