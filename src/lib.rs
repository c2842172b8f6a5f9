//! Modelwatch - production model fleet monitoring
//!
//! Operates a fleet of deployed predictive models: tracks version
//! lifecycle, detects data and concept drift against recorded baselines,
//! runs controlled A/B experiments between model variants, derives adaptive
//! alert thresholds from historical drift metrics, and orchestrates
//! periodic health checks that can trigger automatic rollback.
//!
//! # Modules
//!
//! - [`stats`] - Summary statistics and histograms for feature samples
//! - [`drift`] - Drift detection, severity classification, alert lifecycle
//! - [`versioning`] - Version registry, deployment, rollback
//! - [`abtest`] - A/B experiments and statistical winner determination
//! - [`thresholds`] - Adaptive alert threshold calculation
//! - [`monitor`] - Periodic health-check orchestration
//! - [`notify`] - Notification payloads and the delivery seam
//! - [`storage`] - Repository interface to the storage collaborator
//!
//! All services are constructed once per process with an explicit storage
//! handle; nothing lives in process memory between calls beyond what the
//! storage collaborator persists (plus the orchestrator's advisory
//! last-run summary).

pub mod error;

pub mod stats;

pub mod drift;
pub mod versioning;

pub mod abtest;
pub mod thresholds;

pub mod monitor;
pub mod notify;
pub mod storage;

pub use error::{ModelWatchError, Result};

/// Re-export of the commonly used types
pub mod prelude {
    pub use crate::error::{ModelWatchError, Result};

    pub use crate::stats::{FeatureStats, HistogramBin};

    pub use crate::drift::{
        AlertFilter, AlertStatus, CurrentMetrics, DriftAlert, DriftConfig, DriftConfigInput,
        DriftDetector, DriftReport, DriftSeverity, DriftType, MetricsInput,
    };

    pub use crate::versioning::{
        ModelVersion, NewVersion, RollbackType, SemanticVersion, VersionRegistry,
    };

    pub use crate::abtest::{
        AbTest, AbTestEngine, NewAbTest, NewTestResult, TestStatus, TestWinner, Variant,
        VariantStats,
    };

    pub use crate::thresholds::{
        CalculatedThresholds, ThresholdAlgorithm, ThresholdConfig, ThresholdService,
    };

    pub use crate::monitor::{CheckSummary, ModelCheckOutcome, MonitoringOrchestrator};

    pub use crate::notify::{LogNotifier, NotificationPayload, Notifier};

    pub use crate::storage::{MemoryStorage, Model, Storage};
}
