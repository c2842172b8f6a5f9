//! Notification payloads and delivery seam
//!
//! The core produces a fixed payload shape; actual transports (webhook,
//! email, push) live outside this crate behind the [`Notifier`] trait.
//! Delivery is best-effort everywhere: a failed send never rolls back the
//! write that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::abtest::{AbTest, SignificanceOutcome, TestWinner, VariantStats};
use crate::drift::DriftAlert;
use crate::drift::DriftSeverity;
use crate::error::Result;

/// Delivery severity, as consumed by the external transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Critical,
}

/// One labeled value in a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationField {
    pub name: String,
    pub value: String,
}

impl NotificationField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The exact payload shape handed to delivery transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub severity: NotificationSeverity,
    pub fields: Vec<NotificationField>,
    pub timestamp: DateTime<Utc>,
}

/// Delivery seam. Implementations must not block alert persistence; errors
/// are reported to the caller for logging, never escalated further.
pub trait Notifier: Send + Sync {
    fn send(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Default notifier: writes the payload to the log and always succeeds.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, payload: &NotificationPayload) -> Result<()> {
        info!(
            title = %payload.title,
            severity = ?payload.severity,
            "notification: {}",
            payload.message
        );
        Ok(())
    }
}

/// Send through a notifier, logging failures instead of propagating them.
/// Returns whether delivery succeeded.
pub fn send_best_effort(notifier: &dyn Notifier, payload: &NotificationPayload) -> bool {
    match notifier.send(payload) {
        Ok(()) => true,
        Err(e) => {
            warn!(title = %payload.title, error = %e, "notification delivery failed");
            false
        }
    }
}

/// Payload for one drift alert. Carries the model reference, drift type,
/// severity, and score the downstream consumers key on.
pub fn drift_alert(model_id: i64, model_name: &str, alert: &DriftAlert) -> NotificationPayload {
    NotificationPayload {
        title: format!("Drift alert: {}", model_name),
        message: alert.recommendation.clone(),
        severity: severity_of(alert.severity),
        fields: vec![
            NotificationField::new("Model ID", model_id.to_string()),
            NotificationField::new("Model", model_name),
            NotificationField::new("Drift Type", alert.drift_type.to_string()),
            NotificationField::new("Severity", alert.severity.to_string()),
            NotificationField::new("Drift Score", format!("{:.4}", alert.drift_score)),
        ],
        timestamp: Utc::now(),
    }
}

/// End-of-run summary payload for a monitoring sweep.
pub fn run_summary(
    models_checked: usize,
    alerts_created: usize,
    critical_alerts: usize,
    rollbacks: usize,
    errors: usize,
) -> NotificationPayload {
    NotificationPayload {
        title: "Drift monitoring run summary".to_string(),
        message: format!(
            "Checked {} models: {} alerts created, {} rollbacks performed.",
            models_checked, alerts_created, rollbacks
        ),
        severity: if critical_alerts > 0 {
            NotificationSeverity::Critical
        } else {
            NotificationSeverity::Warning
        },
        fields: vec![
            NotificationField::new("Models Checked", models_checked.to_string()),
            NotificationField::new("Alerts Created", alerts_created.to_string()),
            NotificationField::new("Critical Alerts", critical_alerts.to_string()),
            NotificationField::new("Rollbacks", rollbacks.to_string()),
            NotificationField::new("Errors", errors.to_string()),
        ],
        timestamp: Utc::now(),
    }
}

/// Owner escalation payload, sent when any model fired a critical alert.
pub fn owner_escalation(model_names: &[String]) -> NotificationPayload {
    NotificationPayload {
        title: "Critical model drift requires attention".to_string(),
        message: format!(
            "Critical drift detected on: {}. Review the active alerts and consider rollback.",
            model_names.join(", ")
        ),
        severity: NotificationSeverity::Critical,
        fields: vec![NotificationField::new(
            "Affected Models",
            model_names.len().to_string(),
        )],
        timestamp: Utc::now(),
    }
}

/// Completion payload for an A/B test, carrying both accuracies, the
/// winner, and the significance verdict.
pub fn ab_test_completion(
    test: &AbTest,
    stats_a: &VariantStats,
    stats_b: &VariantStats,
    outcome: &SignificanceOutcome,
) -> NotificationPayload {
    let winner = match outcome.winner {
        Some(TestWinner::A) => stats_a.model_name.clone(),
        Some(TestWinner::B) => stats_b.model_name.clone(),
        Some(TestWinner::Tie) => "tie".to_string(),
        None => "none".to_string(),
    };
    NotificationPayload {
        title: format!("A/B test completed: {}", test.name),
        message: format!(
            "Accuracy {:.2}% (A) vs {:.2}% (B); winner: {}.",
            stats_a.accuracy * 100.0,
            stats_b.accuracy * 100.0,
            winner
        ),
        severity: NotificationSeverity::Info,
        fields: vec![
            NotificationField::new("Accuracy A", format!("{:.4}", stats_a.accuracy)),
            NotificationField::new("Accuracy B", format!("{:.4}", stats_b.accuracy)),
            NotificationField::new("Winner", winner),
            NotificationField::new("Significant", outcome.is_significant.to_string()),
            NotificationField::new("P-Value", format!("{:.6}", outcome.p_value)),
        ],
        timestamp: Utc::now(),
    }
}

fn severity_of(severity: DriftSeverity) -> NotificationSeverity {
    match severity {
        DriftSeverity::Critical => NotificationSeverity::Critical,
        DriftSeverity::High => NotificationSeverity::Warning,
        DriftSeverity::Medium | DriftSeverity::Low => NotificationSeverity::Info,
    }
}
