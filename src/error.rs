//! Error types for the modelwatch monitoring core

use thiserror::Error;

/// Result type alias for modelwatch operations
pub type Result<T> = std::result::Result<T, ModelWatchError>;

/// Main error type for the monitoring core
#[derive(Error, Debug)]
pub enum ModelWatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Rollback failed: {0}")]
    Rollback(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ModelWatchError {
    /// Shorthand for a missing-entity error
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        ModelWatchError::NotFound { entity, id }
    }
}

impl From<serde_json::Error> for ModelWatchError {
    fn from(err: serde_json::Error) -> Self {
        ModelWatchError::Serialization(err.to_string())
    }
}
