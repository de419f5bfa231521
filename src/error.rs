//! Error types for Strider

use thiserror::Error;

/// Errors that can occur while tracking, persisting or querying steps
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid biometric profile: {0}")]
    InvalidProfile(#[from] ValidationError),

    #[error("Invalid step goal: {0}")]
    InvalidGoal(u64),

    #[error("Step detector sensor not available: {0}")]
    SensorUnavailable(String),

    #[error("Step service is not running")]
    ServiceNotRunning,

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Reasons a biometric profile is not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name must not be blank")]
    BlankName,

    #[error("gender must be set")]
    MissingGender,

    #[error("height must be greater than zero")]
    NonPositiveHeight,

    #[error("weight must be greater than zero")]
    NonPositiveWeight,

    #[error("height must be a finite number")]
    NonFiniteHeight,

    #[error("weight must be a finite number")]
    NonFiniteWeight,
}

impl From<tokio::task::JoinError> for TrackerError {
    fn from(e: tokio::task::JoinError) -> Self {
        TrackerError::Task(e.to_string())
    }
}
