//! Error types for metrics and logging setup

use thiserror::Error;

/// Result type for monitoring operations
pub type Result<T> = std::result::Result<T, MonitoringError>;

/// Monitoring error types
#[derive(Error, Debug)]
pub enum MonitoringError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics export error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Tracing setup error
    #[error("Tracing setup error: {0}")]
    Tracing(String),

    /// Counters only move forward
    #[error("Counter '{name}' cannot be incremented by negative amount {amount}")]
    NegativeIncrement { name: String, amount: f64 },

    /// `end()` was called on an observation that already finished
    #[error("Timer observation for '{name}' has already been stopped")]
    TimerAlreadyStopped { name: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MonitoringError {
    /// Stable error kind code
    pub fn code(&self) -> &'static str {
        match self {
            MonitoringError::Config(_) => "config",
            MonitoringError::Metrics(_) => "metrics",
            MonitoringError::Tracing(_) => "tracing",
            MonitoringError::NegativeIncrement { .. } => "negative_increment",
            MonitoringError::TimerAlreadyStopped { .. } => "timer_already_stopped",
            MonitoringError::Serde(_) => "serialization",
            MonitoringError::Other(_) => "internal",
        }
    }
}
