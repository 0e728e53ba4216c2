//! Error types for the telemetry pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Reasons an event is rejected at construction.
///
/// These are the producer's responsibility and are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown event type: {0}")]
    InvalidEventType(String),

    #[error("Event timestamp is missing")]
    MissingTimestamp,

    #[error("Metric {0} is not a finite number")]
    NonFiniteMetric(String),
}

/// Errors reported by durable and real-time sinks
#[derive(Error, Debug)]
pub enum SinkError {
    /// I/O errors (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store refused or could not be reached
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// Sink call exceeded its deadline
    #[error("Sink call timed out after {0:?}")]
    Timeout(Duration),
}

impl SinkError {
    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Errors that can occur in the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error("Buffer is full ({capacity} events)")]
    BufferFull { capacity: usize },

    #[error("Pipeline is not running")]
    PipelineNotRunning,

    #[error("Pipeline is shutting down")]
    ShuttingDown,

    #[error("Sink write failed: {0}")]
    SinkWriteFailed(String),

    #[error("Retry queue full, dropped batch of {dropped_events} events")]
    RetryQueueFull { dropped_events: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No tokio runtime available to run pipeline timers")]
    NoRuntime,
}

impl PipelineError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure is transient and handled by the retry queue
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SinkWriteFailed(_) | Self::BufferFull { .. })
    }
}

impl From<SinkError> for PipelineError {
    fn from(err: SinkError) -> Self {
        PipelineError::SinkWriteFailed(err.to_string())
    }
}
