//! Error types for the co-occurrence pipeline.
//!
//! Only malformed input and caller cancellation are surfaced as errors.
//! Degraded algorithms (eigensolver non-convergence, a failing community
//! strategy) are recovered inside the metrics engine and reported in the
//! [`MetricsSummary`](crate::graph::MetricsSummary) instead.

use thiserror::Error;

/// Top-level error type for graph building, metrics and their collaborators.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Malformed request: empty field selection, unknown column, bad floor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller cancelled the computation (or its timeout elapsed).
    #[error("computation cancelled")]
    Cancelled,

    /// I/O error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parse error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GraphError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Result type for co-occurrence graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
