//! Error types for statbucket.

use thiserror::Error;

/// Errors surfaced to callers
#[derive(Error, Debug)]
pub enum StatError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value field is aggregated twice
    #[error("Metric {metric_id}: value field {field} listed more than once")]
    DuplicateValueField { metric_id: i64, field: usize },

    /// Soft limit above hard limit
    #[error("Metric {metric_id}: dimension soft limit {soft} exceeds hard limit {hard}")]
    GuardrailLimits { metric_id: i64, soft: usize, hard: usize },

    /// Pulled metric constructed without a puller
    #[error("Metric {metric_id} is pulled but no puller was supplied")]
    MissingPuller { metric_id: i64 },

    /// No metric with this id
    #[error("Unknown metric id: {0}")]
    UnknownMetric(i64),

    /// I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed input
    #[error("Parse error: {message}")]
    Parse { message: String },
}

/// Result type alias for statbucket operations
pub type Result<T> = std::result::Result<T, StatError>;

impl StatError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_)
            | Self::DuplicateValueField { .. }
            | Self::GuardrailLimits { .. }
            | Self::MissingPuller { .. } => "config",
            Self::UnknownMetric(_) => "not_found",
            Self::Io(_) => "io",
            Self::Serialization(_) | Self::Parse { .. } => "serialization",
        }
    }
}
