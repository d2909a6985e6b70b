use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in metric collectors
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Processor discovery failed: {0}")]
    Discovery(String),

    #[error("Failed to read topology attribute '{}': {reason}", .path.display())]
    TopologyRead { path: PathBuf, reason: String },

    #[error("Failed to sample '{}': {reason}", .path.display())]
    SampleRead { path: PathBuf, reason: String },

    #[error("Failed to construct metric point: {0}")]
    Construction(#[from] MetricError),

    #[error("Invalid collector configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl CollectorError {
    pub(crate) fn topology_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::TopologyRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sample_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SampleRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised when a metric point is malformed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Metric name must not be empty")]
    EmptyName,

    #[error("Metric '{0}' has no fields")]
    NoFields(String),

    #[error("Metric '{0}' has an empty tag or field key")]
    EmptyKey(String),

    #[error("Metric '{name}' field '{field}' is not a finite number")]
    NonFiniteField { name: String, field: String },
}

/// Errors returned by the output queue
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Output queue is full, point dropped")]
    Full,

    #[error("Output queue is closed")]
    Closed,
}

/// Errors that can occur when writing to a sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize point: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink '{sink}' is closed")]
    Closed { sink: String },

    #[error("Point rejected: {0}")]
    Rejected(String),
}
