//! Interfaces of the engine's external collaborators.

use crate::core::types::{MetricDimensionKey, Sample};
use thiserror::Error;

/// A pull that did not produce usable data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pull failed for metric {metric_id}: {reason}")]
pub struct PullFailure {
    /// Metric the pull was for
    pub metric_id: i64,
    /// Puller-provided reason
    pub reason: String,
}

impl PullFailure {
    /// Create a new failure
    pub fn new<S: Into<String>>(metric_id: i64, reason: S) -> Self {
        Self {
            metric_id,
            reason: reason.into(),
        }
    }
}

/// Performs the sampling I/O for pulled metrics.
///
/// Called synchronously while the engine is borrowed mutably.
pub trait Puller: Send + Sync {
    /// Sample every dimension of `metric_id` as of `timestamp_ns`
    fn pull(&self, metric_id: i64, timestamp_ns: i64) -> Result<Vec<Sample>, PullFailure>;
}

/// Classifies raw events and extracts their dimension and value fields
pub trait EventMatcher {
    /// Raw event type
    type Event;

    /// The sample carried by `event`, or `None` if it does not belong to the metric
    fn matches(&self, event: &Self::Event) -> Option<Sample>;
}

/// Receives finalized full-bucket values of the first value field
pub trait AnomalyDetector: Send {
    /// Called once per key per full, valid bucket
    fn add_past_bucket(&mut self, key: &MetricDimensionKey, value: i64, bucket_num: i64);
}
