//! Why buckets were invalidated.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason a bucket's data could not be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    /// A pull succeeded but returned nothing
    NoData,
    /// The puller reported failure
    PullFailed,
    /// A pull completed later than the maximum pull delay
    PullDelayed,
    /// Data arrived for a bucket that was already closed
    EventInWrongBucket,
    /// The gating condition was unknown
    ConditionUnknown,
    /// Too many distinct dimension keys
    DimensionGuardrailReached,
    /// More than one bucket boundary passed between two flushes of a diffed metric
    MultipleBucketsSkipped,
    /// The bucket was shorter than the configured minimum
    BucketTooSmall,
    /// A fast dump cut a pulled bucket short without pulling
    DumpReportRequested,
}

impl DropReason {
    /// Stable name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NoData => "NO_DATA",
            DropReason::PullFailed => "PULL_FAILED",
            DropReason::PullDelayed => "PULL_DELAYED",
            DropReason::EventInWrongBucket => "EVENT_IN_WRONG_BUCKET",
            DropReason::ConditionUnknown => "CONDITION_UNKNOWN",
            DropReason::DimensionGuardrailReached => "DIMENSION_GUARDRAIL_REACHED",
            DropReason::MultipleBucketsSkipped => "MULTIPLE_BUCKETS_SKIPPED",
            DropReason::BucketTooSmall => "BUCKET_TOO_SMALL",
            DropReason::DumpReportRequested => "DUMP_REPORT_REQUESTED",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invalidation of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropEvent {
    /// Why
    pub reason: DropReason,
    /// When, in nanoseconds
    pub timestamp_ns: i64,
}

/// A bucket omitted from the data series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedBucketRecord {
    /// Bucket start
    pub start_ns: i64,
    /// Bucket end
    pub end_ns: i64,
    /// Reasons in arrival order, capped
    pub drop_events: Vec<DropEvent>,
}

/// Drop events of the open bucket.
///
/// Past the cap further events are ignored; the first ones are authoritative.
#[derive(Debug, Clone)]
pub struct DropEventLog {
    events: Vec<DropEvent>,
    capacity: usize,
    skipped: bool,
    overflowed: u64,
}

impl DropEventLog {
    /// Create a log keeping at most `capacity` events per bucket
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            skipped: false,
            overflowed: 0,
        }
    }

    /// Mark the open bucket invalid. Returns true if it was valid before.
    pub fn record(&mut self, reason: DropReason, timestamp_ns: i64) -> bool {
        let newly_skipped = !self.skipped;
        self.skipped = true;
        if self.events.len() < self.capacity {
            self.events.push(DropEvent {
                reason,
                timestamp_ns,
            });
        } else {
            self.overflowed += 1;
        }
        newly_skipped
    }

    /// Whether the open bucket has been invalidated
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Events recorded for the open bucket
    pub fn events(&self) -> &[DropEvent] {
        &self.events
    }

    /// Events dropped because the cap was reached, over the metric's lifetime
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Close the open bucket, returning its record if it was invalidated
    pub fn take(&mut self, start_ns: i64, end_ns: i64) -> Option<SkippedBucketRecord> {
        let skipped = std::mem::replace(&mut self.skipped, false);
        let drop_events = std::mem::replace(&mut self.events, Vec::with_capacity(self.capacity));
        skipped.then(|| SkippedBucketRecord {
            start_ns,
            end_ns,
            drop_events,
        })
    }
}
