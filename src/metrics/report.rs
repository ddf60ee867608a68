//! Finalized buckets and the dump report built from them.
//!
//! Everything here is an owned snapshot: readers never see live engine state.

use crate::core::types::{MetricDimensionKey, Value};
use crate::metrics::drop_log::{DropReason, SkippedBucketRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NS_PER_MILLI: i64 = 1_000_000;

/// How long a dump may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpLatency {
    /// Never pull; cut pulled buckets short instead
    Fast,
    /// Pull if needed to close the partial bucket accurately
    #[default]
    NoTimeConstraints,
}

/// Finalized statistic of one configured value field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldAggregate {
    /// Position of the field in the metric's value field list
    pub index: usize,
    /// Finalized value
    pub value: Value,
}

/// One closed bucket of one key. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct PastBucket {
    /// Bucket start
    pub start_ns: i64,
    /// Bucket end
    pub end_ns: i64,
    /// Finalized fields that passed the output filters
    pub values: Vec<FieldAggregate>,
    /// Condition-true time within the bucket
    pub condition_true_ns: i64,
    /// Correction, present only when above the configured threshold
    pub condition_correction_ns: Option<i64>,
}

impl PastBucket {
    /// Value of the field at `index`, if reported
    pub fn value(&self, index: usize) -> Option<Value> {
        self.values.iter().find(|f| f.index == index).map(|f| f.value)
    }
}

/// Wire-form bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBucket {
    /// Bucket start, milliseconds
    pub start_millis: i64,
    /// Bucket end, milliseconds
    pub end_millis: i64,
    /// Field values
    pub values: Vec<FieldAggregate>,
    /// Condition-true time, nanoseconds
    pub condition_true_ns: i64,
    /// Signed condition correction, nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_correction_ns: Option<i64>,
}

/// All buckets of one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionData {
    /// Series key
    pub key: MetricDimensionKey,
    /// Buckets in time order
    pub buckets: Vec<ReportBucket>,
}

/// Wire-form drop event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDropEvent {
    /// Why
    pub reason: DropReason,
    /// When, milliseconds
    pub drop_time_millis: i64,
}

/// Wire-form skipped bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSkippedBucket {
    /// Bucket start, milliseconds
    pub start_millis: i64,
    /// Bucket end, milliseconds
    pub end_millis: i64,
    /// Reasons in arrival order
    pub drop_events: Vec<ReportDropEvent>,
}

/// Everything a metric has to report at dump time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    /// Metric id
    pub metric_id: i64,
    /// Series ordered by key
    pub data: Vec<DimensionData>,
    /// Invalidated buckets in close order
    pub skipped: Vec<ReportSkippedBucket>,
}

impl MetricReport {
    /// Build the wire form from past buckets and skipped records
    pub fn build(
        metric_id: i64,
        past: &BTreeMap<MetricDimensionKey, Vec<PastBucket>>,
        skipped: &[SkippedBucketRecord],
    ) -> Self {
        let data = past
            .iter()
            .filter(|(_, buckets)| !buckets.is_empty())
            .map(|(key, buckets)| DimensionData {
                key: key.clone(),
                buckets: buckets
                    .iter()
                    .map(|b| ReportBucket {
                        start_millis: b.start_ns / NS_PER_MILLI,
                        end_millis: b.end_ns / NS_PER_MILLI,
                        values: b.values.clone(),
                        condition_true_ns: b.condition_true_ns,
                        condition_correction_ns: b.condition_correction_ns,
                    })
                    .collect(),
            })
            .collect();

        let skipped = skipped
            .iter()
            .map(|s| ReportSkippedBucket {
                start_millis: s.start_ns / NS_PER_MILLI,
                end_millis: s.end_ns / NS_PER_MILLI,
                drop_events: s
                    .drop_events
                    .iter()
                    .map(|e| ReportDropEvent {
                        reason: e.reason,
                        drop_time_millis: e.timestamp_ns / NS_PER_MILLI,
                    })
                    .collect(),
            })
            .collect();

        Self {
            metric_id,
            data,
            skipped,
        }
    }

    /// Series of one key, if any
    pub fn dimension(&self, key: &MetricDimensionKey) -> Option<&DimensionData> {
        self.data.iter().find(|d| &d.key == key)
    }
}
