//! Windowed value metric aggregation.
//!
//! A [`BucketAggregationEngine`] owns everything one metric needs: the
//! bucket clock, diff bases, condition timers, guardrails and the drop log.
//! Finished buckets are exposed through [`MetricReport`].

pub mod base;
pub mod clock;
pub mod collaborators;
pub mod condition;
pub mod correction;
pub mod drop_log;
pub mod engine;
pub mod guardrail;
pub mod handle;
pub mod interval;
pub mod report;

pub use base::{BaseTracker, DiffOptions, DiffOutcome, DimensionBaseInfo, ValueDirection};
pub use clock::BucketClock;
pub use collaborators::{AnomalyDetector, EventMatcher, PullFailure, Puller};
pub use condition::{ConditionDurationInfo, ConditionState, ConditionTimer};
pub use correction::CorrectionLedger;
pub use drop_log::{DropEvent, DropEventLog, DropReason, SkippedBucketRecord};
pub use engine::{BucketAggregationEngine, EngineStats};
pub use guardrail::{Admission, GuardRail};
pub use handle::MetricHandle;
pub use interval::{Aggregation, IntervalAggregator, ThresholdOp, UploadThreshold};
pub use report::{DimensionData, DumpLatency, FieldAggregate, MetricReport, PastBucket, ReportBucket};
