//! Statbucket - windowed metric aggregation engine.
//!
//! Statbucket turns a stream of numeric observations, either pushed events
//! or periodically pulled samples, into a time-bucketed series of
//! per-dimension statistics.
//!
//! # Features
//!
//! - **Diff mode**: report deltas against a running base with counter reset
//!   detection
//! - **Condition gating**: aggregate only while a condition holds, with
//!   precise condition-true durations per bucket
//! - **State slicing**: split every series by an externally driven state
//! - **Pull delay correction**: credit late pulls to the bucket they were
//!   scheduled for and report the signed correction
//! - **Bounded cardinality**: per-bucket dimension guardrails
//! - **Drop bookkeeping**: every untrusted bucket is reported with reasons
//!
//! # Architecture
//!
//! - `core`: values, keys, configuration and errors
//! - `metrics`: the aggregation engine and its components
//! - `cli`: JSON-lines replay front end
//!
//! # Example
//!
//! ```no_run
//! use statbucket::core::{DimensionKey, FieldValue, MetricConfigBuilder, Sample, Value};
//! use statbucket::metrics::{BucketAggregationEngine, DumpLatency};
//!
//! fn main() -> statbucket::Result<()> {
//!     let config = MetricConfigBuilder::new(1).value_fields(vec![0]).build()?;
//!     let mut engine = BucketAggregationEngine::new(config, 0, 0, None)?;
//!     let uid = DimensionKey::new([FieldValue::int(1, 1000)]);
//!     engine.on_matched_event(&Sample::new(uid, vec![Value::Int(3)]), 1_000_000_000);
//!     let report = engine.dump_report(60_000_000_000, false, true, DumpLatency::default());
//!     println!("{}", serde_json::to_string(&report)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod metrics;

// Re-export core types for convenience
pub use crate::core::{Config, Result, StatError};
pub use crate::metrics::{BucketAggregationEngine, MetricHandle, MetricReport};
