//! Shared, thread-safe access to a metric engine.

use crate::core::types::{DimensionKey, Sample, StateKey};
use crate::metrics::collaborators::PullFailure;
use crate::metrics::engine::{BucketAggregationEngine, EngineStats};
use crate::metrics::report::{DumpLatency, MetricReport};
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable handle serializing every engine call behind one lock.
///
/// The lock is held across synchronous pulls, so a slow puller blocks
/// other callers of the same metric.
#[derive(Clone)]
pub struct MetricHandle {
    inner: Arc<Mutex<BucketAggregationEngine>>,
}

impl MetricHandle {
    /// Wrap an engine
    pub fn new(engine: BucketAggregationEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Metric id
    pub fn metric_id(&self) -> i64 {
        self.inner.lock().config().id
    }

    /// See [`BucketAggregationEngine::on_matched_event`]
    pub fn on_matched_event(&self, sample: &Sample, ts_ns: i64) {
        self.inner.lock().on_matched_event(sample, ts_ns);
    }

    /// See [`BucketAggregationEngine::on_data_pulled`]
    pub fn on_data_pulled(&self, result: Result<Vec<Sample>, PullFailure>, scheduled_ns: i64, actual_ns: i64) {
        self.inner.lock().on_data_pulled(result, scheduled_ns, actual_ns);
    }

    /// See [`BucketAggregationEngine::on_condition_changed`]
    pub fn on_condition_changed(&self, condition: bool, ts_ns: i64) {
        self.inner.lock().on_condition_changed(condition, ts_ns);
    }

    /// See [`BucketAggregationEngine::on_state_changed`]
    pub fn on_state_changed(&self, ts_ns: i64, primary_key: &DimensionKey, new_state: StateKey) {
        self.inner.lock().on_state_changed(ts_ns, primary_key, new_state);
    }

    /// See [`BucketAggregationEngine::split_bucket`]
    pub fn split_bucket(&self, ts_ns: i64) {
        self.inner.lock().split_bucket(ts_ns);
    }

    /// See [`BucketAggregationEngine::dump_report`]
    pub fn dump_report(
        &self,
        now_ns: i64,
        include_current_partial_bucket: bool,
        erase_data: bool,
        latency: DumpLatency,
    ) -> MetricReport {
        self.inner
            .lock()
            .dump_report(now_ns, include_current_partial_bucket, erase_data, latency)
    }

    /// Snapshot of the engine's counters
    pub fn stats(&self) -> EngineStats {
        self.inner.lock().stats().clone()
    }

    /// Run `f` with exclusive access to the engine
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut BucketAggregationEngine) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
