//! Common test utilities and fixtures.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use statbucket::core::{DimensionKey, FieldValue, MetricDimensionKey, Sample, StateKey, Value};
use statbucket::metrics::{AnomalyDetector, PullFailure, Puller};

pub const SEC: i64 = 1_000_000_000;

/// Dimension key of one uid
pub fn dim(uid: i64) -> DimensionKey {
    DimensionKey::new([FieldValue::int(1, uid)])
}

/// Series key of one uid in an unsliced metric
pub fn key(uid: i64) -> MetricDimensionKey {
    MetricDimensionKey::new(dim(uid), StateKey::default())
}

/// Series key of one uid in a metric sliced by atom 10
pub fn sliced_key(uid: i64, state: i64) -> MetricDimensionKey {
    MetricDimensionKey::new(dim(uid), state_key(state))
}

/// State key of atom 10
pub fn state_key(state: i64) -> StateKey {
    StateKey::new([FieldValue::int(10, state)])
}

/// Single-field sample of one uid
pub fn sample(uid: i64, value: i64) -> Sample {
    Sample::new(dim(uid), vec![Value::Int(value)])
}

/// Puller answering from a script of responses, recording pull times.
#[derive(Default)]
pub struct ScriptedPuller {
    responses: Mutex<VecDeque<Result<Vec<Sample>, String>>>,
    pulls: Mutex<Vec<i64>>,
}

impl ScriptedPuller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_ok(&self, samples: Vec<Sample>) {
        self.responses.lock().push_back(Ok(samples));
    }

    pub fn push_err(&self, reason: &str) {
        self.responses.lock().push_back(Err(reason.to_string()));
    }

    pub fn pull_times(&self) -> Vec<i64> {
        self.pulls.lock().clone()
    }
}

impl Puller for ScriptedPuller {
    fn pull(&self, metric_id: i64, timestamp_ns: i64) -> Result<Vec<Sample>, PullFailure> {
        self.pulls.lock().push(timestamp_ns);
        match self.responses.lock().pop_front() {
            Some(Ok(samples)) => Ok(samples),
            Some(Err(reason)) => Err(PullFailure::new(metric_id, reason)),
            None => Err(PullFailure::new(metric_id, "script exhausted")),
        }
    }
}

/// Anomaly detector recording every hand-off
#[derive(Clone, Default)]
pub struct RecordingDetector {
    pub seen: Arc<Mutex<Vec<(MetricDimensionKey, i64, i64)>>>,
}

impl RecordingDetector {
    pub fn calls(&self) -> Vec<(MetricDimensionKey, i64, i64)> {
        self.seen.lock().clone()
    }
}

impl AnomalyDetector for RecordingDetector {
    fn add_past_bucket(&mut self, key: &MetricDimensionKey, value: i64, bucket_num: i64) {
        self.seen.lock().push((key.clone(), value, bucket_num));
    }
}
