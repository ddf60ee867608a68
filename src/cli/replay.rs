//! JSON-lines replay of recorded metric inputs.

use crate::core::types::{DimensionKey, Sample, StateKey};
use crate::core::{Config, Result, StatError};
use crate::metrics::collaborators::{PullFailure, Puller};
use crate::metrics::engine::BucketAggregationEngine;
use crate::metrics::handle::MetricHandle;
use crate::metrics::report::{DumpLatency, MetricReport};
use ahash::AHashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// One recorded input
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayInput {
    /// Queue the response to the next on-demand pull of a metric
    QueuePull {
        /// Metric id
        metric: i64,
        /// Samples returned on success
        #[serde(default)]
        samples: Vec<Sample>,
        /// Failure reason; the pull fails when set
        #[serde(default)]
        fail: Option<String>,
    },
    /// Deliver a scheduled pull
    Pull {
        /// Metric id
        metric: i64,
        /// When the pull was scheduled
        scheduled_ns: i64,
        /// When the pull completed
        actual_ns: i64,
        /// Samples returned on success
        #[serde(default)]
        samples: Vec<Sample>,
        /// Failure reason; the pull failed when set
        #[serde(default)]
        fail: Option<String>,
    },
    /// Push one matched event
    Event {
        /// Metric id
        metric: i64,
        /// Event time
        ts_ns: i64,
        /// Extracted sample
        sample: Sample,
    },
    /// Change the condition of a metric
    Condition {
        /// Metric id
        metric: i64,
        /// Change time
        ts_ns: i64,
        /// New condition
        value: bool,
    },
    /// Change the state of every dimension linked to a primary key
    State {
        /// Metric id
        metric: i64,
        /// Change time
        ts_ns: i64,
        /// Primary key; empty links every dimension
        #[serde(default)]
        primary_key: DimensionKey,
        /// New state
        state: StateKey,
    },
    /// Split the open bucket of one metric, or all when `metric` is absent
    Split {
        /// Split time
        ts_ns: i64,
        /// Metric id
        #[serde(default)]
        metric: Option<i64>,
    },
    /// Dump reports of one metric, or all when `metric` is absent
    Dump {
        /// Dump time
        now_ns: i64,
        /// Metric id
        #[serde(default)]
        metric: Option<i64>,
        /// Close the open bucket as a partial bucket
        #[serde(default)]
        include_partial: bool,
        /// Forget reported buckets
        #[serde(default = "default_erase")]
        erase: bool,
        /// Dump latency
        #[serde(default)]
        latency: DumpLatency,
    },
}

fn default_erase() -> bool {
    true
}

type QueuedPull = std::result::Result<Vec<Sample>, String>;

/// Puller answering from responses queued by the recording
#[derive(Debug, Default)]
pub struct ReplayPuller {
    queued: Mutex<AHashMap<i64, VecDeque<QueuedPull>>>,
}

impl ReplayPuller {
    /// Create an empty puller
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response for `metric_id`
    pub fn enqueue(&self, metric_id: i64, response: QueuedPull) {
        self.queued.lock().entry(metric_id).or_default().push_back(response);
    }

    /// Responses still queued for `metric_id`
    pub fn pending(&self, metric_id: i64) -> usize {
        self.queued.lock().get(&metric_id).map_or(0, VecDeque::len)
    }
}

impl Puller for ReplayPuller {
    fn pull(&self, metric_id: i64, timestamp_ns: i64) -> std::result::Result<Vec<Sample>, PullFailure> {
        let next = self
            .queued
            .lock()
            .get_mut(&metric_id)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(samples)) => Ok(samples),
            Some(Err(reason)) => Err(PullFailure::new(metric_id, reason)),
            None => {
                tracing::warn!(metric_id, timestamp_ns, "no queued pull response");
                Err(PullFailure::new(metric_id, "no queued response"))
            },
        }
    }
}

/// Configured engines driven by recorded inputs
pub struct Replay {
    engines: BTreeMap<i64, MetricHandle>,
    puller: Arc<ReplayPuller>,
    prepared: bool,
}

impl Replay {
    /// Build one engine per configured metric
    pub fn new(config: &Config, time_base_ns: i64, start_ns: i64) -> Result<Self> {
        let puller = Arc::new(ReplayPuller::new());
        let mut engines = BTreeMap::new();
        for metric in &config.metrics {
            let engine_puller: Option<Arc<dyn Puller>> = if metric.pulled {
                Some(puller.clone())
            } else {
                None
            };
            let engine = BucketAggregationEngine::new(metric.clone(), time_base_ns, start_ns, engine_puller)?;
            engines.insert(metric.id, MetricHandle::new(engine));
        }
        Ok(Self {
            engines,
            puller,
            prepared: false,
        })
    }

    /// Handle of one metric
    pub fn handle(&self, metric_id: i64) -> Result<&MetricHandle> {
        self.engines
            .get(&metric_id)
            .ok_or(StatError::UnknownMetric(metric_id))
    }

    /// The shared puller
    pub fn puller(&self) -> &ReplayPuller {
        &self.puller
    }

    /// Apply one input; dumps return their reports
    pub fn apply(&mut self, input: ReplayInput) -> Result<Vec<MetricReport>> {
        if let ReplayInput::QueuePull {
            metric,
            samples,
            fail,
        } = input
        {
            self.handle(metric)?;
            self.puller.enqueue(metric, fail.map_or(Ok(samples), Err));
            return Ok(Vec::new());
        }

        // Initial pulls wait until the recording queued their responses
        if !self.prepared {
            for handle in self.engines.values() {
                handle.with_engine(BucketAggregationEngine::prepare_first_bucket);
            }
            self.prepared = true;
        }

        match input {
            ReplayInput::QueuePull { .. } => {},
            ReplayInput::Pull {
                metric,
                scheduled_ns,
                actual_ns,
                samples,
                fail,
            } => {
                let result = fail.map_or(Ok(samples), |reason| Err(PullFailure::new(metric, reason)));
                self.handle(metric)?.on_data_pulled(result, scheduled_ns, actual_ns);
            },
            ReplayInput::Event { metric, ts_ns, sample } => {
                self.handle(metric)?.on_matched_event(&sample, ts_ns);
            },
            ReplayInput::Condition { metric, ts_ns, value } => {
                self.handle(metric)?.on_condition_changed(value, ts_ns);
            },
            ReplayInput::State {
                metric,
                ts_ns,
                primary_key,
                state,
            } => {
                self.handle(metric)?.on_state_changed(ts_ns, &primary_key, state);
            },
            ReplayInput::Split { ts_ns, metric } => {
                for handle in self.targets(metric)? {
                    handle.split_bucket(ts_ns);
                }
            },
            ReplayInput::Dump {
                now_ns,
                metric,
                include_partial,
                erase,
                latency,
            } => {
                return Ok(self
                    .targets(metric)?
                    .into_iter()
                    .map(|handle| handle.dump_report(now_ns, include_partial, erase, latency))
                    .collect());
            },
        }
        Ok(Vec::new())
    }

    fn targets(&self, metric: Option<i64>) -> Result<Vec<&MetricHandle>> {
        match metric {
            Some(id) => Ok(vec![self.handle(id)?]),
            None => Ok(self.engines.values().collect()),
        }
    }
}
