//! Bucketed value metric engine.
//!
//! Turns pushed events and pulled samples into per-key, per-bucket
//! statistics. Every entry point is reactive: bucket boundaries are crossed
//! only when an input carries a timestamp past the open bucket's end.
//!
//! Bad data never fails a call. A bucket that cannot be trusted is recorded
//! as skipped with its drop reasons and the engine carries on with the next
//! one.

use crate::core::config::{MetricConfig, MissingDimensionPolicy};
use crate::core::types::{DimensionKey, MetricDimensionKey, Sample, StateKey};
use crate::core::{Result, StatError};
use crate::metrics::base::{BaseTracker, DiffOptions, DiffOutcome};
use crate::metrics::clock::BucketClock;
use crate::metrics::collaborators::{AnomalyDetector, EventMatcher, PullFailure, Puller};
use crate::metrics::condition::{ConditionDurationInfo, ConditionState, ConditionTimer};
use crate::metrics::correction::CorrectionLedger;
use crate::metrics::drop_log::{DropEventLog, DropReason, SkippedBucketRecord};
use crate::metrics::guardrail::{Admission, GuardRail};
use crate::metrics::interval::IntervalAggregator;
use crate::metrics::report::{DumpLatency, FieldAggregate, MetricReport, PastBucket};
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters describing an engine's lifetime
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Buckets closed as skipped
    pub invalidated_buckets: u64,
    /// Buckets closed with data
    pub flushed_buckets: u64,
    /// Pulls performed or delivered
    pub pulls: u64,
    /// Pulls that failed
    pub failed_pulls: u64,
    /// Inputs rejected for arriving after their bucket closed
    pub late_events: u64,
    /// Keys rejected by the dimension guardrail
    pub guardrail_rejections: u64,
    /// Largest number of keys tracked at once
    pub max_dimensions: usize,
}

/// Latest state feed value per primary key.
///
/// A dimension resolves to the link of the most specific primary key shape
/// it can be projected onto.
#[derive(Debug, Default)]
struct StateLinks {
    states: AHashMap<DimensionKey, StateKey>,
    shapes: Vec<Vec<u32>>,
}

impl StateLinks {
    fn set(&mut self, primary_key: &DimensionKey, state: StateKey) {
        let shape = primary_key.field_ids();
        let Some(normalized) = primary_key.project(&shape) else {
            return;
        };
        if !self.shapes.contains(&shape) {
            self.shapes.push(shape);
            self.shapes.sort_by_key(|s| std::cmp::Reverse(s.len()));
        }
        self.states.insert(normalized, state);
    }

    fn lookup(&self, dim: &DimensionKey) -> Option<&StateKey> {
        self.shapes
            .iter()
            .filter_map(|shape| dim.project(shape))
            .find_map(|link| self.states.get(&link))
    }

    /// Drop links that only applied to trimmed dimensions
    fn prune(&mut self, trimmed: &[DimensionKey], bases: &BaseTracker) {
        for dim in trimmed {
            for shape in &self.shapes {
                let Some(link) = dim.project(shape) else {
                    continue;
                };
                if link.is_empty() || !self.states.contains_key(&link) {
                    continue;
                }
                if !bases.iter().any(|(other, _)| other.contains(&link)) {
                    self.states.remove(&link);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

/// Live state of one key in the open bucket
#[derive(Debug, Clone)]
struct CurrentBucket {
    intervals: Vec<IntervalAggregator>,
    condition_timer: ConditionTimer,
    anomaly_eligible: bool,
}

impl CurrentBucket {
    fn new(num_fields: usize, condition: bool, ts_ns: i64) -> Self {
        Self {
            intervals: vec![IntervalAggregator::new(); num_fields],
            condition_timer: ConditionTimer::new(condition, ts_ns),
            anomaly_eligible: true,
        }
    }
}

/// Returned when the dimension guardrail invalidated the open bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GuardrailTripped;

/// Aggregation engine for one value metric.
///
/// Not internally synchronized; wrap it in a [`crate::metrics::MetricHandle`]
/// to share it between threads.
pub struct BucketAggregationEngine {
    config: MetricConfig,
    diff_opts: DiffOptions,
    clock: BucketClock,
    condition: ConditionState,
    condition_timer: ConditionTimer,
    bases: BaseTracker,
    current: AHashMap<MetricDimensionKey, CurrentBucket>,
    state_links: StateLinks,
    guardrail: GuardRail,
    full_bucket_guardrail: GuardRail,
    drop_log: DropEventLog,
    correction: CorrectionLedger,
    past_buckets: BTreeMap<MetricDimensionKey, Vec<PastBucket>>,
    skipped_buckets: Vec<SkippedBucketRecord>,
    current_full_bucket: AHashMap<MetricDimensionKey, i64>,
    full_bucket_tainted: bool,
    puller: Option<Arc<dyn Puller>>,
    anomaly_detectors: Vec<Box<dyn AnomalyDetector>>,
    stats: EngineStats,
}

impl BucketAggregationEngine {
    /// Create an engine whose first bucket opens at `start_ns`.
    ///
    /// Metrics without a condition ignore the configured initial condition
    /// and are always true. Pulled metrics require a puller.
    pub fn new(
        config: MetricConfig,
        time_base_ns: i64,
        start_ns: i64,
        puller: Option<Arc<dyn Puller>>,
    ) -> Result<Self> {
        config.validate()?;
        if config.pulled && puller.is_none() {
            return Err(StatError::MissingPuller {
                metric_id: config.id,
            });
        }

        let condition = if config.has_condition {
            config.initial_condition
        } else {
            ConditionState::True
        };
        let num_fields = config.value_fields.len();

        Ok(Self {
            diff_opts: DiffOptions {
                direction: config.direction,
                use_absolute_value_on_reset: config.use_absolute_value_on_reset,
                use_zero_default_base: config.use_zero_default_base,
            },
            clock: BucketClock::new(time_base_ns, config.bucket_size_ns(), start_ns),
            condition,
            condition_timer: ConditionTimer::new(condition.is_true(), start_ns),
            bases: BaseTracker::new(num_fields),
            current: AHashMap::new(),
            state_links: StateLinks::default(),
            guardrail: GuardRail::new(
                config.id,
                "bucket",
                config.dimension_soft_limit,
                config.dimension_hard_limit,
            ),
            full_bucket_guardrail: GuardRail::new(
                config.id,
                "full_bucket",
                config.dimension_soft_limit,
                config.dimension_hard_limit,
            ),
            drop_log: DropEventLog::new(config.max_drop_events_per_bucket),
            correction: CorrectionLedger::new(config.condition_correction_threshold_ns()),
            past_buckets: BTreeMap::new(),
            skipped_buckets: Vec::new(),
            current_full_bucket: AHashMap::new(),
            full_bucket_tainted: false,
            puller,
            anomaly_detectors: Vec::new(),
            stats: EngineStats::default(),
            config,
        })
    }

    /// Register an anomaly detector
    #[must_use]
    pub fn with_anomaly_detector(mut self, detector: Box<dyn AnomalyDetector>) -> Self {
        self.anomaly_detectors.push(detector);
        self
    }

    /// Seed diff bases before the first event: one pull at the first
    /// bucket's start when the metric is pulled, diffed and true.
    pub fn prepare_first_bucket(&mut self) {
        if self.config.pulled && self.config.use_diff && self.condition.is_true() {
            let ts = self.clock.current_bucket_start_ns();
            self.pull_and_accumulate(ts);
        }
    }

    /// Metric configuration
    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    /// Current condition
    pub fn condition(&self) -> ConditionState {
        self.condition
    }

    /// Number of the open bucket
    pub fn current_bucket_num(&self) -> i64 {
        self.clock.current_bucket_num()
    }

    /// Start of the open bucket
    pub fn current_bucket_start_ns(&self) -> i64 {
        self.clock.current_bucket_start_ns()
    }

    /// Whether the open bucket has been invalidated
    pub fn is_current_bucket_skipped(&self) -> bool {
        self.drop_log.is_skipped()
    }

    /// Whether a trustworthy global base exists
    pub fn has_global_base(&self) -> bool {
        self.bases.has_global_base()
    }

    /// Keys tracked in the open bucket
    pub fn dimension_count(&self) -> usize {
        self.current.len()
    }

    /// Finalized buckets not yet erased by a dump
    pub fn past_buckets(&self) -> &BTreeMap<MetricDimensionKey, Vec<PastBucket>> {
        &self.past_buckets
    }

    /// Skipped buckets not yet erased by a dump
    pub fn skipped_buckets(&self) -> &[SkippedBucketRecord] {
        &self.skipped_buckets
    }

    /// Lifetime counters
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Classify a raw event and aggregate it if it belongs to this metric
    pub fn on_log_event<M: EventMatcher>(&mut self, matcher: &M, event: &M::Event, ts_ns: i64) {
        if let Some(sample) = matcher.matches(event) {
            self.on_matched_event(&sample, ts_ns);
        }
    }

    /// Aggregate one pushed sample
    pub fn on_matched_event(&mut self, sample: &Sample, ts_ns: i64) {
        if self.config.pulled {
            tracing::debug!(metric_id = self.config.id, "pushed event ignored by pulled metric");
            return;
        }
        self.flush_if_needed(ts_ns, ts_ns);
        if self.clock.is_event_late(ts_ns) {
            self.reject_late(ts_ns);
            return;
        }
        if !self.condition.is_true() {
            tracing::trace!(metric_id = self.config.id, "event skipped, condition not true");
            return;
        }
        // A single pushed sample can trip the guardrail; the bucket is already
        // invalidated in that case.
        let _ = self.aggregate_sample(sample, ts_ns, true);
    }

    /// Deliver a scheduled pull.
    ///
    /// The data is credited to the bucket ending at the boundary the pull was
    /// scheduled for, even when it completes later; the bucket closes at
    /// `actual_ns` and the lag is accounted as a condition correction.
    pub fn on_data_pulled(
        &mut self,
        result: std::result::Result<Vec<Sample>, PullFailure>,
        scheduled_ns: i64,
        actual_ns: i64,
    ) {
        self.stats.pulls += 1;
        let event_ts = self.clock.previous_bucket_end_time(scheduled_ns) - 1;

        if self.clock.is_event_late(event_ts) {
            self.reject_late(actual_ns);
        } else {
            match result {
                Err(failure) => {
                    tracing::warn!(metric_id = self.config.id, error = %failure, "scheduled pull failed");
                    self.stats.failed_pulls += 1;
                    self.invalidate(DropReason::PullFailed, actual_ns);
                    self.bases.reset_base(None);
                },
                Ok(samples) => {
                    let delay_ns = actual_ns - scheduled_ns;
                    if delay_ns > self.config.max_pull_delay_ns() {
                        tracing::info!(
                            metric_id = self.config.id,
                            delay_ns,
                            "pull exceeded maximum delay"
                        );
                        self.invalidate(DropReason::PullDelayed, actual_ns);
                        self.bases.reset_base(None);
                    } else {
                        self.accumulate_pulled(&samples, event_ts);
                    }
                },
            }
        }

        self.flush_if_needed(actual_ns, actual_ns);
    }

    /// Switch the gating condition at `ts_ns`
    pub fn on_condition_changed(&mut self, condition: bool, ts_ns: i64) {
        let new_condition = ConditionState::from(condition);
        let mut ts_ns = ts_ns;
        let late = self.clock.is_event_late(ts_ns);
        if late {
            self.reject_late(ts_ns);
            ts_ns = self.clock.current_bucket_start_ns();
        }

        if self.condition == ConditionState::Unknown {
            // The open bucket was partly untracked
            self.invalidate(DropReason::ConditionUnknown, ts_ns);
        }

        self.flush_if_needed(ts_ns, ts_ns);
        if self.condition == new_condition {
            return;
        }

        let was_true = self.condition.is_true();
        if !late && self.config.pulled && self.config.use_diff && (was_true || condition) {
            // Pull under the old condition: true->false closes the last diff,
            // false->true only seeds bases.
            self.pull_and_accumulate(ts_ns);
        }
        if self.config.use_diff && was_true && !condition {
            self.bases.reset_base(None);
        }

        self.condition = new_condition;
        self.condition_timer.on_condition_changed(condition, ts_ns);
        for (dim, info) in self.bases.iter() {
            let key = MetricDimensionKey::new(dim.clone(), info.current_state.clone());
            if let Some(bucket) = self.current.get_mut(&key) {
                bucket.condition_timer.on_condition_changed(condition, ts_ns);
            }
        }
    }

    /// Apply a state feed update for every dimension linked to `primary_key`.
    ///
    /// An empty primary key links every dimension.
    pub fn on_state_changed(&mut self, ts_ns: i64, primary_key: &DimensionKey, new_state: StateKey) {
        if !self.config.is_state_sliced() {
            return;
        }
        let new_state = new_state.remapped(&self.config.state_value_map);

        self.flush_if_needed(ts_ns, ts_ns);
        if self.clock.is_event_late(ts_ns) {
            self.reject_late(ts_ns);
            return;
        }

        self.state_links.set(primary_key, new_state.clone());

        if self.config.pulled && self.config.use_diff && self.condition.is_true() {
            // Credit the diff so far to the old state
            self.pull_and_accumulate(ts_ns);
        }

        let condition = self.condition.is_true();
        let linked: Vec<DimensionKey> = self
            .bases
            .iter()
            .filter(|(dim, _)| dim.contains(primary_key))
            .map(|(dim, _)| dim.clone())
            .collect();

        for dim in linked {
            let Some(info) = self.bases.get_mut(&dim) else {
                continue;
            };
            info.has_current_state = true;
            let old_state = std::mem::replace(&mut info.current_state, new_state.clone());
            if old_state == new_state {
                continue;
            }

            let old_key = MetricDimensionKey::new(dim.clone(), old_state);
            if let Some(bucket) = self.current.get_mut(&old_key) {
                bucket.condition_timer.on_condition_changed(false, ts_ns);
            }

            let new_key = MetricDimensionKey::new(dim, new_state.clone());
            let existed = self.current.contains_key(&new_key);
            if self.ensure_current_bucket(&new_key, ts_ns).is_err() {
                break;
            }
            if existed {
                if let Some(bucket) = self.current.get_mut(&new_key) {
                    bucket.condition_timer.on_condition_changed(condition, ts_ns);
                }
            }
        }
    }

    /// Close the open bucket early at `ts_ns`, e.g. on a process restart.
    /// The bucket number does not advance.
    pub fn split_bucket(&mut self, ts_ns: i64) {
        if self.clock.is_event_late(ts_ns) {
            self.reject_late(ts_ns);
            return;
        }
        self.flush_if_needed(ts_ns, ts_ns);
        if self.config.pulled && self.config.use_diff && self.condition.is_true() {
            self.pull_and_accumulate(ts_ns);
        }
        if ts_ns > self.clock.current_bucket_start_ns() {
            self.flush_current_bucket(ts_ns, ts_ns, ts_ns);
        }
    }

    /// Produce the report of everything closed so far
    pub fn dump_report(
        &mut self,
        now_ns: i64,
        include_current_partial_bucket: bool,
        erase_data: bool,
        latency: DumpLatency,
    ) -> MetricReport {
        self.flush_if_needed(now_ns, now_ns);

        if include_current_partial_bucket && now_ns > self.clock.current_bucket_start_ns() {
            if self.config.pulled && self.condition.is_true() {
                match latency {
                    DumpLatency::Fast => {
                        self.invalidate(DropReason::DumpReportRequested, now_ns);
                        self.bases.reset_base(None);
                    },
                    DumpLatency::NoTimeConstraints => self.pull_and_accumulate(now_ns),
                }
            }
            self.flush_current_bucket(now_ns, now_ns, now_ns);
        }

        let report = MetricReport::build(self.config.id, &self.past_buckets, &self.skipped_buckets);
        if erase_data {
            self.past_buckets.clear();
            self.skipped_buckets.clear();
        }
        report
    }

    fn reject_late(&mut self, ts_ns: i64) {
        tracing::debug!(
            metric_id = self.config.id,
            ts_ns,
            bucket_start_ns = self.clock.current_bucket_start_ns(),
            "input for an already closed bucket"
        );
        self.stats.late_events += 1;
        self.invalidate(DropReason::EventInWrongBucket, ts_ns);
        self.bases.reset_base(None);
    }

    fn invalidate(&mut self, reason: DropReason, ts_ns: i64) {
        if self.drop_log.record(reason, ts_ns) {
            tracing::info!(
                metric_id = self.config.id,
                bucket_num = self.clock.current_bucket_num(),
                reason = %reason,
                "bucket invalidated"
            );
        }
    }

    fn pull_and_accumulate(&mut self, ts_ns: i64) {
        let Some(puller) = self.puller.clone() else {
            return;
        };
        self.stats.pulls += 1;
        match puller.pull(self.config.id, ts_ns) {
            Ok(samples) => self.accumulate_pulled(&samples, ts_ns),
            Err(failure) => {
                tracing::warn!(metric_id = self.config.id, error = %failure, "pull failed");
                self.stats.failed_pulls += 1;
                self.invalidate(DropReason::PullFailed, ts_ns);
                self.bases.reset_base(None);
            },
        }
    }

    fn accumulate_pulled(&mut self, samples: &[Sample], ts_ns: i64) {
        if self.clock.is_event_late(ts_ns) {
            self.reject_late(ts_ns);
            return;
        }
        if samples.is_empty() {
            self.invalidate(DropReason::NoData, ts_ns);
            self.bases.reset_base(None);
            return;
        }

        let condition = self.condition.is_true();
        if !condition && !self.config.use_diff {
            return;
        }

        let mut seen = AHashSet::with_capacity(samples.len());
        for sample in samples {
            seen.insert(sample.what.clone());
            if self.aggregate_sample(sample, ts_ns, condition).is_err() {
                return;
            }
        }

        if self.config.use_diff {
            let missing: Vec<DimensionKey> = self
                .bases
                .iter()
                .filter(|(dim, _)| !seen.contains(*dim))
                .map(|(dim, _)| dim.clone())
                .collect();
            for dim in missing {
                self.bases.reset_base(Some(&dim));
                if self.config.missing_dimension_policy == MissingDimensionPolicy::StopConditionTimer {
                    if let Some(info) = self.bases.get(&dim) {
                        let key = MetricDimensionKey::new(dim.clone(), info.current_state.clone());
                        if let Some(bucket) = self.current.get_mut(&key) {
                            bucket.condition_timer.on_condition_changed(false, ts_ns);
                        }
                    }
                }
            }
        }

        self.bases.set_global_base(true);
    }

    fn initial_state_for(&self, dim: &DimensionKey) -> StateKey {
        if !self.config.is_state_sliced() {
            return StateKey::default();
        }
        self.state_links
            .lookup(dim)
            .cloned()
            .unwrap_or_else(|| StateKey::unknown(&self.config.state_atoms))
    }

    fn aggregate_sample(
        &mut self,
        sample: &Sample,
        ts_ns: i64,
        condition: bool,
    ) -> std::result::Result<(), GuardrailTripped> {
        let dim = &sample.what;
        let initial_state = self.initial_state_for(dim);
        let info = self.bases.get_or_insert(dim, initial_state);
        info.seen_new_data = true;
        let state = info.current_state.clone();

        if !condition {
            // Only refresh bases so the next true period diffs from here
            for (index, &field) in self.config.value_fields.iter().enumerate() {
                if let Some(&raw) = sample.values.get(field) {
                    self.bases.set_base(dim, index, raw);
                }
            }
            return Ok(());
        }

        let key = MetricDimensionKey::new(dim.clone(), state);
        self.ensure_current_bucket(&key, ts_ns)?;

        for (index, &field) in self.config.value_fields.iter().enumerate() {
            let Some(&raw) = sample.values.get(field) else {
                tracing::debug!(metric_id = self.config.id, field, "sample lacks value field");
                continue;
            };

            let value = if self.config.use_diff {
                match self.bases.update(dim, index, raw, self.diff_opts) {
                    DiffOutcome::Diff(diff) => diff,
                    DiffOutcome::Seeded => continue,
                    DiffOutcome::Reset => {
                        tracing::debug!(metric_id = self.config.id, %dim, "value moved against direction");
                        if index == 0 {
                            if let Some(bucket) = self.current.get_mut(&key) {
                                bucket.anomaly_eligible = false;
                            }
                        }
                        continue;
                    },
                }
            } else {
                raw
            };

            if let Some(bucket) = self.current.get_mut(&key) {
                bucket.intervals[index].add(value, self.config.aggregation);
            }
        }

        if let Some(bucket) = self.current.get_mut(&key) {
            if !bucket.condition_timer.is_true() {
                bucket.condition_timer.on_condition_changed(true, ts_ns);
            }
        }
        Ok(())
    }

    fn ensure_current_bucket(
        &mut self,
        key: &MetricDimensionKey,
        ts_ns: i64,
    ) -> std::result::Result<(), GuardrailTripped> {
        let is_new = !self.current.contains_key(key);
        match self.guardrail.check(self.current.len(), is_new) {
            Admission::Existing => Ok(()),
            Admission::Admitted | Admission::AdmittedOverSoftLimit => {
                let bucket = CurrentBucket::new(
                    self.config.value_fields.len(),
                    self.condition.is_true(),
                    ts_ns,
                );
                self.current.insert(key.clone(), bucket);
                self.stats.max_dimensions = self.stats.max_dimensions.max(self.current.len());
                Ok(())
            },
            Admission::Rejected { first_in_window } => {
                self.stats.guardrail_rejections += 1;
                if first_in_window {
                    self.invalidate(DropReason::DimensionGuardrailReached, ts_ns);
                    self.current.clear();
                    self.bases.reset_base(None);
                }
                Err(GuardrailTripped)
            },
        }
    }

    fn flush_if_needed(&mut self, ts_ns: i64, data_end_ns: i64) {
        if ts_ns < self.clock.current_bucket_end_ns() {
            return;
        }
        let next_start = self.clock.next_bucket_start_ns(ts_ns);
        self.flush_current_bucket(ts_ns, next_start, data_end_ns);
    }

    fn flush_current_bucket(&mut self, event_ts_ns: i64, next_start_ns: i64, data_end_ns: i64) {
        let start_ns = self.clock.current_bucket_start_ns();
        let full_end_ns = self.clock.current_bucket_end_ns();
        let bucket_end_ns = event_ts_ns.min(full_end_ns);
        let forward = self.clock.buckets_forward(event_ts_ns);

        if forward > 1 && self.config.use_diff {
            self.invalidate(DropReason::MultipleBucketsSkipped, event_ts_ns);
        }
        if self.config.has_condition && self.condition == ConditionState::Unknown {
            self.invalidate(DropReason::ConditionUnknown, event_ts_ns);
        }
        if bucket_end_ns - start_ns < self.config.min_bucket_size_ns() {
            self.invalidate(DropReason::BucketTooSmall, event_ts_ns);
        }

        let data_end_ns = if self.config.pulled {
            data_end_ns.max(next_start_ns)
        } else {
            next_start_ns
        };
        let metric_info = self.condition_timer.new_bucket_start(next_start_ns, data_end_ns);
        let mut valid = !self.drop_log.is_skipped();
        let sliced = self.config.is_state_sliced();
        let mut has_data = false;

        for (key, bucket) in &mut self.current {
            let info = if sliced {
                bucket.condition_timer.new_bucket_start(next_start_ns, data_end_ns)
            } else {
                metric_info
            };
            if !valid {
                continue;
            }
            if let Some(past) =
                finalize_bucket(&self.config, &mut self.correction, bucket, start_ns, bucket_end_ns, info)
            {
                self.past_buckets.entry(key.clone()).or_default().push(past);
                has_data = true;
            }
        }
        if valid && !has_data {
            self.invalidate(DropReason::NoData, event_ts_ns);
            valid = false;
        }

        if let Some(record) = self.drop_log.take(start_ns, bucket_end_ns) {
            self.stats.invalidated_buckets += 1;
            self.skipped_buckets.push(record);
        } else {
            self.stats.flushed_buckets += 1;
        }
        tracing::trace!(
            metric_id = self.config.id,
            bucket_num = self.clock.current_bucket_num(),
            start_ns,
            end_ns = bucket_end_ns,
            valid,
            "bucket closed"
        );

        self.append_to_full_bucket(event_ts_ns >= full_end_ns, valid);
        self.start_next_bucket();
        self.clock.advance(next_start_ns, forward);
    }

    fn append_to_full_bucket(&mut self, full_bucket_reached: bool, valid: bool) {
        if !valid {
            if full_bucket_reached {
                self.clear_full_bucket();
            } else {
                self.full_bucket_tainted = true;
            }
            return;
        }

        let aggregation = self.config.aggregation;
        let values: Vec<(MetricDimensionKey, i64)> = self
            .current
            .iter()
            .filter(|(_, bucket)| bucket.anomaly_eligible)
            .filter_map(|(key, bucket)| {
                let value = bucket.intervals.first()?.finalize(aggregation)?;
                Some((key.clone(), value.as_i64()))
            })
            .collect();

        if !full_bucket_reached {
            self.add_to_full_bucket(values);
            return;
        }

        let bucket_num = self.clock.current_bucket_num();
        if self.full_bucket_tainted {
            self.clear_full_bucket();
            return;
        }
        if self.current_full_bucket.is_empty() {
            self.notify_anomaly_detectors(&values, bucket_num);
        } else {
            self.add_to_full_bucket(values);
            let full: Vec<(MetricDimensionKey, i64)> = self.current_full_bucket.drain().collect();
            self.notify_anomaly_detectors(&full, bucket_num);
            self.clear_full_bucket();
        }
    }

    fn add_to_full_bucket(&mut self, values: Vec<(MetricDimensionKey, i64)>) {
        for (key, value) in values {
            let is_new = !self.current_full_bucket.contains_key(&key);
            match self.full_bucket_guardrail.check(self.current_full_bucket.len(), is_new) {
                Admission::Rejected { .. } => continue,
                _ => *self.current_full_bucket.entry(key).or_insert(0) += value,
            }
        }
    }

    fn clear_full_bucket(&mut self) {
        self.current_full_bucket.clear();
        self.full_bucket_tainted = false;
        self.full_bucket_guardrail.reset_window();
    }

    fn notify_anomaly_detectors(&mut self, values: &[(MetricDimensionKey, i64)], bucket_num: i64) {
        for detector in &mut self.anomaly_detectors {
            for (key, value) in values {
                detector.add_past_bucket(key, *value, bucket_num);
            }
        }
    }

    fn start_next_bucket(&mut self) {
        let trimmed = self.bases.trim_unseen();
        if !trimmed.is_empty() {
            self.state_links.prune(&trimmed, &self.bases);
            tracing::trace!(
                metric_id = self.config.id,
                count = trimmed.len(),
                state_links = self.state_links.len(),
                "trimmed idle dimensions"
            );
        }

        let bases = &self.bases;
        self.current.retain(|key, _| {
            bases
                .get(&key.what)
                .map_or(false, |info| info.current_state == key.state)
        });
        for bucket in self.current.values_mut() {
            bucket.intervals.iter_mut().for_each(IntervalAggregator::reset);
            bucket.anomaly_eligible = true;
        }
        self.guardrail.reset_window();
    }
}

fn finalize_bucket(
    config: &MetricConfig,
    correction: &mut CorrectionLedger,
    bucket: &CurrentBucket,
    start_ns: i64,
    end_ns: i64,
    info: ConditionDurationInfo,
) -> Option<PastBucket> {
    let aggregation = config.aggregation;
    if let Some(threshold) = &config.upload_threshold {
        let gate = bucket.intervals.first()?.finalize(aggregation)?;
        if !threshold.passes(gate) {
            return None;
        }
    }

    let skip_zero = config.use_diff && config.skip_zero_diff_output;
    let values: Vec<FieldAggregate> = bucket
        .intervals
        .iter()
        .enumerate()
        .filter_map(|(index, interval)| {
            let value = interval.finalize(aggregation)?;
            (!(skip_zero && value.is_zero())).then_some(FieldAggregate { index, value })
        })
        .collect();
    if values.is_empty() {
        return None;
    }

    Some(PastBucket {
        start_ns,
        end_ns,
        values,
        condition_true_ns: info.duration_ns,
        condition_correction_ns: correction.record(info.correction_ns),
    })
}
