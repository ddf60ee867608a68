//! Configuration management for statbucket.
//!
//! This module provides:
//! - YAML file support
//! - Per-metric load-time options
//! - Validation and defaults

use crate::core::{Result, StatError};
use crate::metrics::base::ValueDirection;
use crate::metrics::condition::ConditionState;
use crate::metrics::interval::{Aggregation, UploadThreshold};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default number of drop events kept per skipped bucket
pub const DEFAULT_MAX_DROP_EVENTS: usize = 10;

/// Complete configuration for a statbucket process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics to run
    pub metrics: Vec<MetricConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Emit JSON-ish structured lines instead of the compact format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-bucket detail
    Trace,
    /// Per-sample rejections
    Debug,
    /// Invalidations and lifecycle
    Info,
    /// Guardrails and failed pulls
    Warn,
    /// Errors only
    Error,
}

/// What happens to a dimension that a successful diffed pull round did not contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDimensionPolicy {
    /// Drop the diff base only; the condition timer keeps running
    #[default]
    ResetBase,
    /// Drop the diff base and stop the dimension's condition timer at the round time
    StopConditionTimer,
}

/// Load-time options of one value metric. Immutable for the metric's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Metric id
    pub id: i64,
    /// Bucket size
    #[serde(with = "humantime_serde")]
    pub bucket_size: Duration,
    /// Indices into a sample's value fields that are aggregated
    pub value_fields: Vec<usize>,
    /// Statistic computed per field
    pub aggregation: Aggregation,
    /// Values come from a puller rather than pushed events
    pub pulled: bool,
    /// Report deltas between consecutive raw values
    pub use_diff: bool,
    /// Expected direction of raw values in diff mode
    pub direction: ValueDirection,
    /// New dimensions use a zero base once the metric has a global base
    pub use_zero_default_base: bool,
    /// On a counter reset, report the new raw value instead of dropping it
    pub use_absolute_value_on_reset: bool,
    /// Do not report fields whose diff is exactly zero
    pub skip_zero_diff_output: bool,
    /// Metric is gated by a condition
    pub has_condition: bool,
    /// Condition before the first condition change
    pub initial_condition: ConditionState,
    /// State atoms the metric is sliced by
    pub state_atoms: Vec<u32>,
    /// Raw state value to state group remapping
    pub state_value_map: HashMap<i64, i64>,
    /// Pulls completing later than this past their schedule are discarded
    #[serde(with = "humantime_serde")]
    pub max_pull_delay: Duration,
    /// Buckets shorter than this are dropped
    #[serde(with = "humantime_serde")]
    pub min_bucket_size: Duration,
    /// Gate on the first value field
    pub upload_threshold: Option<UploadThreshold>,
    /// Minimum absolute condition correction that is reported
    #[serde(with = "humantime_serde")]
    pub condition_correction_threshold: Option<Duration>,
    /// Dimension count above which growth is noted
    pub dimension_soft_limit: usize,
    /// Dimension count above which the bucket is invalidated
    pub dimension_hard_limit: usize,
    /// Drop events kept per skipped bucket
    pub max_drop_events_per_bucket: usize,
    /// Handling of dimensions missing from a diffed pull
    pub missing_dimension_policy: MissingDimensionPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        MetricConfig {
            id: 0,
            bucket_size: Duration::from_secs(60),
            value_fields: Vec::new(),
            aggregation: Aggregation::Sum,
            pulled: false,
            use_diff: false,
            direction: ValueDirection::Increasing,
            use_zero_default_base: false,
            use_absolute_value_on_reset: false,
            skip_zero_diff_output: false,
            has_condition: false,
            initial_condition: ConditionState::Unknown,
            state_atoms: Vec::new(),
            state_value_map: HashMap::new(),
            max_pull_delay: Duration::from_secs(30),
            min_bucket_size: Duration::ZERO,
            upload_threshold: None,
            condition_correction_threshold: None,
            dimension_soft_limit: 500,
            dimension_hard_limit: 800,
            max_drop_events_per_bucket: DEFAULT_MAX_DROP_EVENTS,
            missing_dimension_policy: MissingDimensionPolicy::ResetBase,
        }
    }
}

fn duration_ns(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

impl MetricConfig {
    /// Bucket size in nanoseconds
    pub fn bucket_size_ns(&self) -> i64 {
        duration_ns(self.bucket_size)
    }

    /// Maximum pull delay in nanoseconds
    pub fn max_pull_delay_ns(&self) -> i64 {
        duration_ns(self.max_pull_delay)
    }

    /// Minimum bucket size in nanoseconds
    pub fn min_bucket_size_ns(&self) -> i64 {
        duration_ns(self.min_bucket_size)
    }

    /// Condition correction threshold in nanoseconds, if set
    pub fn condition_correction_threshold_ns(&self) -> Option<i64> {
        self.condition_correction_threshold.map(duration_ns)
    }

    /// Returns true if the metric is sliced by state
    pub fn is_state_sliced(&self) -> bool {
        !self.state_atoms.is_empty()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let id = self.id;
        if self.bucket_size.is_zero() {
            return Err(StatError::config(format!("metric {id}: bucket_size must be greater than 0")));
        }

        if self.value_fields.is_empty() {
            return Err(StatError::config(format!("metric {id}: value_fields must not be empty")));
        }

        let mut seen = Vec::with_capacity(self.value_fields.len());
        for &field in &self.value_fields {
            if seen.contains(&field) {
                return Err(StatError::DuplicateValueField {
                    metric_id: id,
                    field,
                });
            }
            seen.push(field);
        }

        if self.dimension_hard_limit == 0 {
            return Err(StatError::config(format!(
                "metric {id}: dimension_hard_limit must be greater than 0"
            )));
        }

        if self.dimension_soft_limit > self.dimension_hard_limit {
            return Err(StatError::GuardrailLimits {
                metric_id: id,
                soft: self.dimension_soft_limit,
                hard: self.dimension_hard_limit,
            });
        }

        if !self.use_diff {
            let diff_only = [
                ("skip_zero_diff_output", self.skip_zero_diff_output),
                ("use_zero_default_base", self.use_zero_default_base),
                ("use_absolute_value_on_reset", self.use_absolute_value_on_reset),
            ];
            if let Some((name, _)) = diff_only.iter().find(|(_, set)| *set) {
                return Err(StatError::config(format!(
                    "metric {id}: {name} requires use_diff"
                )));
            }
        }

        if !self.state_value_map.is_empty() && !self.is_state_sliced() {
            return Err(StatError::config(format!(
                "metric {id}: state_value_map set but the metric is not sliced by state"
            )));
        }

        if self.min_bucket_size >= self.bucket_size {
            return Err(StatError::config(format!(
                "metric {id}: min_bucket_size must be smaller than bucket_size"
            )));
        }

        if let Some(threshold) = &self.upload_threshold {
            if threshold.value.is_nan() {
                return Err(StatError::config(format!("metric {id}: upload_threshold is NaN")));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Validate every metric and check ids are unique
    pub fn validate(&self) -> Result<()> {
        let mut ids = Vec::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            metric.validate()?;
            if ids.contains(&metric.id) {
                return Err(StatError::config(format!("duplicate metric id {}", metric.id)));
            }
            ids.push(metric.id);
        }
        Ok(())
    }

    /// Look up a metric by id
    pub fn metric(&self, id: i64) -> Option<&MetricConfig> {
        self.metrics.iter().find(|m| m.id == id)
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for file and string sources
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| StatError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub fn from_file(self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml(&content)
    }

    /// Set log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Add a metric
    pub fn metric(mut self, metric: MetricConfig) -> Self {
        self.config.metrics.push(metric);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder for a single metric's options
pub struct MetricConfigBuilder {
    config: MetricConfig,
}

impl MetricConfigBuilder {
    /// Start a metric with the given id and defaults
    pub fn new(id: i64) -> Self {
        MetricConfigBuilder {
            config: MetricConfig {
                id,
                ..MetricConfig::default()
            },
        }
    }

    /// Set bucket size
    pub fn bucket_size(mut self, size: Duration) -> Self {
        self.config.bucket_size = size;
        self
    }

    /// Set aggregated value fields
    pub fn value_fields(mut self, fields: Vec<usize>) -> Self {
        self.config.value_fields = fields;
        self
    }

    /// Set aggregation kind
    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.config.aggregation = aggregation;
        self
    }

    /// Mark the metric as pulled
    pub fn pulled(mut self, pulled: bool) -> Self {
        self.config.pulled = pulled;
        self
    }

    /// Enable diff mode with the given direction
    pub fn diff(mut self, direction: ValueDirection) -> Self {
        self.config.use_diff = true;
        self.config.direction = direction;
        self
    }

    /// Use a zero base for new dimensions once a global base exists
    pub fn use_zero_default_base(mut self, enable: bool) -> Self {
        self.config.use_zero_default_base = enable;
        self
    }

    /// Report the raw value on counter resets
    pub fn use_absolute_value_on_reset(mut self, enable: bool) -> Self {
        self.config.use_absolute_value_on_reset = enable;
        self
    }

    /// Skip zero diffs in the output
    pub fn skip_zero_diff_output(mut self, enable: bool) -> Self {
        self.config.skip_zero_diff_output = enable;
        self
    }

    /// Gate the metric by a condition
    pub fn has_condition(mut self, enable: bool) -> Self {
        self.config.has_condition = enable;
        self
    }

    /// Set the condition in force when the metric starts
    pub fn initial_condition(mut self, condition: ConditionState) -> Self {
        self.config.initial_condition = condition;
        self
    }

    /// Slice by the given state atoms
    pub fn state_atoms(mut self, atoms: Vec<u32>) -> Self {
        self.config.state_atoms = atoms;
        self
    }

    /// Remap raw state values into groups
    pub fn state_value_map(mut self, map: HashMap<i64, i64>) -> Self {
        self.config.state_value_map = map;
        self
    }

    /// Set maximum pull delay
    pub fn max_pull_delay(mut self, delay: Duration) -> Self {
        self.config.max_pull_delay = delay;
        self
    }

    /// Set minimum bucket size
    pub fn min_bucket_size(mut self, size: Duration) -> Self {
        self.config.min_bucket_size = size;
        self
    }

    /// Set upload threshold
    pub fn upload_threshold(mut self, threshold: UploadThreshold) -> Self {
        self.config.upload_threshold = Some(threshold);
        self
    }

    /// Set condition correction threshold
    pub fn condition_correction_threshold(mut self, threshold: Duration) -> Self {
        self.config.condition_correction_threshold = Some(threshold);
        self
    }

    /// Set dimension soft and hard limits
    pub fn dimension_limits(mut self, soft: usize, hard: usize) -> Self {
        self.config.dimension_soft_limit = soft;
        self.config.dimension_hard_limit = hard;
        self
    }

    /// Set missing dimension policy
    pub fn missing_dimension_policy(mut self, policy: MissingDimensionPolicy) -> Self {
        self.config.missing_dimension_policy = policy;
        self
    }

    /// Build and validate the metric configuration
    pub fn build(self) -> Result<MetricConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
