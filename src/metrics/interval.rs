//! Per-field statistics for the open bucket.

use crate::core::types::Value;
use serde::{Deserialize, Serialize};

/// Statistic computed over a bucket's samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Sum of samples
    #[default]
    Sum,
    /// Smallest sample
    Min,
    /// Largest sample
    Max,
    /// Arithmetic mean, always reported as a real
    Avg,
}

/// Comparison used by the upload threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdOp {
    /// value < threshold
    Lt,
    /// value <= threshold
    Lte,
    /// value > threshold
    Gt,
    /// value >= threshold
    Gte,
}

/// Predicate on the finalized first value field of a key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UploadThreshold {
    /// Comparison
    pub op: ThresholdOp,
    /// Literal compared against
    pub value: f64,
}

impl UploadThreshold {
    /// Returns true if `value` may be uploaded
    pub fn passes(&self, value: Value) -> bool {
        let v = value.as_f64();
        match self.op {
            ThresholdOp::Lt => v < self.value,
            ThresholdOp::Lte => v <= self.value,
            ThresholdOp::Gt => v > self.value,
            ThresholdOp::Gte => v >= self.value,
        }
    }
}

/// Running statistic of one value field for one key
#[derive(Debug, Clone, Default)]
pub struct IntervalAggregator {
    aggregate: Option<Value>,
    sample_count: u64,
}

impl IntervalAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample in
    pub fn add(&mut self, value: Value, aggregation: Aggregation) {
        self.aggregate = Some(match self.aggregate {
            None => value,
            Some(current) => match aggregation {
                Aggregation::Sum | Aggregation::Avg => current + value,
                Aggregation::Min => current.min(value),
                Aggregation::Max => current.max(value),
            },
        });
        self.sample_count += 1;
    }

    /// Returns true if at least one sample was added
    pub fn has_value(&self) -> bool {
        self.aggregate.is_some()
    }

    /// Number of samples added
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Final statistic, or `None` if nothing was added
    pub fn finalize(&self, aggregation: Aggregation) -> Option<Value> {
        let aggregate = self.aggregate?;
        Some(match aggregation {
            Aggregation::Sum | Aggregation::Min | Aggregation::Max => aggregate,
            Aggregation::Avg => aggregate.mean(self.sample_count),
        })
    }

    /// Forget all samples
    pub fn reset(&mut self) {
        self.aggregate = None;
        self.sample_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(aggregation: Aggregation, values: &[i64]) -> Option<Value> {
        let mut interval = IntervalAggregator::new();
        for &v in values {
            interval.add(Value::Int(v), aggregation);
        }
        interval.finalize(aggregation)
    }

    #[test]
    fn test_aggregations() {
        assert_eq!(fold(Aggregation::Sum, &[3, 5, 1]), Some(Value::Int(9)));
        assert_eq!(fold(Aggregation::Min, &[3, 5, 1]), Some(Value::Int(1)));
        assert_eq!(fold(Aggregation::Max, &[3, 5, 1]), Some(Value::Int(5)));
        assert_eq!(fold(Aggregation::Avg, &[3, 5, 1]), Some(Value::Double(3.0)));
        assert_eq!(fold(Aggregation::Sum, &[]), None);
    }

    #[test]
    fn test_reset() {
        let mut interval = IntervalAggregator::new();
        interval.add(Value::Double(1.5), Aggregation::Sum);
        assert!(interval.has_value());
        assert_eq!(interval.sample_count(), 1);
        interval.reset();
        assert!(!interval.has_value());
        assert_eq!(interval.finalize(Aggregation::Sum), None);
    }

    #[test]
    fn test_threshold_ops() {
        let gt = UploadThreshold {
            op: ThresholdOp::Gt,
            value: 5.0,
        };
        assert!(gt.passes(Value::Int(6)));
        assert!(!gt.passes(Value::Int(5)));

        let lte = UploadThreshold {
            op: ThresholdOp::Lte,
            value: 5.0,
        };
        assert!(lte.passes(Value::Double(5.0)));
        assert!(!lte.passes(Value::Double(5.1)));
    }
}
