//! Condition-true duration accounting within a bucket.

use serde::{Deserialize, Serialize};

/// Tri-state gating condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionState {
    /// Condition not yet known
    #[default]
    Unknown,
    /// Condition holds
    True,
    /// Condition does not hold
    False,
}

impl ConditionState {
    /// Returns true only for `True`
    pub fn is_true(self) -> bool {
        self == ConditionState::True
    }
}

impl From<bool> for ConditionState {
    fn from(value: bool) -> Self {
        if value {
            ConditionState::True
        } else {
            ConditionState::False
        }
    }
}

/// Durations flushed from a timer at a bucket boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionDurationInfo {
    /// Condition-true time attributed to the closing bucket
    pub duration_ns: i64,
    /// Signed correction for data that arrived after the boundary
    pub correction_ns: i64,
}

/// Accumulates how long a condition was true within the open bucket
#[derive(Debug, Clone)]
pub struct ConditionTimer {
    condition: bool,
    timer_ns: i64,
    last_change_ns: i64,
    // Condition-true time between the open bucket's start and the late pull
    // that closed the previous bucket; that time was credited to the previous
    // bucket's data.
    start_delay_true_ns: i64,
}

impl ConditionTimer {
    /// Create a timer in `condition`, counting from `start_ns`
    pub fn new(condition: bool, start_ns: i64) -> Self {
        Self {
            condition,
            timer_ns: 0,
            last_change_ns: start_ns,
            start_delay_true_ns: 0,
        }
    }

    /// Current condition
    pub fn is_true(&self) -> bool {
        self.condition
    }

    /// Time accumulated so far in the open bucket, excluding a running interval
    pub fn accumulated_ns(&self) -> i64 {
        self.timer_ns
    }

    /// Switch the condition at `ts_ns`; no-op if unchanged
    pub fn on_condition_changed(&mut self, condition: bool, ts_ns: i64) {
        if condition == self.condition {
            return;
        }
        if self.condition {
            self.timer_ns += ts_ns - self.last_change_ns;
        }
        self.condition = condition;
        self.last_change_ns = ts_ns;
    }

    /// Close the bucket at `next_bucket_start_ns` and start the next one.
    ///
    /// `data_end_ns` is when the data closing the bucket was actually
    /// captured; it is later than the boundary for a delayed pull and equal
    /// to it otherwise.
    pub fn new_bucket_start(&mut self, next_bucket_start_ns: i64, data_end_ns: i64) -> ConditionDurationInfo {
        if self.condition {
            if next_bucket_start_ns >= self.last_change_ns {
                self.timer_ns += next_bucket_start_ns - self.last_change_ns;
                self.last_change_ns = next_bucket_start_ns;
            }
        } else if self.last_change_ns > next_bucket_start_ns {
            // Became false after the boundary: the stretch between boundary and
            // change was counted here but belongs to the next bucket.
            self.timer_ns -= self.last_change_ns - next_bucket_start_ns;
        }

        let duration_ns = self.timer_ns;
        self.timer_ns = 0;
        if !self.condition && self.last_change_ns > next_bucket_start_ns {
            self.timer_ns = self.last_change_ns - next_bucket_start_ns;
        }

        let delay_true_ns = self.true_ns_between(next_bucket_start_ns, data_end_ns);
        let correction_ns = delay_true_ns - self.start_delay_true_ns;
        self.start_delay_true_ns = delay_true_ns;

        ConditionDurationInfo {
            duration_ns,
            correction_ns,
        }
    }

    // Condition-true time in [from, to), assuming no change other than the last one
    fn true_ns_between(&self, from_ns: i64, to_ns: i64) -> i64 {
        if to_ns <= from_ns {
            return 0;
        }
        let span = if self.condition {
            to_ns - self.last_change_ns.max(from_ns)
        } else if self.last_change_ns > from_ns {
            self.last_change_ns.min(to_ns) - from_ns
        } else {
            0
        };
        span.max(0)
    }
}
