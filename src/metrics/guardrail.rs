//! Dimension cardinality guardrail.
//!
//! Below the soft limit new keys are admitted silently; between soft and
//! hard limit they are admitted and the growth is noted; past the hard limit
//! they are rejected. What a rejection does to the bucket is up to the caller.

/// Decision for a key about to be tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Key is already tracked
    Existing,
    /// New key admitted below the soft limit
    Admitted,
    /// New key admitted above the soft limit
    AdmittedOverSoftLimit,
    /// New key rejected; `first_in_window` is false if the limit was already hit
    Rejected {
        /// First rejection since the last window reset
        first_in_window: bool,
    },
}

/// Soft/hard cap on distinct keys for one window
#[derive(Debug, Clone)]
pub struct GuardRail {
    metric_id: i64,
    window: &'static str,
    soft_limit: usize,
    hard_limit: usize,
    hit_in_window: bool,
    max_observed: usize,
    hard_limit_hits: u64,
}

impl GuardRail {
    /// Create a guardrail for the named window of a metric
    pub fn new(metric_id: i64, window: &'static str, soft_limit: usize, hard_limit: usize) -> Self {
        Self {
            metric_id,
            window,
            soft_limit,
            hard_limit,
            hit_in_window: false,
            max_observed: 0,
            hard_limit_hits: 0,
        }
    }

    /// Decide whether a key may be added to a map of `current_len` keys
    pub fn check(&mut self, current_len: usize, is_new: bool) -> Admission {
        if !is_new {
            return Admission::Existing;
        }
        let new_len = current_len + 1;
        if new_len <= self.soft_limit {
            self.max_observed = self.max_observed.max(new_len);
            return Admission::Admitted;
        }
        if new_len > self.hard_limit {
            self.hard_limit_hits += 1;
            let first_in_window = !self.hit_in_window;
            if first_in_window {
                tracing::warn!(
                    metric_id = self.metric_id,
                    window = self.window,
                    limit = self.hard_limit,
                    "dimension hard limit reached"
                );
            }
            self.hit_in_window = true;
            return Admission::Rejected { first_in_window };
        }
        if new_len > self.max_observed {
            tracing::debug!(
                metric_id = self.metric_id,
                window = self.window,
                dimensions = new_len,
                "dimension count above soft limit"
            );
        }
        self.max_observed = self.max_observed.max(new_len);
        Admission::AdmittedOverSoftLimit
    }

    /// Whether the hard limit was hit in the current window
    pub fn hit_in_window(&self) -> bool {
        self.hit_in_window
    }

    /// Start a new window
    pub fn reset_window(&mut self) {
        self.hit_in_window = false;
    }

    /// Largest key count admitted so far
    pub fn max_observed(&self) -> usize {
        self.max_observed
    }

    /// Number of rejected keys over the metric's lifetime
    pub fn hard_limit_hits(&self) -> u64 {
        self.hard_limit_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_levels() {
        let mut guard = GuardRail::new(1, "bucket", 1, 2);
        assert_eq!(guard.check(0, true), Admission::Admitted);
        assert_eq!(guard.check(1, true), Admission::AdmittedOverSoftLimit);
        assert_eq!(guard.check(2, false), Admission::Existing);
        assert_eq!(guard.check(2, true), Admission::Rejected { first_in_window: true });
        assert_eq!(guard.max_observed(), 2);
    }

    #[test]
    fn test_rejection_reported_once_per_window() {
        let mut guard = GuardRail::new(1, "bucket", 2, 2);
        assert_eq!(guard.check(2, true), Admission::Rejected { first_in_window: true });
        assert_eq!(guard.check(2, true), Admission::Rejected { first_in_window: false });
        assert!(guard.hit_in_window());
        assert_eq!(guard.hard_limit_hits(), 2);

        guard.reset_window();
        assert!(!guard.hit_in_window());
        assert_eq!(guard.check(2, true), Admission::Rejected { first_in_window: true });
    }
}
