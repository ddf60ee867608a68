//! Bucket boundary arithmetic.
//!
//! Buckets are half-open `[start, end)` windows aligned on
//! `time_base + n * bucket_size`. The first bucket and buckets opened by a
//! forced split may start off-boundary; their end is always aligned.

/// Maps timestamps to bucket indices and tracks the open bucket
#[derive(Debug, Clone)]
pub struct BucketClock {
    time_base_ns: i64,
    bucket_size_ns: i64,
    current_bucket_start_ns: i64,
    current_bucket_num: i64,
}

impl BucketClock {
    /// Create a clock whose first bucket opens at `start_ns`
    pub fn new(time_base_ns: i64, bucket_size_ns: i64, start_ns: i64) -> Self {
        debug_assert!(bucket_size_ns > 0);
        let mut clock = Self {
            time_base_ns,
            bucket_size_ns,
            current_bucket_start_ns: start_ns,
            current_bucket_num: 0,
        };
        clock.current_bucket_num = clock.bucket_index_for(start_ns);
        clock
    }

    /// Index of the aligned bucket containing `ts_ns`
    pub fn bucket_index_for(&self, ts_ns: i64) -> i64 {
        (ts_ns - self.time_base_ns).div_euclid(self.bucket_size_ns)
    }

    /// Aligned boundary at or before `ts_ns`, i.e. the end of the bucket a
    /// pull scheduled at `ts_ns` was meant to close
    pub fn previous_bucket_end_time(&self, ts_ns: i64) -> i64 {
        self.time_base_ns + self.bucket_index_for(ts_ns) * self.bucket_size_ns
    }

    /// Returns true if `ts_ns` falls before the open bucket
    pub fn is_event_late(&self, ts_ns: i64) -> bool {
        ts_ns < self.current_bucket_start_ns
    }

    /// Start of the open bucket
    pub fn current_bucket_start_ns(&self) -> i64 {
        self.current_bucket_start_ns
    }

    /// Number of the open bucket; forced splits do not advance it
    pub fn current_bucket_num(&self) -> i64 {
        self.current_bucket_num
    }

    /// Aligned end of the open bucket
    pub fn current_bucket_end_ns(&self) -> i64 {
        self.time_base_ns + (self.current_bucket_num + 1) * self.bucket_size_ns
    }

    /// Bucket size
    pub fn bucket_size_ns(&self) -> i64 {
        self.bucket_size_ns
    }

    /// How many bucket boundaries lie in `(start, ts_ns]` of the open bucket.
    /// Zero means `ts_ns` is still inside it.
    pub fn buckets_forward(&self, ts_ns: i64) -> i64 {
        let end = self.current_bucket_end_ns();
        if ts_ns < end {
            return 0;
        }
        1 + (ts_ns - end) / self.bucket_size_ns
    }

    /// Start of the bucket that will be open after flushing at `ts_ns`
    pub fn next_bucket_start_ns(&self, ts_ns: i64) -> i64 {
        let forward = self.buckets_forward(ts_ns);
        if forward == 0 {
            return ts_ns;
        }
        self.current_bucket_end_ns() + (forward - 1) * self.bucket_size_ns
    }

    /// Open the next bucket at `next_start_ns`, `forward` buckets later
    pub fn advance(&mut self, next_start_ns: i64, forward: i64) {
        self.current_bucket_num += forward;
        self.current_bucket_start_ns = next_start_ns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000_000;

    #[test]
    fn test_bucket_index_and_previous_end() {
        let clock = BucketClock::new(0, 60 * SEC, 0);
        assert_eq!(clock.bucket_index_for(59 * SEC), 0);
        assert_eq!(clock.bucket_index_for(60 * SEC), 1);
        assert_eq!(clock.previous_bucket_end_time(61 * SEC), 60 * SEC);
        assert_eq!(clock.previous_bucket_end_time(60 * SEC), 60 * SEC);
    }

    #[test]
    fn test_snapped_time_belongs_to_previous_bucket() {
        let clock = BucketClock::new(5 * SEC, 60 * SEC, 5 * SEC);
        for ts in [66 * SEC, 90 * SEC + 7, 3_600 * SEC + 1] {
            let snapped = clock.previous_bucket_end_time(ts) - 1;
            assert_eq!(clock.bucket_index_for(snapped), clock.bucket_index_for(ts) - 1);
        }
    }

    #[test]
    fn test_buckets_forward() {
        let clock = BucketClock::new(0, 60 * SEC, 0);
        assert_eq!(clock.buckets_forward(59 * SEC), 0);
        assert_eq!(clock.buckets_forward(60 * SEC), 1);
        assert_eq!(clock.buckets_forward(119 * SEC), 1);
        assert_eq!(clock.buckets_forward(185 * SEC), 3);
        assert_eq!(clock.next_bucket_start_ns(185 * SEC), 180 * SEC);
    }

    #[test]
    fn test_partial_first_bucket_and_split() {
        let mut clock = BucketClock::new(0, 60 * SEC, 20 * SEC);
        assert_eq!(clock.current_bucket_num(), 0);
        assert_eq!(clock.current_bucket_end_ns(), 60 * SEC);
        assert!(clock.is_event_late(10 * SEC));

        // Forced split keeps the bucket number
        clock.advance(30 * SEC, clock.buckets_forward(30 * SEC));
        assert_eq!(clock.current_bucket_num(), 0);
        assert_eq!(clock.current_bucket_start_ns(), 30 * SEC);
        assert_eq!(clock.current_bucket_end_ns(), 60 * SEC);

        clock.advance(60 * SEC, clock.buckets_forward(60 * SEC));
        assert_eq!(clock.current_bucket_num(), 1);
    }
}
