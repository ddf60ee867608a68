//! Reporting policy for condition corrections caused by delayed pulls.

/// Decides whether a bucket's condition correction is material enough to report
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectionLedger {
    threshold_ns: Option<i64>,
    reported: u64,
    suppressed: u64,
}

impl CorrectionLedger {
    /// Create a ledger; `None` never reports, `Some(0)` always reports
    pub fn new(threshold_ns: Option<i64>) -> Self {
        Self {
            threshold_ns,
            reported: 0,
            suppressed: 0,
        }
    }

    /// The correction to attach to a finalized bucket, if any
    pub fn record(&mut self, correction_ns: i64) -> Option<i64> {
        let threshold = self.threshold_ns?;
        if correction_ns.unsigned_abs() >= threshold.unsigned_abs() {
            self.reported += 1;
            Some(correction_ns)
        } else {
            self.suppressed += 1;
            None
        }
    }

    /// Corrections attached to buckets so far
    pub fn reported(&self) -> u64 {
        self.reported
    }

    /// Corrections below the threshold so far
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
