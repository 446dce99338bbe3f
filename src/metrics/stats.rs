use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Outcome counters for a worker's commits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounters {
    pub applied_batches: u64,
    pub applied_statements: u64,
    pub failed_attempts: u64,
    pub failed_batches: u64,
    pub dropped_statements: u64,
}

impl StoreCounters {
    pub fn merge(&mut self, other: &StoreCounters) {
        self.applied_batches += other.applied_batches;
        self.applied_statements += other.applied_statements;
        self.failed_attempts += other.failed_attempts;
        self.failed_batches += other.failed_batches;
        self.dropped_statements += other.dropped_statements;
    }

    pub fn failure_rate(&self) -> f64 {
        let denom = self.applied_batches + self.failed_batches;
        if denom == 0 {
            return 0.0;
        }
        (self.failed_batches as f64) / (denom as f64)
    }
}

#[derive(Clone, Debug)]
pub struct Histo {
    /// Values are recorded in microseconds.
    inner: Histogram<u64>,
}

impl Default for Histo {
    fn default() -> Self {
        Self {
            inner: Histogram::new(3).expect("histo"),
        }
    }
}

impl Histo {
    pub fn record(&mut self, v: u64) {
        let _ = self.inner.record(v.max(1));
    }

    pub fn merge(&mut self, other: &Histo) {
        let _ = self.inner.add(&other.inner);
    }

    pub fn p50(&self) -> u64 {
        self.inner.value_at_quantile(0.50)
    }

    pub fn p95(&self) -> u64 {
        self.inner.value_at_quantile(0.95)
    }

    pub fn p99(&self) -> u64 {
        self.inner.value_at_quantile(0.99)
    }

    pub fn max(&self) -> u64 {
        self.inner.max()
    }

    pub fn count(&self) -> u64 {
        self.inner.len()
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            p50_us: self.p50(),
            p95_us: self.p95(),
            p99_us: self.p99(),
            max_us: self.max(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_histograms_keep_all_samples() {
        let mut a = Histo::default();
        let mut b = Histo::default();
        for v in [10, 20, 30] {
            a.record(v);
        }
        b.record(5_000);
        a.merge(&b);
        assert_eq!(a.count(), 4);
        assert!(a.max() >= 5_000);
        assert!(a.p50() <= 30);
    }

    #[test]
    fn zero_is_recorded_as_one() {
        let mut h = Histo::default();
        h.record(0);
        assert_eq!(h.summary().count, 1);
        assert_eq!(h.max(), 1);
    }

    #[test]
    fn failure_rate_over_terminal_batches() {
        let mut c = StoreCounters {
            applied_batches: 3,
            failed_batches: 1,
            ..Default::default()
        };
        assert_eq!(c.failure_rate(), 0.25);
        c.merge(&StoreCounters {
            applied_batches: 4,
            ..Default::default()
        });
        assert_eq!(c.applied_batches, 7);
    }
}
