use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::types::{ThroughputSample, WorkerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowTrigger {
    /// Every live worker reported in the window.
    AllReported,
    /// The reporting interval elapsed with samples pending.
    Interval,
}

/// One aggregation window closed by the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub index: u64,
    pub samples: usize,
    pub sum: u64,
    pub elapsed: Duration,
    pub rate: f64,
    pub running_total: u64,
    pub trigger: WindowTrigger,
}

/// Coordinator-owned aggregation of worker throughput samples.
///
/// Every sample value lands in the grand total exactly once: either through
/// a closed window, through the still-open window at the end of the run, or
/// through the post-join drain.
#[derive(Debug)]
pub struct RunState {
    workers: usize,
    report_interval: Duration,
    last_aggregate: Instant,
    total: u64,
    window_sum: u64,
    window_samples: usize,
    window_reporters: HashSet<WorkerId>,
    finished: HashSet<WorkerId>,
    windows: u64,
    drained: u64,
}

impl RunState {
    pub fn new(workers: usize, report_interval: Duration, now: Instant) -> Self {
        Self {
            workers,
            report_interval,
            last_aggregate: now,
            total: 0,
            window_sum: 0,
            window_samples: 0,
            window_reporters: HashSet::with_capacity(workers),
            finished: HashSet::new(),
            windows: 0,
            drained: 0,
        }
    }

    /// Adds a live sample to the current window, closing it when every
    /// worker that is still running has reported.
    pub fn record(&mut self, sample: ThroughputSample, now: Instant) -> Option<WindowReport> {
        self.window_sum += sample.count;
        self.window_samples += 1;
        self.window_reporters.insert(sample.worker);
        if sample.is_final() {
            self.finished.insert(sample.worker);
        }
        if self.all_live_reported() {
            Some(self.close_window(now, WindowTrigger::AllReported))
        } else {
            None
        }
    }

    /// Closes the window on the reporting interval so a slow or exited
    /// worker cannot hold aggregation back.
    pub fn tick(&mut self, now: Instant) -> Option<WindowReport> {
        if self.window_samples == 0 {
            return None;
        }
        if now.saturating_duration_since(self.last_aggregate) < self.report_interval {
            return None;
        }
        Some(self.close_window(now, WindowTrigger::Interval))
    }

    /// Folds a sample received while workers shut down.
    pub fn fold_drained(&mut self, sample: ThroughputSample) {
        self.total += sample.count;
        self.drained += sample.count;
        if sample.is_final() {
            self.finished.insert(sample.worker);
        }
    }

    /// Non-blocking drain of whatever is left in the sample channel.
    /// Returns the drained sum; an empty channel leaves the totals untouched.
    pub fn drain(&mut self, rx: &mut mpsc::Receiver<ThroughputSample>) -> u64 {
        let mut sum = 0;
        while let Ok(sample) = rx.try_recv() {
            sum += sample.count;
            self.fold_drained(sample);
        }
        sum
    }

    /// Everything recorded so far, including the still-open window.
    pub fn grand_total(&self) -> u64 {
        self.total + self.window_sum
    }

    pub fn windows(&self) -> u64 {
        self.windows
    }

    pub fn drained(&self) -> u64 {
        self.drained
    }

    pub fn finished(&self) -> usize {
        self.finished.len()
    }

    fn all_live_reported(&self) -> bool {
        (0..self.workers)
            .map(WorkerId)
            .all(|w| self.window_reporters.contains(&w) || self.finished.contains(&w))
    }

    fn close_window(&mut self, now: Instant, trigger: WindowTrigger) -> WindowReport {
        let elapsed = now.saturating_duration_since(self.last_aggregate);
        let sum = std::mem::take(&mut self.window_sum);
        let samples = std::mem::take(&mut self.window_samples);
        self.window_reporters.clear();
        self.total += sum;
        self.last_aggregate = now;
        self.windows += 1;
        WindowReport {
            index: self.windows,
            samples,
            sum,
            elapsed,
            rate: per_second(sum, elapsed),
            running_total: self.total,
            trigger,
        }
    }
}

pub fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    count as f64 / secs
}
