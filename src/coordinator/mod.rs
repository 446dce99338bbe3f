use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::config::LoadConfig;
use crate::metrics::{Histo, LatencySummary, StoreCounters};
use crate::shutdown;
use crate::store::StoreConnector;
use crate::types::{ThroughputSample, WorkerId};
use crate::worker::{run_worker, WorkerReport, WorkerSettings};

pub mod state;

pub use state::{per_second, RunState, WindowReport, WindowTrigger};

/// Upper bound on how often the coordinator re-checks the interval gate.
const MAX_TICK: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker: WorkerId,
    pub reason: String,
}

/// Final report of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub workers: usize,
    pub total_statements: u64,
    pub statements_per_sec: f64,
    pub windows: u64,
    pub drained_at_shutdown: u64,
    pub chains: u64,
    pub interrupted: bool,
    pub counters: StoreCounters,
    pub apply_latency: LatencySummary,
    pub failed_workers: Vec<WorkerFailure>,
    pub aborted_workers: Vec<WorkerId>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "time elapsed: {:?}", self.elapsed)?;
        writeln!(f, "total processed: {}", self.total_statements)?;
        write!(f, "statements/second: {:.2}", self.statements_per_sec)?;
        if self.counters.failed_batches > 0 {
            write!(
                f,
                "\nfailed batches: {} ({} statements dropped)",
                self.counters.failed_batches, self.counters.dropped_statements
            )?;
        }
        for failure in &self.failed_workers {
            write!(f, "\n{} failed: {}", failure.worker, failure.reason)?;
        }
        Ok(())
    }
}

/// Runs a fixed pool of workers under a global time budget and aggregates
/// their throughput.
pub struct Coordinator {
    cfg: LoadConfig,
    connector: Arc<dyn StoreConnector>,
    console: bool,
}

impl Coordinator {
    pub fn new(cfg: LoadConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            cfg,
            connector,
            console: true,
        }
    }

    /// Suppresses the per-sample and per-window console lines.
    pub fn quiet(mut self) -> Self {
        self.console = false;
        self
    }

    pub fn config(&self) -> &LoadConfig {
        &self.cfg
    }

    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Like [`Coordinator::run`], but also stops early once `interrupt`
    /// resolves (e.g. ctrl-c).
    pub async fn run_until<F>(&self, interrupt: F) -> anyhow::Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        self.cfg.validate().context("invalid load configuration")?;

        let workers = self.cfg.run.workers;
        let settings = WorkerSettings::from_config(&self.cfg);
        let (signal, listener) = shutdown::channel();
        let (tx, mut rx) = mpsc::channel::<ThroughputSample>(workers * 2);

        let started_at = Utc::now();
        let started = Instant::now();
        tracing::info!(
            workers,
            run_time_ms = self.cfg.run.run_time_ms,
            batch_threshold = self.cfg.run.batch_threshold,
            store = %self.connector.describe(),
            "starting load run"
        );

        let handles: Vec<_> = (0..workers)
            .map(WorkerId)
            .map(|id| {
                let span = tracing::info_span!("worker", worker = %id);
                tokio::spawn(
                    run_worker(
                        id,
                        self.connector.clone(),
                        settings.clone(),
                        listener.clone(),
                        tx.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect();
        drop(tx);
        drop(listener);

        let mut state = RunState::new(workers, self.cfg.run.report_interval(), started);
        let deadline = tokio::time::sleep_until(started + self.cfg.run.run_time());
        tokio::pin!(deadline);
        tokio::pin!(interrupt);
        let mut tick = tokio::time::interval(self.cfg.run.report_interval().min(MAX_TICK));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut interrupted = false;

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break,
                _ = &mut interrupt => {
                    tracing::warn!("interrupted, shutting down early");
                    interrupted = true;
                    break;
                }
                sample = rx.recv() => match sample {
                    Some(sample) => {
                        if self.console {
                            println!("node sum: {}", sample.count);
                        }
                        if let Some(window) = state.record(sample, Instant::now()) {
                            self.print_window(&window);
                        }
                    }
                    None => {
                        tracing::warn!("every worker exited before the deadline");
                        break;
                    }
                },
                _ = tick.tick() => {
                    if let Some(window) = state.tick(Instant::now()) {
                        self.print_window(&window);
                    }
                }
            }
        }

        if signal.trigger() {
            tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "shutdown signalled");
        }

        // Keep receiving while joining so no worker blocks on a full channel.
        let joined = join_all(handles);
        tokio::pin!(joined);
        let results = loop {
            tokio::select! {
                results = &mut joined => break results,
                Some(sample) = rx.recv() => state.fold_drained(sample),
            }
        };
        let elapsed = started.elapsed();
        state.drain(&mut rx);

        let mut counters = StoreCounters::default();
        let mut latency = Histo::default();
        let mut chains = 0;
        let mut failed_workers = Vec::new();
        let mut aborted_workers = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            let report: WorkerReport = match result {
                Ok(report) => report,
                Err(err) => {
                    tracing::error!(worker = %WorkerId(index), error = %err, "worker task failed");
                    failed_workers.push(WorkerFailure {
                        worker: WorkerId(index),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if let Some(reason) = report.connect_error {
                failed_workers.push(WorkerFailure {
                    worker: report.worker,
                    reason,
                });
                continue;
            }
            if report.aborted {
                aborted_workers.push(report.worker);
            }
            counters.merge(&report.counters);
            latency.merge(&report.apply_latency);
            chains += report.chains;
        }

        let total = state.grand_total();
        if total != counters.applied_statements {
            tracing::warn!(
                sampled = total,
                applied = counters.applied_statements,
                "sampled total diverges from applied statements"
            );
        }

        let summary = RunSummary {
            started_at,
            elapsed,
            workers,
            total_statements: total,
            statements_per_sec: per_second(total, elapsed),
            windows: state.windows(),
            drained_at_shutdown: state.drained(),
            chains,
            interrupted,
            counters,
            apply_latency: latency.summary(),
            failed_workers,
            aborted_workers,
        };
        tracing::info!(
            total = summary.total_statements,
            rate = summary.statements_per_sec,
            failed_workers = summary.failed_workers.len(),
            "load run complete"
        );
        Ok(summary)
    }

    fn print_window(&self, window: &WindowReport) {
        tracing::debug!(
            window = window.index,
            samples = window.samples,
            trigger = ?window.trigger,
            "window aggregated"
        );
        if self.console {
            println!(
                "\trunning sum: {} [{:.2}/sec]",
                window.sum, window.rate
            );
        }
    }
}
