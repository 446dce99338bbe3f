use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::batcher::TransactionBatcher;
use crate::config::{LoadConfig, WriteErrorPolicy, WritePolicy};
use crate::encoder::encode;
use crate::generator::{ChainGenerator, ChainShape};
use crate::metrics::{Histo, StoreCounters};
use crate::shutdown::ShutdownListener;
use crate::store::{apply_with_timeout, QuadStore, StoreConnector, StoreError};
use crate::types::{PendingTransaction, ThroughputSample, WorkerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Running,
    Draining,
    Done,
}

/// Per-worker slice of the run configuration.
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub batch_threshold: usize,
    pub chain: ChainShape,
    pub seed: Option<u64>,
    pub report_interval: Duration,
    pub apply_timeout: Option<Duration>,
    pub write: WritePolicy,
}

impl WorkerSettings {
    pub fn from_config(cfg: &LoadConfig) -> Self {
        Self {
            batch_threshold: cfg.run.batch_threshold,
            chain: cfg.chain,
            seed: cfg.run.seed,
            report_interval: cfg.run.report_interval(),
            apply_timeout: cfg.run.apply_timeout(),
            write: cfg.write.clone(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&LoadConfig::default())
    }
}

/// What a worker hands back to the coordinator when it exits.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub state: WorkerState,
    pub counters: StoreCounters,
    pub chains: u64,
    pub apply_latency: Histo,
    pub connect_error: Option<String>,
    pub aborted: bool,
}

impl WorkerReport {
    fn connect_failed(worker: WorkerId, err: &StoreError) -> Self {
        Self {
            worker,
            state: WorkerState::Done,
            counters: StoreCounters::default(),
            chains: 0,
            apply_latency: Histo::default(),
            connect_error: Some(err.to_string()),
            aborted: false,
        }
    }
}

/// Generates chains, batches their edges and commits them through a private
/// store handle.
pub struct Worker {
    id: WorkerId,
    state: WorkerState,
    generator: ChainGenerator,
    batcher: TransactionBatcher,
    store: Box<dyn QuadStore>,
    settings: WorkerSettings,
    counters: StoreCounters,
    apply_latency: Histo,
    unreported: u64,
    chains: u64,
    aborted: bool,
}

impl Worker {
    pub fn new(id: WorkerId, store: Box<dyn QuadStore>, settings: WorkerSettings) -> Self {
        let generator = match settings.seed {
            Some(seed) => ChainGenerator::seeded(settings.chain, seed.wrapping_add(id.0 as u64)),
            None => ChainGenerator::new(settings.chain),
        };
        Self {
            id,
            state: WorkerState::Running,
            generator,
            batcher: TransactionBatcher::new(settings.batch_threshold),
            store,
            settings,
            counters: StoreCounters::default(),
            apply_latency: Histo::default(),
            unreported: 0,
            chains: 0,
            aborted: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.batcher.pending_len()
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Applied statements not yet reported; resets the local counter.
    pub fn take_unreported(&mut self) -> u64 {
        std::mem::take(&mut self.unreported)
    }

    /// One generate, encode, append, maybe-commit pass.
    ///
    /// Only returns an error under [`WriteErrorPolicy::Abort`].
    pub async fn run_cycle(&mut self) -> Result<(), StoreError> {
        let chain = self.generator.generate();
        self.chains += 1;
        for node in &chain {
            for stmt in encode(node) {
                self.batcher.append(stmt);
                if self.batcher.should_flush(false) {
                    let tx = self.batcher.take_and_reset();
                    self.commit(tx).await?;
                }
            }
        }
        Ok(())
    }

    /// Forced final flush. The pending batch is applied even when empty.
    pub async fn drain(&mut self) -> Result<(), StoreError> {
        self.state = WorkerState::Draining;
        let tx = self.batcher.take_and_reset();
        tracing::debug!(worker = %self.id, statements = tx.len(), "forced flush");
        self.commit(tx).await
    }

    /// Releases the store handle and produces the exit report.
    pub async fn finish(mut self) -> WorkerReport {
        self.state = WorkerState::Done;
        if let Err(err) = self.store.close().await {
            tracing::warn!(worker = %self.id, error = %err, "store close failed");
        }
        WorkerReport {
            worker: self.id,
            state: self.state,
            counters: self.counters,
            chains: self.chains,
            apply_latency: self.apply_latency,
            connect_error: None,
            aborted: self.aborted,
        }
    }

    async fn commit(&mut self, tx: PendingTransaction) -> Result<(), StoreError> {
        let statements = tx.len() as u64;
        let retries = self.settings.write.retries();
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            match apply_with_timeout(self.store.as_mut(), &tx, self.settings.apply_timeout).await {
                Ok(()) => {
                    if statements > 0 {
                        self.apply_latency.record(started.elapsed().as_micros() as u64);
                        self.counters.applied_batches += 1;
                        self.counters.applied_statements += statements;
                        self.unreported += statements;
                    }
                    return Ok(());
                }
                Err(err) => {
                    self.counters.failed_attempts += 1;
                    if attempt < retries {
                        attempt += 1;
                        tracing::warn!(
                            worker = %self.id,
                            error = %err,
                            attempt,
                            max_retries = retries,
                            "commit failed, retrying"
                        );
                        tokio::time::sleep(self.settings.write.retry_backoff()).await;
                        continue;
                    }

                    self.counters.failed_batches += 1;
                    self.counters.dropped_statements += statements;
                    if self.settings.write.on_error == WriteErrorPolicy::Abort {
                        self.aborted = true;
                        tracing::error!(worker = %self.id, error = %err, statements, "commit failed, aborting worker");
                        return Err(err);
                    }
                    tracing::warn!(worker = %self.id, error = %err, statements, "commit failed, batch dropped");
                    return Ok(());
                }
            }
        }
    }
}

/// Full worker lifecycle: open, run until shutdown, drain, report.
///
/// Always emits exactly one `Final` sample, even when the store cannot be
/// opened, so the coordinator can tell the worker is gone.
pub async fn run_worker(
    id: WorkerId,
    connector: Arc<dyn StoreConnector>,
    settings: WorkerSettings,
    shutdown: ShutdownListener,
    samples: mpsc::Sender<ThroughputSample>,
) -> WorkerReport {
    let store = match connector.open(id).await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(worker = %id, store = %connector.describe(), error = %err, "could not open store");
            send_sample(&samples, ThroughputSample::final_sample(id, 0)).await;
            return WorkerReport::connect_failed(id, &err);
        }
    };

    let report_interval = settings.report_interval;
    let mut worker = Worker::new(id, store, settings);
    let mut last_report = Instant::now();
    tracing::debug!(worker = %id, "worker running");

    while !shutdown.is_triggered() {
        if last_report.elapsed() >= report_interval {
            let count = worker.take_unreported();
            send_sample(&samples, ThroughputSample::periodic(id, count)).await;
            last_report = Instant::now();
        }
        if worker.run_cycle().await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    if !worker.is_aborted() {
        // Abort ends the worker without committing anything further.
        let _ = worker.drain().await;
    }
    let count = worker.take_unreported();
    send_sample(&samples, ThroughputSample::final_sample(id, count)).await;

    let report = worker.finish().await;
    tracing::debug!(
        worker = %id,
        applied = report.counters.applied_statements,
        failed_batches = report.counters.failed_batches,
        "worker done"
    );
    report
}

async fn send_sample(samples: &mpsc::Sender<ThroughputSample>, sample: ThroughputSample) {
    if samples.send(sample).await.is_err() {
        tracing::debug!(worker = %sample.worker, count = sample.count, "sample receiver gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::store::memory::MemoryBackend;
    use crate::types::SampleKind;
    use pretty_assertions::assert_eq;

    fn settings(threshold: usize, chain: ChainShape) -> WorkerSettings {
        WorkerSettings {
            batch_threshold: threshold,
            chain,
            seed: Some(1),
            report_interval: Duration::from_secs(5),
            apply_timeout: None,
            write: WritePolicy::default(),
        }
    }

    async fn worker(backend: &MemoryBackend, s: WorkerSettings) -> Worker {
        let store = backend.open(WorkerId(0)).await.unwrap();
        Worker::new(WorkerId(0), store, s)
    }

    #[tokio::test]
    async fn single_chain_lands_in_one_forced_transaction() {
        let backend = MemoryBackend::new();
        let mut w = worker(&backend, settings(15, ChainShape::fixed(4))).await;

        w.run_cycle().await.unwrap();
        assert_eq!(w.pending_len(), 6);
        assert!(backend.commits().is_empty());

        w.drain().await.unwrap();
        assert_eq!(w.state(), WorkerState::Draining);
        assert_eq!(w.pending_len(), 0);
        let commits = backend.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].statements, 6);
        assert_eq!(w.take_unreported(), 6);
        assert_eq!(w.take_unreported(), 0);

        let report = w.finish().await;
        assert_eq!(report.state, WorkerState::Done);
        assert_eq!(report.counters.applied_statements, 6);
        assert_eq!(backend.closed(), vec![WorkerId(0)]);
    }

    #[tokio::test]
    async fn threshold_triggers_commits_mid_chain() {
        let backend = MemoryBackend::new();
        let mut w = worker(&backend, settings(3, ChainShape::fixed(11))).await;
        w.run_cycle().await.unwrap();
        // 20 edges, committed as soon as more than 3 are pending.
        let sizes: Vec<usize> = backend.commits().iter().map(|c| c.statements).collect();
        assert_eq!(sizes, vec![4; 5]);
        assert_eq!(w.pending_len(), 0);
        w.drain().await.unwrap();
        assert_eq!(backend.commits().len(), 5);
        assert_eq!(backend.quad_count(), 20);
    }

    #[tokio::test]
    async fn failed_batches_are_counted_and_dropped() {
        let backend = MemoryBackend::new().fail_every_nth_write(1);
        let mut s = settings(0, ChainShape::fixed(3));
        s.write = WritePolicy {
            on_error: WriteErrorPolicy::Retry,
            max_retries: 2,
            retry_backoff_ms: 1,
        };
        let mut w = worker(&backend, s).await;
        w.run_cycle().await.unwrap();
        let c = w.counters().clone();
        assert_eq!(c.applied_statements, 0);
        assert_eq!(c.failed_batches, 4);
        assert_eq!(c.failed_attempts, 12);
        assert_eq!(c.dropped_statements, 4);
        assert_eq!(w.take_unreported(), 0);
    }

    #[tokio::test]
    async fn abort_policy_surfaces_the_error() {
        let backend = MemoryBackend::new().fail_every_nth_write(1);
        let mut s = settings(0, ChainShape::fixed(2));
        s.write.on_error = WriteErrorPolicy::Abort;
        let mut w = worker(&backend, s).await;
        let err = w.run_cycle().await.unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(w.is_aborted());
    }

    #[tokio::test]
    async fn slow_apply_hits_timeout() {
        let backend = MemoryBackend::new().with_write_latency(Duration::from_millis(200));
        let mut s = settings(0, ChainShape::fixed(2));
        s.apply_timeout = Some(Duration::from_millis(10));
        s.write.on_error = WriteErrorPolicy::Skip;
        let mut w = worker(&backend, s).await;
        w.run_cycle().await.unwrap();
        assert_eq!(w.counters().failed_batches, 2);
        assert_eq!(backend.quad_count(), 0);
    }

    #[tokio::test]
    async fn run_worker_drains_and_reports_on_shutdown() {
        let backend = MemoryBackend::new();
        let (signal, listener) = shutdown::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let connector: Arc<dyn StoreConnector> = Arc::new(backend.clone());
        let handle = tokio::spawn(run_worker(
            WorkerId(0),
            connector,
            settings(15, ChainShape::default()),
            listener,
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        signal.trigger();
        let report = handle.await.unwrap();

        let mut sampled = 0;
        let mut finals = 0;
        while let Ok(sample) = rx.try_recv() {
            sampled += sample.count;
            if sample.kind == SampleKind::Final {
                finals += 1;
            }
        }
        assert_eq!(finals, 1);
        assert_eq!(sampled, report.counters.applied_statements);
        assert_eq!(sampled as usize, backend.quad_count());
        assert_eq!(report.state, WorkerState::Done);
    }

    #[tokio::test]
    async fn open_failure_still_reports_final_zero() {
        let backend = MemoryBackend::new().refuse_open_for([WorkerId(3)]);
        let (_signal, listener) = shutdown::channel();
        let (tx, mut rx) = mpsc::channel(2);
        let report = run_worker(WorkerId(3), Arc::new(backend), WorkerSettings::default(), listener, tx).await;
        assert!(report.connect_error.is_some());
        assert_eq!(rx.try_recv().unwrap(), ThroughputSample::final_sample(WorkerId(3), 0));
    }
}
