use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::store::{QuadStore, StoreConnector, StoreError};
use crate::types::{EdgeStatement, PendingTransaction, WorkerId};

/// Commit record kept by the in-memory backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedTransaction {
    pub worker: WorkerId,
    pub statements: usize,
}

#[derive(Default)]
struct MemoryState {
    quads: Vec<EdgeStatement>,
    quad_count: usize,
    commit_count: usize,
    commits: Vec<CommittedTransaction>,
    opened: Vec<WorkerId>,
    closed: Vec<WorkerId>,
}

#[derive(Default)]
struct Faults {
    discard_quads: bool,
    refuse_open: HashSet<WorkerId>,
    fail_every_nth_write: Option<u64>,
    write_latency: Option<Duration>,
}

/// Shared in-process quad log. Every worker gets its own handle; all handles
/// append to the same log, the way independent connections write to one
/// database.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
    write_attempts: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts committed statements without retaining them, for long dry runs.
    pub fn counting() -> Self {
        Self::new().with_faults(|f| f.discard_quads = true)
    }

    /// Refuse `open` for the given workers with a connection error.
    pub fn refuse_open_for(self, workers: impl IntoIterator<Item = WorkerId>) -> Self {
        self.with_faults(|f| f.refuse_open.extend(workers))
    }

    /// Reject every n-th non-empty write across all handles.
    pub fn fail_every_nth_write(self, n: u64) -> Self {
        self.with_faults(|f| f.fail_every_nth_write = Some(n.max(1)))
    }

    pub fn with_write_latency(self, latency: Duration) -> Self {
        self.with_faults(|f| f.write_latency = Some(latency))
    }

    fn with_faults(self, edit: impl FnOnce(&mut Faults)) -> Self {
        let mut faults = Faults {
            discard_quads: self.faults.discard_quads,
            refuse_open: self.faults.refuse_open.clone(),
            fail_every_nth_write: self.faults.fail_every_nth_write,
            write_latency: self.faults.write_latency,
        };
        edit(&mut faults);
        Self {
            faults: Arc::new(faults),
            ..self
        }
    }

    pub fn quad_count(&self) -> usize {
        self.state.lock().quad_count
    }

    pub fn quads(&self) -> Vec<EdgeStatement> {
        self.state.lock().quads.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().commit_count
    }

    /// Commit records; empty for a [`MemoryBackend::counting`] backend.
    pub fn commits(&self) -> Vec<CommittedTransaction> {
        self.state.lock().commits.clone()
    }

    pub fn opened(&self) -> Vec<WorkerId> {
        self.state.lock().opened.clone()
    }

    pub fn closed(&self) -> Vec<WorkerId> {
        self.state.lock().closed.clone()
    }
}

#[async_trait]
impl StoreConnector for MemoryBackend {
    async fn open(&self, worker: WorkerId) -> Result<Box<dyn QuadStore>, StoreError> {
        if self.faults.refuse_open.contains(&worker) {
            return Err(StoreError::Connection {
                endpoint: "memory://".into(),
                reason: format!("open refused for {worker}"),
            });
        }
        self.state.lock().opened.push(worker);
        Ok(Box::new(MemoryQuadStore {
            worker,
            backend: self.clone(),
        }))
    }

    fn describe(&self) -> String {
        "memory://".into()
    }
}

pub struct MemoryQuadStore {
    worker: WorkerId,
    backend: MemoryBackend,
}

#[async_trait]
impl QuadStore for MemoryQuadStore {
    async fn apply_transaction(&mut self, tx: &PendingTransaction) -> Result<(), StoreError> {
        if tx.is_empty() {
            return Ok(());
        }
        if let Some(latency) = self.backend.faults.write_latency {
            tokio::time::sleep(latency).await;
        }
        let attempt = self.backend.write_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(n) = self.backend.faults.fail_every_nth_write {
            if attempt % n == 0 {
                return Err(StoreError::Write {
                    statements: tx.len(),
                    reason: format!("injected failure on write #{attempt}"),
                });
            }
        }

        let mut state = self.backend.state.lock();
        state.quad_count += tx.len();
        state.commit_count += 1;
        if !self.backend.faults.discard_quads {
            state.quads.extend(tx.iter().cloned());
            state.commits.push(CommittedTransaction {
                worker: self.worker,
                statements: tx.len(),
            });
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), StoreError> {
        self.backend.state.lock().closed.push(self.worker);
        Ok(())
    }
}
