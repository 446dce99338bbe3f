use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::types::{PendingTransaction, WorkerId};

pub mod http;
pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to open store at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    #[error("transaction of {statements} statements rejected: {reason}")]
    Write { statements: usize, reason: String },
    #[error("transaction of {statements} statements timed out after {timeout_ms}ms")]
    Timeout { statements: usize, timeout_ms: u64 },
    #[error("store handle already closed")]
    Closed,
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection { .. })
    }
}

/// Opens one independent store handle per worker.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self, worker: WorkerId) -> Result<Box<dyn QuadStore>, StoreError>;

    fn describe(&self) -> String;
}

/// A worker-owned handle that commits whole transactions.
///
/// `apply_transaction` is all-or-nothing from the caller's point of view: an
/// `Ok` means every statement in the batch was accepted. Applying an empty
/// transaction is a no-op.
#[async_trait]
pub trait QuadStore: Send {
    async fn apply_transaction(&mut self, tx: &PendingTransaction) -> Result<(), StoreError>;

    async fn close(self: Box<Self>) -> Result<(), StoreError>;
}

/// Wraps `apply_transaction` in a deadline when one is configured.
pub async fn apply_with_timeout(
    store: &mut dyn QuadStore,
    tx: &PendingTransaction,
    timeout: Option<Duration>,
) -> Result<(), StoreError> {
    match timeout {
        None => store.apply_transaction(tx).await,
        Some(limit) => match tokio::time::timeout(limit, store.apply_transaction(tx)).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout {
                statements: tx.len(),
                timeout_ms: limit.as_millis() as u64,
            }),
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// In-process quad log; useful for dry runs.
    Memory,
    /// Cayley-compatible HTTP write API.
    Http,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Http => "http",
        }
    }
}

/// Builds the connector selected by `cfg.backend`.
pub fn connector_for(cfg: &StoreConfig) -> Result<Arc<dyn StoreConnector>, StoreError> {
    Ok(match cfg.backend {
        BackendKind::Memory => Arc::new(memory::MemoryBackend::counting()),
        BackendKind::Http => Arc::new(http::HttpConnector::new(cfg)?),
    })
}
