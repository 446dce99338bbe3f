//! Synthetic lineage-graph load generator for transactional quad-stores.
//!
//! A fixed pool of workers each generates random chain-shaped lineage
//! fragments, encodes them as `related_through` edge statements, batches the
//! edges into bounded transactions and commits them through its own store
//! handle. The coordinator enforces a global run-time budget, aggregates
//! per-worker throughput samples into windows and prints a final summary.

pub mod batcher;
pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod generator;
pub mod metrics;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod worker;

pub use crate::config::{load_config, LoadConfig};
pub use crate::coordinator::{Coordinator, RunSummary};
