pub mod stats;

pub use stats::{Histo, LatencySummary, StoreCounters};
