//! Rollup aggregation of capture records into coarser time buckets.
//!
//! This module handles:
//! - The capture record shape shared by every level
//! - The time-series store contract and an in-memory store
//! - Pending-bucket tracking, rollup and expiration

pub mod aggregator;
pub mod record;
pub mod store;

// Re-export main types
pub use aggregator::RollupAggregator;
pub use record::CaptureRecord;
pub use store::{MemoryStore, TimeSeriesStore};
