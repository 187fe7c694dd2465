//! Metric types and per-trace timing accumulators.

pub mod accumulator;
pub mod metric;

pub use accumulator::{MetricAccumulator, MetricSnapshot};
pub use metric::Metric;
