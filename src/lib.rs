//! APM Capture
//!
//! In-process trace capture and rollup aggregation for application
//! performance monitoring.
//!
//! A [`trace::Trace`] records the nested spans of one unit of work, the
//! per-metric timings of those spans and periodic stack samples of the
//! owning thread. [`runtime::TraceManager`] drives that lifecycle on the
//! monitored thread. [`rollup::RollupAggregator`] compacts raw capture
//! records into coarser time buckets in a time-series store.
//!
//! ## Getting Started
//!
//! The `apm-capture` CLI rolls up record files offline and renders saved
//! traces:
//!
//! ```bash
//! apm-capture rollup --input records.json --output rollup.json
//! apm-capture --help
//! ```

pub mod commands;
pub mod flamegraph;
pub mod metrics;
pub mod output;
pub mod profiler;
pub mod rollup;
pub mod runtime;
pub mod trace;
pub mod utils;
