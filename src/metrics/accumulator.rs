//! Per-metric timing accumulator.
//!
//! One accumulator exists per metric type per trace. Only the owning thread
//! calls `start`/`stop`; any thread may take a snapshot at any time.

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Count and elapsed-time totals for one metric type within one trace
#[derive(Debug)]
pub struct MetricAccumulator {
    name: Arc<str>,
    count: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
    depth: AtomicU32,
    // entry ticks of the currently open start/stop pairs, innermost last
    open: Mutex<Vec<u64>>,
}

/// Immutable view of an accumulator at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub count: u64,
    pub total_nanos: u64,
    pub min_nanos: u64,
    pub max_nanos: u64,

    /// Whether an entry was still open when the snapshot was taken
    pub active: bool,
}

impl MetricAccumulator {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
            depth: AtomicU32::new(0),
            open: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open one entry at `tick`
    ///
    /// Re-entrant: each nested start is matched by its own stop and
    /// contributes its own interval.
    pub fn start(&self, tick: u64) {
        self.open.lock().push(tick);
        self.depth.fetch_add(1, Ordering::Release);
    }

    /// Close the innermost open entry at `tick`
    ///
    /// A stop without a matching start is logged and ignored.
    pub fn stop(&self, tick: u64) {
        let Some(start) = self.open.lock().pop() else {
            warn!("stop() called on metric '{}' with no open entry", self.name);
            return;
        };
        let elapsed = tick.saturating_sub(start);

        self.total_nanos.fetch_add(elapsed, Ordering::Relaxed);
        self.min_nanos.fetch_min(elapsed, Ordering::Relaxed);
        self.max_nanos.fetch_max(elapsed, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
        self.depth.fetch_sub(1, Ordering::Release);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn total_nanos(&self) -> u64 {
        self.total_nanos.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    /// Take an immutable snapshot
    ///
    /// **Public** - safe to call from any thread; while the owning thread is
    /// still recording, the fields may lag the newest stop by one entry
    pub fn snapshot(&self) -> MetricSnapshot {
        let count = self.count();
        let min = self.min_nanos.load(Ordering::Relaxed);
        MetricSnapshot {
            name: self.name.to_string(),
            count,
            total_nanos: self.total_nanos(),
            min_nanos: if count == 0 || min == u64::MAX { 0 } else { min },
            max_nanos: self.max_nanos.load(Ordering::Relaxed),
            active: self.is_active(),
        }
    }
}
