//! Time sources.
//!
//! `Ticker` provides monotonic nanosecond ticks for span and metric timing.
//! `Clock` provides wall-clock epoch millis for trace start times and rollup.
//! Both have manual implementations so tests can drive time explicitly.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic nanosecond tick source
pub trait Ticker: Send + Sync {
    fn read(&self) -> u64;
}

/// Wall-clock millisecond source
pub trait Clock: Send + Sync {
    fn current_time_millis(&self) -> u64;
}

/// Ticker backed by `Instant`, counting from its own creation
#[derive(Debug, Clone, Copy)]
pub struct SystemTicker {
    origin: Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    fn read(&self) -> u64 {
        // u64 nanos cover ~584 years of uptime
        self.origin.elapsed().as_nanos() as u64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_time_millis(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Ticker that only moves when told to
#[derive(Debug, Default)]
pub struct ManualTicker {
    now: AtomicU64,
}

impl ManualTicker {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, tick: u64) {
        self.now.store(tick, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: u64) -> u64 {
        self.now.fetch_add(nanos, Ordering::SeqCst) + nanos
    }
}

impl Ticker for ManualTicker {
    fn read(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn current_time_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
