//! Metric types and their execution-context binding.
//!
//! A `Metric` names a kind of operation (e.g. "http request", "jdbc query").
//! While a trace runs, each metric used on the trace's thread is bound to one
//! `MetricAccumulator` through a thread-local slot, so re-entering the same
//! metric resumes the same accumulator. The binding must be removed before the
//! thread is reused for an unrelated trace.

use super::accumulator::MetricAccumulator;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_METRIC_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BOUND: RefCell<HashMap<u64, Arc<MetricAccumulator>>> = RefCell::new(HashMap::new());
}

/// A named metric type
#[derive(Clone)]
pub struct Metric {
    id: u64,
    name: Arc<str>,
}

impl Metric {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: NEXT_METRIC_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accumulator bound to the current thread, if any
    pub fn get(&self) -> Option<Arc<MetricAccumulator>> {
        BOUND.with(|bound| bound.borrow().get(&self.id).cloned())
    }

    /// Create a fresh accumulator and bind it to the current thread,
    /// replacing any previous binding
    pub fn create(&self) -> Arc<MetricAccumulator> {
        let accumulator = Arc::new(MetricAccumulator::new(Arc::clone(&self.name)));
        BOUND.with(|bound| {
            bound
                .borrow_mut()
                .insert(self.id, Arc::clone(&accumulator));
        });
        accumulator
    }

    /// Drop the current thread's binding
    pub fn remove(&self) {
        // try_with: may run while the thread's locals are being torn down
        let _ = BOUND.try_with(|bound| {
            bound.borrow_mut().remove(&self.id);
        });
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Metric {}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_binds_to_current_thread() {
        let metric = Metric::new("servlet");
        assert!(metric.get().is_none());

        let created = metric.create();
        let bound = metric.get().unwrap();
        assert!(Arc::ptr_eq(&created, &bound));

        metric.remove();
        assert!(metric.get().is_none());
    }

    #[test]
    fn test_binding_is_per_thread() {
        let metric = Metric::new("worker");
        let _created = metric.create();

        let other = metric.clone();
        let seen_elsewhere = std::thread::spawn(move || other.get().is_some())
            .join()
            .unwrap();
        assert!(!seen_elsewhere);
        metric.remove();
    }

    #[test]
    fn test_same_name_distinct_metrics() {
        let a = Metric::new("dup");
        let b = Metric::new("dup");
        assert_ne!(a, b);
        a.create();
        assert!(b.get().is_none());
        a.remove();
    }
}
