//! Contains all data that has been captured for a given trace (e.g. one
//! request).
//!
//! Only the thread that created the trace mutates its structure (span
//! push/pop, attribute append, accumulator registration). Any number of other
//! threads may read it while that is happening. Stack sampling runs on the
//! scheduler and is the only writer of the merged stack trees.

use super::context::ExecutionContext;
use super::message::{ErrorMessage, Message};
use super::schedule::{Cancellable, ScheduleSlot, ScheduleStatus};
use super::span_tree::{SpanHandle, SpanTree};
use crate::metrics::{Metric, MetricAccumulator, MetricSnapshot};
use crate::profiler::{MergedStackTree, RunState, StackSampleSource};
use crate::utils::clock::{Clock, Ticker};
use crate::utils::config::{ATTRIBUTES_INITIAL_CAPACITY, METRICS_INITIAL_CAPACITY};
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static TRACE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Time-derived unique trace identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

impl TraceId {
    /// Creation millis followed by a process-wide sequence, both hex, so ids
    /// sort by creation time
    fn generate(start_millis: u64) -> Self {
        let sequence = TRACE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        TraceId(format!("{:012x}{:08x}", start_millis, sequence & 0xffff_ffff))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Plugin-supplied key/value attached to a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceAttribute {
    pub plugin_id: String,
    pub name: String,
    pub value: Option<String>,
}

pub struct Trace {
    id: TraceId,
    start_millis: u64,

    stuck: AtomicBool,
    background: AtomicBool,
    user_id: RwLock<Option<String>>,
    attributes: Mutex<Vec<TraceAttribute>>,

    accumulators: Mutex<Vec<Arc<MetricAccumulator>>>,
    // metrics bound to the owning thread, unbound by reset_metric_accumulators()
    metrics: Mutex<Vec<Metric>>,
    overhead: Arc<MetricAccumulator>,
    final_snapshots: OnceLock<Vec<MetricSnapshot>>,

    span_tree: SpanTree,

    coarse_stack_tree: OnceLock<MergedStackTree>,
    fine_stack_tree: OnceLock<MergedStackTree>,

    context: Weak<ExecutionContext>,

    coarse_profiling: ScheduleSlot,
    fine_profiling: ScheduleSlot,
    stuck_detection: ScheduleSlot,

    ticker: Arc<dyn Ticker>,
}

impl Trace {
    /// Start a trace on the calling thread
    ///
    /// **Public** - main entry point, the calling thread becomes the owner
    ///
    /// # Arguments
    /// * `metric` - Metric of the root span
    /// * `message` - Root span message (the trace headline)
    /// * `overhead_metric` - Metric that instrumentation uses to time itself
    /// * `ticker` - Nanosecond tick source for span and metric timing
    /// * `clock` - Wall clock for the trace start time
    /// * `span_limit` - Recorded span ceiling
    pub fn new(
        metric: &Metric,
        message: Message,
        overhead_metric: &Metric,
        ticker: Arc<dyn Ticker>,
        clock: &dyn Clock,
        span_limit: usize,
    ) -> Self {
        let start_millis = clock.current_time_millis();
        let start_tick = ticker.read();

        let root_accumulator = metric.create();
        root_accumulator.start(start_tick);

        let mut accumulators = Vec::with_capacity(METRICS_INITIAL_CAPACITY);
        accumulators.push(Arc::clone(&root_accumulator));

        let id = TraceId::generate(start_millis);
        debug!("Starting trace {} ({})", id, message.render());

        Self {
            id,
            start_millis,
            stuck: AtomicBool::new(false),
            background: AtomicBool::new(false),
            user_id: RwLock::new(None),
            attributes: Mutex::new(Vec::new()),
            accumulators: Mutex::new(accumulators),
            metrics: Mutex::new(vec![metric.clone(), overhead_metric.clone()]),
            overhead: overhead_metric.create(),
            final_snapshots: OnceLock::new(),
            span_tree: SpanTree::new(start_tick, message, root_accumulator, span_limit),
            coarse_stack_tree: OnceLock::new(),
            fine_stack_tree: OnceLock::new(),
            context: Arc::downgrade(&ExecutionContext::current()),
            coarse_profiling: ScheduleSlot::new("coarse profiling"),
            fine_profiling: ScheduleSlot::new("fine profiling"),
            stuck_detection: ScheduleSlot::new("stuck detection"),
            ticker,
        }
    }

    pub fn id(&self) -> &TraceId {
        &self.id
    }

    /// Wall-clock start in epoch millis
    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    pub fn start_tick(&self) -> u64 {
        self.span_tree.start_tick()
    }

    pub fn end_tick(&self) -> Option<u64> {
        self.span_tree.end_tick()
    }

    /// Current tick from the trace's ticker
    pub fn tick(&self) -> u64 {
        self.ticker.read()
    }

    /// Duration in nanos; for an active trace, the time elapsed so far
    pub fn duration(&self) -> u64 {
        match self.span_tree.duration() {
            Some(duration) => duration,
            None => self.ticker.read().saturating_sub(self.start_tick()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.span_tree.is_completed()
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck.load(Ordering::Acquire)
    }

    /// Mark the trace stuck, returning the previous value
    pub fn set_stuck(&self) -> bool {
        self.stuck.swap(true, Ordering::AcqRel)
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::Relaxed)
    }

    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::Relaxed);
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }

    pub fn is_error(&self) -> bool {
        self.span_tree.root().error().is_some()
    }

    /// True once fine-grained profiling has captured at least one sample
    pub fn is_fine(&self) -> bool {
        self.fine_stack_tree.get().is_some()
    }

    pub fn headline(&self) -> String {
        self.span_tree.root().message().render()
    }

    pub fn root_span(&self) -> &SpanHandle {
        self.span_tree.root()
    }

    pub fn is_root_span(&self, span: &SpanHandle) -> bool {
        Arc::ptr_eq(self.span_tree.root(), span)
    }

    pub fn span_tree(&self) -> &SpanTree {
        &self.span_tree
    }

    pub fn span_count(&self) -> usize {
        self.span_tree.len()
    }

    pub fn spans(&self) -> Vec<SpanHandle> {
        self.span_tree.spans()
    }

    pub fn coarse_stack_tree(&self) -> Option<&MergedStackTree> {
        self.coarse_stack_tree.get()
    }

    pub fn fine_stack_tree(&self) -> Option<&MergedStackTree> {
        self.fine_stack_tree.get()
    }

    /// Append an attribute
    pub fn set_attribute(&self, plugin_id: &str, name: &str, value: Option<String>) {
        let attribute = TraceAttribute {
            plugin_id: plugin_id.to_string(),
            name: name.to_string(),
            value,
        };
        let mut attributes = self.attributes.lock();
        if attributes.capacity() == 0 {
            attributes.reserve_exact(ATTRIBUTES_INITIAL_CAPACITY);
        }
        attributes.push(attribute);
    }

    /// Attributes with duplicates removed
    ///
    /// For each `(plugin_id, name)` the last value wins. Attributes of one
    /// plugin are kept together, plugins ordered by their first attribute.
    pub fn attributes(&self) -> Vec<TraceAttribute> {
        let attributes = self.attributes.lock().clone();

        let mut grouped: Vec<(String, Vec<TraceAttribute>)> = Vec::new();
        for attribute in attributes {
            let idx = match grouped.iter().position(|(plugin, _)| *plugin == attribute.plugin_id) {
                Some(idx) => idx,
                None => {
                    grouped.push((attribute.plugin_id.clone(), Vec::new()));
                    grouped.len() - 1
                }
            };
            let plugin_attributes = &mut grouped[idx].1;
            match plugin_attributes.iter_mut().find(|a| a.name == attribute.name) {
                Some(existing) => *existing = attribute,
                None => plugin_attributes.push(attribute),
            }
        }

        grouped.into_iter().flat_map(|(_, attributes)| attributes).collect()
    }

    /// Open a span under the innermost open span
    ///
    /// **Public** - owning thread only
    ///
    /// Resumes the accumulator already bound to `metric` on this thread, or
    /// registers a new one on first use.
    pub fn push_span(&self, metric: &Metric, message: Message, bypass_limit: bool) -> SpanHandle {
        let start_tick = self.ticker.read();
        let accumulator = match metric.get() {
            Some(accumulator) => accumulator,
            None => self.add_accumulator(metric),
        };
        accumulator.start(start_tick);
        self.span_tree
            .push(start_tick, message, Some(accumulator), bypass_limit)
    }

    /// Record a zero-length span, typically an error
    pub fn add_span(
        &self,
        message: Message,
        error: Option<ErrorMessage>,
        bypass_limit: bool,
    ) -> Option<SpanHandle> {
        self.span_tree
            .add(self.ticker.read(), message, error, bypass_limit)
    }

    /// Close `span`, and any spans still open above it
    ///
    /// **Public** - owning thread only
    pub fn pop_span(&self, span: &SpanHandle, end_tick: u64, error: Option<ErrorMessage>) {
        for closed in self.span_tree.pop(span, end_tick, error) {
            if let Some(accumulator) = closed.accumulator() {
                accumulator.stop(end_tick);
            }
        }
    }

    fn add_accumulator(&self, metric: &Metric) -> Arc<MetricAccumulator> {
        let accumulator = metric.create();
        self.accumulators.lock().push(Arc::clone(&accumulator));
        self.metrics.lock().push(metric.clone());
        accumulator
    }

    /// Accumulator that instrumentation uses to time its own overhead
    pub fn overhead_accumulator(&self) -> &Arc<MetricAccumulator> {
        &self.overhead
    }

    /// Metric snapshots in first-use order
    ///
    /// After `promote_metrics()` this is the cached final list. Before that it
    /// is a best-effort view of the live accumulators; the lock is held only
    /// long enough to copy the list.
    pub fn metric_snapshots(&self) -> Vec<MetricSnapshot> {
        let accumulators = {
            let accumulators = self.accumulators.lock();
            if let Some(snapshots) = self.final_snapshots.get() {
                return snapshots.clone();
            }
            accumulators.clone()
        };
        self.build_snapshots(&accumulators)
    }

    /// Compute and cache the final metric snapshots
    ///
    /// **Public** - owning thread only, once, after completion
    pub fn promote_metrics(&self) {
        let accumulators = self.accumulators.lock();
        if self.final_snapshots.get().is_some() {
            warn!("promote_metrics() called more than once for trace {}", self.id);
            return;
        }
        let _ = self.final_snapshots.set(self.build_snapshots(&accumulators));
    }

    fn build_snapshots(&self, accumulators: &[Arc<MetricAccumulator>]) -> Vec<MetricSnapshot> {
        let mut snapshots: Vec<MetricSnapshot> =
            accumulators.iter().map(|acc| acc.snapshot()).collect();
        if self.overhead.count() > 0 {
            snapshots.push(self.overhead.snapshot());
        }
        snapshots
    }

    /// Unbind every accumulator this trace bound to the owning thread
    ///
    /// **Public** - owning thread only, before the thread is reused
    pub fn reset_metric_accumulators(&self) {
        for metric in self.metrics.lock().iter() {
            metric.remove();
        }
    }

    /// Merge one stack sample of the owning thread
    ///
    /// **Public** - called by the scheduler
    ///
    /// Does nothing if the owning thread is gone, cannot be sampled, or the
    /// trace already completed (a sample can race with cancellation).
    pub fn capture_stack_sample(&self, source: &dyn StackSampleSource, fine: bool) {
        let Some(context) = self.context.upgrade() else {
            debug!("Owning thread of trace {} is gone, skipping sample", self.id);
            return;
        };
        let Some(sample) = source.sample(context.thread_id()) else {
            return;
        };
        if sample.state == RunState::Terminated {
            return;
        }
        if self.is_completed() {
            return;
        }

        let tree = if fine {
            &self.fine_stack_tree
        } else {
            &self.coarse_stack_tree
        };
        tree.get_or_init(MergedStackTree::new)
            .add_sample(&sample.frames);
    }

    pub fn set_coarse_profiling_task(&self, task: Box<dyn Cancellable>) {
        self.coarse_profiling.set(task);
    }

    pub fn set_fine_profiling_task(&self, task: Box<dyn Cancellable>) {
        self.fine_profiling.set(task);
    }

    pub fn set_stuck_task(&self, task: Box<dyn Cancellable>) {
        self.stuck_detection.set(task);
    }

    pub fn coarse_profiling_status(&self) -> ScheduleStatus {
        self.coarse_profiling.status()
    }

    pub fn fine_profiling_status(&self) -> ScheduleStatus {
        self.fine_profiling.status()
    }

    pub fn stuck_detection_status(&self) -> ScheduleStatus {
        self.stuck_detection.status()
    }

    /// Cancel all background activities of this trace
    pub fn cancel_scheduled_tasks(&self) {
        if !self.is_completed() {
            error!("canceling scheduled tasks of trace {} before it completed", self.id);
        }
        self.coarse_profiling.cancel();
        self.fine_profiling.cancel();
        self.stuck_detection.cancel();
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("id", &self.id)
            .field("start_millis", &self.start_millis)
            .field("stuck", &self.is_stuck())
            .field("background", &self.is_background())
            .field("user_id", &self.user_id())
            .field("completed", &self.is_completed())
            .field("span_count", &self.span_count())
            .field("coarse_profiling", &self.coarse_profiling)
            .field("fine_profiling", &self.fine_profiling)
            .field("stuck_detection", &self.stuck_detection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::{ManualClock, ManualTicker};

    fn new_trace(ticker: &Arc<ManualTicker>) -> (Trace, Metric, Metric) {
        let root_metric = Metric::new("http request");
        let overhead = Metric::new("instrumentation overhead");
        let trace = Trace::new(
            &root_metric,
            Message::text("GET /orders"),
            &overhead,
            ticker.clone(),
            &ManualClock::new(1_700_000_000_000),
            100,
        );
        (trace, root_metric, overhead)
    }

    #[test]
    fn test_trace_id_sorts_by_start() {
        let a = TraceId::generate(1000);
        let b = TraceId::generate(2000);
        assert!(a.as_str() < b.as_str());
        assert_eq!(a.as_str().len(), 20);
    }

    #[test]
    fn test_attribute_dedup_and_grouping() {
        let ticker = Arc::new(ManualTicker::new(0));
        let (trace, _, _) = new_trace(&ticker);
        trace.set_attribute("servlet", "method", Some("GET".to_string()));
        trace.set_attribute("jdbc", "url", Some("db1".to_string()));
        trace.set_attribute("servlet", "path", Some("/a".to_string()));
        trace.set_attribute("servlet", "method", Some("POST".to_string()));
        trace.set_attribute("jdbc", "url", None);

        let names: Vec<(String, String, Option<String>)> = trace
            .attributes()
            .into_iter()
            .map(|a| (a.plugin_id, a.name, a.value))
            .collect();
        assert_eq!(
            names,
            vec![
                ("servlet".to_string(), "method".to_string(), Some("POST".to_string())),
                ("servlet".to_string(), "path".to_string(), Some("/a".to_string())),
                ("jdbc".to_string(), "url".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_root_pop_completes_and_stops_root_metric() {
        let ticker = Arc::new(ManualTicker::new(100));
        let (trace, root_metric, overhead) = new_trace(&ticker);
        let root = Arc::clone(trace.root_span());
        assert!(trace.is_root_span(&root));

        trace.pop_span(&root, 600, None);
        assert!(trace.is_completed());
        assert_eq!(trace.duration(), 500);

        trace.promote_metrics();
        let snapshots = trace.metric_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "http request");
        assert_eq!(snapshots[0].total_nanos, 500);

        trace.reset_metric_accumulators();
        assert!(root_metric.get().is_none());
        assert!(overhead.get().is_none());
    }

    #[test]
    fn test_overhead_included_only_when_used() {
        let ticker = Arc::new(ManualTicker::new(0));
        let (trace, _, overhead) = new_trace(&ticker);
        overhead.get().unwrap().start(10);
        overhead.get().unwrap().stop(15);

        let root = Arc::clone(trace.root_span());
        trace.pop_span(&root, 20, None);
        trace.promote_metrics();

        let snapshots = trace.metric_snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].name, "instrumentation overhead");
        assert_eq!(snapshots[1].total_nanos, 5);
        trace.reset_metric_accumulators();
    }
}
