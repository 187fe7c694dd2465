//! Trace lifecycle on the monitored thread.
//!
//! The manager starts a trace on the calling thread, wires its background
//! activities into the scheduler and, when the root span pops, completes it
//! and hands it to the sink. Scheduled closures hold only a `Weak<Trace>`, so a
//! completed trace is never kept alive by its own timers.

use super::scheduler::Scheduler;
use crate::metrics::Metric;
use crate::profiler::StackSampleSource;
use crate::trace::{ErrorMessage, Message, SpanHandle, Trace};
use crate::utils::clock::{Clock, Ticker};
use crate::utils::config::{Config, OVERHEAD_METRIC_NAME};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::time::Duration;

thread_local! {
    static CURRENT_TRACE: RefCell<Option<Arc<Trace>>> = const { RefCell::new(None) };
}

/// Receives every trace once it completes
pub trait TraceSink: Send + Sync {
    fn on_completed(&self, trace: Arc<Trace>);
}

pub struct TraceManager {
    config: Config,
    scheduler: Arc<Scheduler>,
    sample_source: Arc<dyn StackSampleSource>,
    sink: Arc<dyn TraceSink>,
    ticker: Arc<dyn Ticker>,
    clock: Arc<dyn Clock>,
    overhead_metric: Metric,
}

impl TraceManager {
    /// **Public** - build a manager around a shared scheduler
    ///
    /// # Arguments
    /// * `config` - Span limit, sampling intervals and stuck threshold
    /// * `scheduler` - Timer thread that runs sampling and stuck detection
    /// * `sample_source` - Provider of thread stack samples
    /// * `sink` - Collaborator that receives completed traces
    /// * `ticker` - Nanosecond tick source
    /// * `clock` - Wall clock for trace start times
    pub fn new(
        config: Config,
        scheduler: Arc<Scheduler>,
        sample_source: Arc<dyn StackSampleSource>,
        sink: Arc<dyn TraceSink>,
        ticker: Arc<dyn Ticker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            scheduler,
            sample_source,
            sink,
            ticker,
            clock,
            overhead_metric: Metric::new(OVERHEAD_METRIC_NAME),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metric that instrumentation uses to time its own work
    pub fn overhead_metric(&self) -> &Metric {
        &self.overhead_metric
    }

    /// The trace active on the calling thread
    pub fn current_trace(&self) -> Option<Arc<Trace>> {
        CURRENT_TRACE.with(|current| current.borrow().clone())
    }

    /// Start a trace on the calling thread
    ///
    /// **Public** - entry point for instrumented units of work
    ///
    /// If the thread already runs a trace, a span is pushed on it instead, so
    /// nested entry points collapse into one trace.
    ///
    /// # Returns
    /// * Handle to pop when the unit of work ends
    pub fn start_trace(&self, metric: &Metric, message: Message) -> SpanHandle {
        if let Some(trace) = self.current_trace() {
            if !trace.is_completed() {
                return trace.push_span(metric, message, false);
            }
        }

        let trace = Arc::new(Trace::new(
            metric,
            message,
            &self.overhead_metric,
            Arc::clone(&self.ticker),
            self.clock.as_ref(),
            self.config.span_limit,
        ));
        CURRENT_TRACE.with(|current| *current.borrow_mut() = Some(Arc::clone(&trace)));

        self.schedule_stuck_detection(&trace);
        self.schedule_profiling(&trace, false, self.config.coarse_sampling_interval_ms);
        self.schedule_profiling(&trace, true, self.config.fine_sampling_interval_ms);

        Arc::clone(trace.root_span())
    }

    /// Open a span on the current trace, `None` when no trace is active
    pub fn push_span(&self, metric: &Metric, message: Message) -> Option<SpanHandle> {
        self.current_trace()
            .map(|trace| trace.push_span(metric, message, false))
    }

    /// Record a zero-length span on the current trace
    pub fn add_span(&self, message: Message, error: Option<ErrorMessage>) -> Option<SpanHandle> {
        self.current_trace()
            .and_then(|trace| trace.add_span(message, error, false))
    }

    /// Close a span of the current trace, completing it when the root pops
    pub fn pop_span(&self, span: &SpanHandle, error: Option<ErrorMessage>) {
        let Some(trace) = self.current_trace() else {
            warn!("pop_span() called with no active trace on this thread");
            return;
        };

        let end_tick = trace.tick();
        trace.pop_span(span, end_tick, error);
        if trace.is_completed() {
            self.complete(trace);
        }
    }

    pub fn set_attribute(&self, plugin_id: &str, name: &str, value: Option<String>) {
        if let Some(trace) = self.current_trace() {
            trace.set_attribute(plugin_id, name, value);
        }
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        if let Some(trace) = self.current_trace() {
            trace.set_user_id(user_id);
        }
    }

    fn complete(&self, trace: Arc<Trace>) {
        trace.cancel_scheduled_tasks();
        trace.promote_metrics();
        trace.reset_metric_accumulators();
        CURRENT_TRACE.with(|current| current.borrow_mut().take());

        info!(
            "Completed trace {} '{}' in {} ns ({} spans)",
            trace.id(),
            trace.headline(),
            trace.duration(),
            trace.span_count()
        );
        self.sink.on_completed(trace);
    }

    fn schedule_stuck_detection(&self, trace: &Arc<Trace>) {
        if self.config.stuck_threshold_ms == 0 {
            return;
        }

        let weak: Weak<Trace> = Arc::downgrade(trace);
        let handle = self
            .scheduler
            .schedule_once(Duration::from_millis(self.config.stuck_threshold_ms), move || {
                let Some(trace) = weak.upgrade() else {
                    return;
                };
                if trace.is_completed() {
                    return;
                }
                if !trace.set_stuck() {
                    warn!("Trace {} '{}' is stuck", trace.id(), trace.headline());
                }
            });
        trace.set_stuck_task(Box::new(handle));
    }

    fn schedule_profiling(&self, trace: &Arc<Trace>, fine: bool, interval_ms: u64) {
        if interval_ms == 0 {
            debug!("{} profiling disabled", if fine { "Fine" } else { "Coarse" });
            return;
        }

        let weak: Weak<Trace> = Arc::downgrade(trace);
        let source = Arc::clone(&self.sample_source);
        let interval = Duration::from_millis(interval_ms);
        let handle = self.scheduler.schedule_repeating(interval, interval, move || {
            if let Some(trace) = weak.upgrade() {
                trace.capture_stack_sample(source.as_ref(), fine);
            }
        });

        if fine {
            trace.set_fine_profiling_task(Box::new(handle));
        } else {
            trace.set_coarse_profiling_task(Box::new(handle));
        }
    }
}
