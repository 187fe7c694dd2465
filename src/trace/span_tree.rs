//! Ordered tree of spans for one trace.
//!
//! Spans are recorded in pre-order in a flat list; each span points at the
//! recorded index of its nearest recorded ancestor. Open spans additionally
//! live on a stack that only the owning thread touches.
//!
//! Once the number of recorded spans reaches the span limit, a single marker
//! span is appended and further ordinary spans are left out of the list. They
//! still take part in push/pop so their handles stay valid.

use super::message::{ErrorMessage, Message};
use crate::metrics::MetricAccumulator;
use log::{error, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

const LIMIT_EXCEEDED_TEXT: &str = "span limit exceeded";

/// One operation boundary within a trace
#[derive(Debug)]
pub struct Span {
    start_tick: u64,
    end_tick: OnceLock<u64>,
    nesting_level: usize,
    index: Option<usize>,
    parent: Option<usize>,
    message: Message,
    error: OnceLock<ErrorMessage>,
    accumulator: Option<Arc<MetricAccumulator>>,
    limit_marker: bool,
}

/// Handle returned by push, passed back to pop
pub type SpanHandle = Arc<Span>;

impl Span {
    pub fn start_tick(&self) -> u64 {
        self.start_tick
    }

    /// `None` while the span is open
    pub fn end_tick(&self) -> Option<u64> {
        self.end_tick.get().copied()
    }

    pub fn duration(&self) -> Option<u64> {
        self.end_tick().map(|end| end.saturating_sub(self.start_tick))
    }

    pub fn is_closed(&self) -> bool {
        self.end_tick.get().is_some()
    }

    pub fn nesting_level(&self) -> usize {
        self.nesting_level
    }

    /// Position in the recorded list, `None` if the span limit suppressed it
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Recorded index of the nearest recorded ancestor
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn error(&self) -> Option<&ErrorMessage> {
        self.error.get()
    }

    pub fn accumulator(&self) -> Option<&Arc<MetricAccumulator>> {
        self.accumulator.as_ref()
    }

    pub fn is_limit_marker(&self) -> bool {
        self.limit_marker
    }

    fn close(&self, end_tick: u64) {
        // end >= start even if the caller's tick source went backwards
        let _ = self.end_tick.set(end_tick.max(self.start_tick));
    }
}

/// Root span plus every span nested under it
#[derive(Debug)]
pub struct SpanTree {
    root: SpanHandle,
    spans: RwLock<Vec<SpanHandle>>,
    open: Mutex<Vec<SpanHandle>>,
    span_limit: usize,
    limit_exceeded: AtomicBool,
    completed: AtomicBool,
}

impl SpanTree {
    /// Create a tree whose root span opens at `start_tick`
    pub fn new(
        start_tick: u64,
        message: Message,
        accumulator: Arc<MetricAccumulator>,
        span_limit: usize,
    ) -> Self {
        let root = Arc::new(Span {
            start_tick,
            end_tick: OnceLock::new(),
            nesting_level: 0,
            index: Some(0),
            parent: None,
            message,
            error: OnceLock::new(),
            accumulator: Some(accumulator),
            limit_marker: false,
        });
        let mut spans = Vec::with_capacity(16);
        spans.push(Arc::clone(&root));

        Self {
            root: Arc::clone(&root),
            spans: RwLock::new(spans),
            open: Mutex::new(vec![root]),
            span_limit,
            limit_exceeded: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &SpanHandle {
        &self.root
    }

    /// Open a child of the innermost open span
    ///
    /// **Public** - called by the owning thread only
    ///
    /// # Arguments
    /// * `start_tick` - Tick at which the span opens
    /// * `message` - What the span is doing
    /// * `accumulator` - Accumulator already started for this span
    /// * `bypass_limit` - Record the span even past the span limit
    pub fn push(
        &self,
        start_tick: u64,
        message: Message,
        accumulator: Option<Arc<MetricAccumulator>>,
        bypass_limit: bool,
    ) -> SpanHandle {
        let mut open = self.open.lock();
        if open.is_empty() {
            warn!("push after the root span closed, span will not be recorded");
            return Arc::new(Span {
                start_tick,
                end_tick: OnceLock::new(),
                nesting_level: 0,
                index: None,
                parent: None,
                message,
                error: OnceLock::new(),
                accumulator,
                limit_marker: false,
            });
        }

        let span = self.new_child(&open, start_tick, message, accumulator, bypass_limit);
        open.push(Arc::clone(&span));
        span
    }

    /// Record an already-closed, zero-length span under the innermost open span
    ///
    /// Returns `None` when the span limit suppressed it.
    pub fn add(
        &self,
        tick: u64,
        message: Message,
        error: Option<ErrorMessage>,
        bypass_limit: bool,
    ) -> Option<SpanHandle> {
        let open = self.open.lock();
        if open.is_empty() {
            warn!("add after the root span closed, span will not be recorded");
            return None;
        }

        let span = self.new_child(&open, tick, message, None, bypass_limit);
        if let Some(error) = error {
            let _ = span.error.set(error);
        }
        span.close(tick);
        span.index.map(|_| span)
    }

    fn new_child(
        &self,
        open: &[SpanHandle],
        start_tick: u64,
        message: Message,
        accumulator: Option<Arc<MetricAccumulator>>,
        bypass_limit: bool,
    ) -> SpanHandle {
        let parent = open.iter().rev().find_map(|span| span.index);
        let nesting_level = open.len();

        let mut spans = self.spans.write();
        let recorded = spans.len() - usize::from(self.limit_exceeded.load(Ordering::Relaxed));
        let index = if recorded < self.span_limit || bypass_limit {
            Some(spans.len())
        } else {
            if !self.limit_exceeded.swap(true, Ordering::Relaxed) {
                warn!("span limit of {} exceeded, dropping further spans", self.span_limit);
                let marker_index = spans.len();
                spans.push(Arc::new(Span {
                    start_tick,
                    end_tick: OnceLock::from(start_tick),
                    nesting_level,
                    index: Some(marker_index),
                    parent,
                    message: Message::text(LIMIT_EXCEEDED_TEXT),
                    error: OnceLock::new(),
                    accumulator: None,
                    limit_marker: true,
                }));
            }
            None
        };

        let span = Arc::new(Span {
            start_tick,
            end_tick: OnceLock::new(),
            nesting_level,
            index,
            parent,
            message,
            error: OnceLock::new(),
            accumulator,
            limit_marker: false,
        });
        if index.is_some() {
            spans.push(Arc::clone(&span));
        }
        span
    }

    /// Close `span` at `end_tick`
    ///
    /// **Public** - called by the owning thread only
    ///
    /// If `span` is not the innermost open span, every span opened after it
    /// is closed first, so a missed pop can never keep the trace from
    /// completing.
    ///
    /// # Returns
    /// Every span closed by this call, innermost first (`span` last)
    pub fn pop(
        &self,
        span: &SpanHandle,
        end_tick: u64,
        error: Option<ErrorMessage>,
    ) -> Vec<SpanHandle> {
        if span.is_closed() {
            warn!("pop of a span that is already closed: {}", span.message.render());
            return Vec::new();
        }

        if let Some(error) = error {
            let _ = span.error.set(error);
        }

        let mut open = self.open.lock();
        let Some(pos) = open.iter().rposition(|s| Arc::ptr_eq(s, span)) else {
            // only spans pushed after completion are missing from the stack
            span.close(end_tick);
            return vec![Arc::clone(span)];
        };

        if pos + 1 != open.len() {
            error!(
                "found {} unclosed span(s) above '{}', closing them",
                open.len() - pos - 1,
                span.message.render()
            );
        }

        let closed: Vec<SpanHandle> = open.drain(pos..).rev().collect();
        for s in &closed {
            s.close(end_tick);
        }

        if open.is_empty() {
            self.completed.store(true, Ordering::Release);
        }
        closed
    }

    /// True once the root span has closed
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Number of currently open spans
    pub fn depth(&self) -> usize {
        self.open.lock().len()
    }

    /// Number of recorded spans, including the limit marker
    pub fn len(&self) -> usize {
        self.spans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_limit_exceeded(&self) -> bool {
        self.limit_exceeded.load(Ordering::Relaxed)
    }

    /// Copy of the recorded spans in pre-order
    pub fn spans(&self) -> Vec<SpanHandle> {
        self.spans.read().clone()
    }

    /// Recorded children of the span at `index`, in order
    pub fn children(&self, index: usize) -> Vec<SpanHandle> {
        self.spans
            .read()
            .iter()
            .filter(|span| span.parent == Some(index))
            .cloned()
            .collect()
    }

    pub fn start_tick(&self) -> u64 {
        self.root.start_tick
    }

    pub fn end_tick(&self) -> Option<u64> {
        self.root.end_tick()
    }

    /// Root end tick minus root start tick, once completed
    pub fn duration(&self) -> Option<u64> {
        self.root.duration()
    }
}
