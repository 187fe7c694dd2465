//! Output JSON schema for captured traces.
//!
//! This module defines the structure of trace files we write to disk.
//! Schema is versioned to allow future evolution.

use crate::metrics::MetricSnapshot;
use crate::profiler::{CollapsedStack, MergedStackTree};
use crate::trace::{ErrorMessage, Message, Span, Trace, TraceAttribute};
use crate::utils::config::SCHEMA_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of one trace, written to JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceView {
    /// Schema version for compatibility checking
    pub version: String,

    pub id: String,

    /// Rendered root span message
    pub headline: String,

    /// Trace start as RFC 3339
    pub start_time: String,

    pub start_millis: u64,

    /// Elapsed so far when the trace is still active
    pub duration_nanos: u64,

    pub completed: bool,
    pub stuck: bool,
    pub background: bool,

    /// Root span error, if the trace failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Deduplicated attributes, grouped by plugin
    pub attributes: Vec<TraceAttribute>,

    /// Metric snapshots in first-use order
    pub metrics: Vec<MetricSnapshot>,

    /// Recorded spans in pre-order
    pub spans: Vec<SpanView>,

    pub span_limit_exceeded: bool,

    /// Coarse profile as collapsed stacks, hottest first
    pub coarse_stacks: Vec<CollapsedStack>,

    /// Fine profile as collapsed stacks, hottest first
    pub fine_stacks: Vec<CollapsedStack>,

    /// Timestamp when the view was generated
    pub generated_at: String,
}

/// One recorded span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanView {
    pub index: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,

    pub nesting_level: usize,

    /// Start relative to the trace start
    pub offset_nanos: u64,

    /// None while the span is open
    pub duration_nanos: Option<u64>,

    pub text: String,
    pub message: Message,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    pub limit_marker: bool,
}

impl SpanView {
    fn from_span(span: &Span, trace_start_tick: u64) -> Self {
        Self {
            index: span.index().unwrap_or_default(),
            parent: span.parent(),
            nesting_level: span.nesting_level(),
            offset_nanos: span.start_tick().saturating_sub(trace_start_tick),
            duration_nanos: span.duration(),
            text: span.message().render(),
            message: span.message().clone(),
            error: span.error().cloned(),
            metric: span.accumulator().map(|acc| acc.name().to_string()),
            limit_marker: span.is_limit_marker(),
        }
    }
}

impl TraceView {
    /// Snapshot a trace, active or completed
    ///
    /// **Public** - what a trace sink serializes
    pub fn from_trace(trace: &Trace) -> Self {
        let start_tick = trace.start_tick();
        let spans = trace
            .spans()
            .iter()
            .map(|span| SpanView::from_span(span, start_tick))
            .collect();

        Self {
            version: SCHEMA_VERSION.to_string(),
            id: trace.id().to_string(),
            headline: trace.headline(),
            start_time: format_millis(trace.start_millis()),
            start_millis: trace.start_millis(),
            duration_nanos: trace.duration(),
            completed: trace.is_completed(),
            stuck: trace.is_stuck(),
            background: trace.is_background(),
            error: trace.root_span().error().map(|e| e.render().to_string()),
            user_id: trace.user_id(),
            attributes: trace.attributes(),
            metrics: trace.metric_snapshots(),
            spans,
            span_limit_exceeded: trace.span_tree().is_limit_exceeded(),
            coarse_stacks: collapsed(trace.coarse_stack_tree()),
            fine_stacks: collapsed(trace.fine_stack_tree()),
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Total samples of the coarse profile
    pub fn coarse_sample_count(&self) -> u64 {
        self.coarse_stacks.iter().map(|s| s.weight).sum()
    }

    /// Total samples of the fine profile
    pub fn fine_sample_count(&self) -> u64 {
        self.fine_stacks.iter().map(|s| s.weight).sum()
    }
}

fn collapsed(tree: Option<&MergedStackTree>) -> Vec<CollapsedStack> {
    tree.map(MergedStackTree::collapsed).unwrap_or_default()
}

fn format_millis(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metric;
    use crate::utils::clock::{ManualClock, ManualTicker};
    use std::sync::Arc;

    #[test]
    fn test_view_of_completed_trace() {
        let ticker = Arc::new(ManualTicker::new(1_000));
        let root_metric = Metric::new("http request");
        let query = Metric::new("jdbc query");
        let trace = Trace::new(
            &root_metric,
            Message::text("GET /orders"),
            &Metric::new("instrumentation overhead"),
            ticker.clone(),
            &ManualClock::new(0),
            10,
        );
        trace.set_user_id(Some("alice".to_string()));

        ticker.set(1_100);
        let child = trace.push_span(&query, Message::text("select * from orders"), false);
        trace.pop_span(&child, 1_400, Some(ErrorMessage::text("timeout")));
        let root = Arc::clone(trace.root_span());
        trace.pop_span(&root, 2_000, None);
        trace.promote_metrics();
        trace.reset_metric_accumulators();

        let view = TraceView::from_trace(&trace);
        assert_eq!(view.start_time, "1970-01-01T00:00:00+00:00");
        assert_eq!(view.duration_nanos, 1_000);
        assert!(view.completed);
        assert!(view.error.is_none());
        assert_eq!(view.user_id.as_deref(), Some("alice"));
        assert_eq!(view.spans.len(), 2);

        let span = &view.spans[1];
        assert_eq!(span.parent, Some(0));
        assert_eq!(span.offset_nanos, 100);
        assert_eq!(span.duration_nanos, Some(300));
        assert_eq!(span.metric.as_deref(), Some("jdbc query"));
        assert_eq!(span.error.as_ref().map(|e| e.render()), Some("timeout"));
        assert_eq!(view.metrics.len(), 2);
        assert_eq!(view.coarse_sample_count(), 0);
    }
}
