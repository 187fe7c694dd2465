//! Trace capture model.
//!
//! This module handles:
//! - The trace aggregate and its attributes
//! - The span tree and its overflow policy
//! - Message and error descriptors
//! - The owning thread's execution context
//! - Per-trace slots for scheduled background work

pub mod context;
pub mod message;
pub mod schedule;
pub mod span_tree;
#[allow(clippy::module_inception)]
pub mod trace;

// Re-export main types
pub use context::ExecutionContext;
pub use message::{CapturedException, ErrorMessage, Message};
pub use schedule::{Cancellable, ScheduleSlot, ScheduleStatus};
pub use span_tree::{Span, SpanHandle, SpanTree};
pub use trace::{Trace, TraceAttribute, TraceId};
