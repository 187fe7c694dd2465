//! Output writers for trace data and flamegraphs.
//!
//! This module handles writing data to disk in various formats:
//! - JSON trace views
//! - JSON capture records
//! - SVG flamegraphs

pub mod json;
pub mod schema;
pub mod svg;

// Re-export main functions
pub use json::{
    read_records, read_trace_view, trace_view_to_string, write_records, write_trace_view,
};
pub use schema::{SpanView, TraceView};
pub use svg::write_svg;
