//! Flamegraph generation.
//!
//! This module converts collapsed stacks from merged stack samples into SVG
//! flamegraphs and terminal summaries. Widths show where sampled time went.

pub mod generator;

// Re-export main types
pub use generator::{
    generate_flamegraph,
    generate_text_summary,
    FlamegraphConfig,
    FlamegraphPalette,
};
