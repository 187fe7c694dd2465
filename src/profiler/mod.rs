//! Stack sampling and merged stack trees.
//!
//! This module provides:
//! - The sample source contract used to read another thread's call chain
//! - The merged stack tree that accumulates samples for one trace
//! - Collapsed stack format (for flamegraph generation)

pub mod merged_stack;
pub mod sample;

// Re-export main types
pub use merged_stack::{CollapsedStack, MergedStackTree, StackNode, StackTreeSnapshot};
pub use sample::{RunState, StackFrame, StackSampleSource, ThreadSample};
