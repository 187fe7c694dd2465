//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the various library components to perform user tasks.

pub mod flamegraph;
pub mod rollup;
pub mod utils;

// Re-export main command functions
pub use flamegraph::{execute_flamegraph, FlamegraphArgs};
pub use rollup::{execute_rollup, validate_args, RollupArgs};
pub use utils::{display_schema, display_version, validate_config_file, validate_trace_file};
