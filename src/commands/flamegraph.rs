//! Flamegraph command implementation.
//!
//! Renders the stack profile of a saved trace view as an SVG flamegraph.

use crate::flamegraph::{generate_flamegraph, generate_text_summary, FlamegraphConfig};
use crate::output::{read_trace_view, write_svg};
use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

/// Arguments for the flamegraph command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct FlamegraphArgs {
    /// Trace view JSON written by a trace sink
    pub input: PathBuf,

    /// Output path for the SVG
    pub output: PathBuf,

    /// Render the fine profile instead of the coarse one
    pub fine: bool,

    pub flamegraph_config: FlamegraphConfig,

    /// Print text summary with this many stacks
    pub summary_lines: Option<usize>,
}

/// Execute the flamegraph command
///
/// **Public** - main entry point called from main.rs
pub fn execute_flamegraph(args: FlamegraphArgs) -> Result<()> {
    let view = read_trace_view(&args.input).context("Failed to read trace view")?;
    info!("Loaded trace {} '{}'", view.id, view.headline);

    let (stacks, total) = if args.fine {
        (&view.fine_stacks, view.fine_sample_count())
    } else {
        (&view.coarse_stacks, view.coarse_sample_count())
    };

    let svg = generate_flamegraph(stacks, Some(&args.flamegraph_config)).with_context(|| {
        format!(
            "Trace {} has no {} profile",
            view.id,
            if args.fine { "fine" } else { "coarse" }
        )
    })?;
    write_svg(&svg, &args.output).context("Failed to write flamegraph SVG")?;

    info!("✓ Flamegraph written to: {}", args.output.display());

    if let Some(lines) = args.summary_lines {
        println!("\nTrace {}: {} ({} samples)", view.id, view.headline, total);
        println!("\n{}", generate_text_summary(stacks, lines, total));
    }

    Ok(())
}
