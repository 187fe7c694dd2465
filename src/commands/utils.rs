use crate::output::read_trace_view;
use crate::utils::config::{Config, SCHEMA_VERSION};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Validate a trace view JSON file
pub fn validate_trace_file(file_path: PathBuf) -> Result<()> {
    println!("Validating trace: {}", file_path.display());

    let view = read_trace_view(&file_path)?;

    println!("✓ Valid trace JSON");
    println!("  Version: {}", view.version);
    println!("  Trace: {} ({})", view.id, view.headline);
    println!("  Started: {}", view.start_time);
    println!("  Duration: {} ns", view.duration_nanos);
    println!("  Spans: {}", view.spans.len());
    println!("  Metrics: {}", view.metrics.len());
    println!("  Coarse samples: {}", view.coarse_sample_count());

    Ok(())
}

/// Validate a configuration file
pub fn validate_config_file(file_path: PathBuf) -> Result<()> {
    println!("Validating config: {}", file_path.display());

    let config = Config::from_file(&file_path)
        .with_context(|| format!("Invalid config {}", file_path.display()))?;

    println!("✓ Valid configuration");
    println!("  Span limit: {}", config.span_limit);
    println!("  Coarse sampling: {} ms", config.coarse_sampling_interval_ms);
    println!("  Fine sampling: {} ms", config.fine_sampling_interval_ms);
    println!("  Stuck threshold: {} ms", config.stuck_threshold_ms);
    for (i, level) in config.rollup_levels.iter().enumerate() {
        println!(
            "  Level {}: {} ms buckets, kept {} ms",
            i, level.bucket_width_ms, level.expiration_ms
        );
    }

    Ok(())
}

/// Display schema information
pub fn display_schema(show_details: bool) {
    println!("APM Capture Trace Schema");
    println!("Current Version: {}", SCHEMA_VERSION);
    println!();

    if show_details {
        println!("Schema Structure:");
        println!("  version: string          - Schema version (e.g., '1.0.0')");
        println!("  id: string               - Trace id");
        println!("  headline: string         - Root span message");
        println!("  start_time: string       - RFC 3339 start time");
        println!("  duration_nanos: number   - Trace duration");
        println!("  stuck, background, completed: bool");
        println!("  error: string?           - Root span error");
        println!("  attributes: array        - plugin_id, name, value");
        println!("  metrics: array           - name, count, total/min/max nanos");
        println!("  spans: array             - Recorded spans in pre-order");
        println!("  coarse_stacks: array     - stack, weight");
        println!("  fine_stacks: array       - stack, weight");
        println!("  generated_at: string     - ISO 8601 timestamp");
    } else {
        println!("Use --show for detailed schema information");
    }
}

/// Display version information
pub fn display_version() {
    println!("APM Capture v{}", env!("CARGO_PKG_VERSION"));
    println!("Trace Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("In-process trace capture and rollup aggregation.");
}
