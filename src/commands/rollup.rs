//! Rollup command implementation.
//!
//! The rollup command:
//! 1. Loads and validates the rollup configuration
//! 2. Reads raw capture records
//! 3. Stores them through the aggregator
//! 4. Rolls up every logical id
//! 5. Writes the records of the requested level

use crate::output::{read_records, write_records};
use crate::rollup::{CaptureRecord, MemoryStore, RollupAggregator, TimeSeriesStore};
use crate::utils::clock::{Clock, ManualClock, SystemClock};
use crate::utils::config::Config;
use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Arguments for the rollup command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct RollupArgs {
    /// JSON array of raw capture records
    pub input: PathBuf,

    /// Output path for the rolled-up records
    pub output: PathBuf,

    /// Config file with rollup levels (defaults when absent)
    pub config: Option<PathBuf>,

    /// Level whose records are written
    pub level: usize,

    /// Treat this epoch millis as "now" instead of the system clock
    pub now_millis: Option<u64>,

    /// Print text summary to stdout
    pub print_summary: bool,
}

impl Default for RollupArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::from("records.json"),
            output: PathBuf::from("rollup.json"),
            config: None,
            level: 1,
            now_millis: None,
            print_summary: false,
        }
    }
}

/// Execute the rollup command
///
/// **Public** - main entry point called from main.rs
///
/// # Errors
/// * Config file unreadable or invalid
/// * Input records unreadable or not raw captures
/// * Requested level not configured
/// * File write errors
pub fn execute_rollup(args: RollupArgs) -> Result<()> {
    let start_time = Instant::now();

    info!("Starting rollup of: {}", args.input.display());

    // Step 1: Load config
    info!("Step 1/5: Loading configuration...");
    let config = load_config(args.config.as_ref())?;
    if args.level >= config.rollup_levels.len() {
        anyhow::bail!(
            "level {} is not configured ({} levels)",
            args.level,
            config.rollup_levels.len()
        );
    }

    // Step 2: Read raw records
    info!("Step 2/5: Reading raw records...");
    let records = read_records(&args.input).context("Failed to read capture records")?;
    validate_records(&records)?;
    debug!("Read {} raw record(s)", records.len());

    // Step 3: Store
    info!("Step 3/5: Storing raw records...");
    let store = Arc::new(MemoryStore::new(config.rollup_levels.len()));
    let clock: Arc<dyn Clock> = match args.now_millis {
        Some(now) => Arc::new(ManualClock::new(now)),
        None => Arc::new(SystemClock),
    };
    let aggregator = RollupAggregator::new(store.clone(), config.rollup_levels.clone(), clock)
        .context("Invalid rollup levels")?;

    let mut logical_ids = BTreeSet::new();
    for record in &records {
        aggregator
            .store(
                &record.logical_id,
                &record.key,
                record.capture_time,
                record.total_duration_nanos,
                record.error_count > 0,
            )
            .context("Failed to store raw record")?;
        logical_ids.insert(record.logical_id.clone());
    }

    // Step 4: Rollup
    info!("Step 4/5: Rolling up {} logical id(s)...", logical_ids.len());
    let mut buckets = 0;
    for logical_id in &logical_ids {
        buckets += aggregator
            .rollup(logical_id)
            .with_context(|| format!("Failed to roll up '{}'", logical_id))?;
    }
    let still_pending = aggregator
        .pending_ids()
        .context("Failed to read pending rollups")?;
    if !still_pending.is_empty() {
        info!("{} logical id(s) have records in buckets still open", still_pending.len());
    }

    // Step 5: Write outputs
    info!("Step 5/5: Writing level {} records...", args.level);
    let mut output = Vec::new();
    for logical_id in &logical_ids {
        output.extend(
            store
                .query_range(logical_id, 0, u64::MAX, args.level)
                .context("Failed to read rolled-up records")?,
        );
    }
    write_records(&output, &args.output).context("Failed to write rolled-up records")?;

    info!("✓ Records written to: {}", args.output.display());

    if args.print_summary {
        println!("\n{}", "=".repeat(80));
        println!("ROLLUP SUMMARY");
        println!("{}", "=".repeat(80));
        println!("Raw records:     {}", records.len());
        println!("Logical ids:     {}", logical_ids.len());
        println!("Buckets written: {}", buckets);
        println!("Level {} records: {}", args.level, output.len());
        for record in output.iter().take(10) {
            println!(
                "  {} {} @{}: {} executions, {} errors, {} ns",
                record.logical_id,
                record.key,
                record.capture_time,
                record.execution_count,
                record.error_count,
                record.total_duration_nanos
            );
        }
        println!("{}", "=".repeat(80));
    }

    let elapsed = start_time.elapsed();
    info!("Rollup completed in {:.2}s", elapsed.as_secs_f64());

    Ok(())
}

/// Load the config file, or the defaults
///
/// **Private** - internal helper for execute_rollup
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Validate rollup arguments
///
/// **Public** - can be called before execute_rollup for early validation
pub fn validate_args(args: &RollupArgs) -> Result<()> {
    if args.input.as_os_str().is_empty() {
        anyhow::bail!("Input path cannot be empty");
    }

    if args.output.as_os_str().is_empty() {
        anyhow::bail!("Output path cannot be empty");
    }

    if args.input == args.output {
        anyhow::bail!("Output would overwrite the input records");
    }

    if args.level == 0 {
        anyhow::bail!("level must be greater than 0 (level 0 is the raw input)");
    }

    Ok(())
}

/// Every input record must be a single raw capture
///
/// **Private** - internal validation
fn validate_records(records: &[CaptureRecord]) -> Result<()> {
    for (i, record) in records.iter().enumerate() {
        if record.execution_count != 1 {
            anyhow::bail!(
                "record {} has execution count {}, expected a raw capture",
                i,
                record.execution_count
            );
        }
        if record.error_count > 1 {
            anyhow::bail!("record {} has error count {}", i, record.error_count);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_args_valid() {
        assert!(validate_args(&RollupArgs::default()).is_ok());
    }

    #[test]
    fn test_validate_args_level_zero() {
        let args = RollupArgs {
            level: 0,
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_same_paths() {
        let args = RollupArgs {
            output: PathBuf::from("records.json"),
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_records_rejects_aggregates() {
        let mut record = CaptureRecord::raw("app", "GET /", 1, 1, false);
        assert!(validate_records(std::slice::from_ref(&record)).is_ok());
        record.execution_count = 3;
        assert!(validate_records(&[record]).is_err());
    }
}
