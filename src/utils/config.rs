//! Configuration and constants for trace capture and rollup.
//!
//! Configuration is supplied as a JSON value set with camelCase keys.
//! Every option is optional; missing options fall back to the defaults below.

use super::error::ConfigError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current trace export schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum number of recorded spans per trace before the limit marker kicks in
pub const DEFAULT_SPAN_LIMIT: usize = 2000;

pub const DEFAULT_COARSE_SAMPLING_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_FINE_SAMPLING_INTERVAL_MS: u64 = 50;
pub const DEFAULT_STUCK_THRESHOLD_MS: u64 = 180_000;

/// Name of the accumulator that tracks time spent inside instrumentation itself
pub const OVERHEAD_METRIC_NAME: &str = "instrumentation overhead";

// Initial capacities for the per-trace lists, sized for typical traces
pub const ATTRIBUTES_INITIAL_CAPACITY: usize = 16;
pub const METRICS_INITIAL_CAPACITY: usize = 32;

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// One rollup level: records are grouped into right-closed buckets of
/// `bucket_width_ms` and kept for `expiration_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupLevel {
    pub bucket_width_ms: u64,
    pub expiration_ms: u64,
}

impl RollupLevel {
    pub const fn new(bucket_width_ms: u64, expiration_ms: u64) -> Self {
        Self {
            bucket_width_ms,
            expiration_ms,
        }
    }

    /// End of the bucket that `capture_time` falls into.
    ///
    /// Buckets are `(end - width, end]`, so a time sitting exactly on a
    /// boundary belongs to the bucket that ends there.
    pub fn bucket_end(&self, capture_time: u64) -> u64 {
        capture_time.div_ceil(self.bucket_width_ms) * self.bucket_width_ms
    }

    /// Start (exclusive) of the bucket ending at `bucket_end`
    pub fn bucket_start(&self, bucket_end: u64) -> u64 {
        bucket_end.saturating_sub(self.bucket_width_ms)
    }

    /// Latest bucket boundary at or before `time`
    pub fn bucket_floor(&self, time: u64) -> u64 {
        time - time % self.bucket_width_ms
    }
}

/// Default rollup levels: raw, 5 minutes, 30 minutes, 4 hours
pub fn default_rollup_levels() -> Vec<RollupLevel> {
    vec![
        RollupLevel::new(MINUTE_MS, 2 * DAY_MS),
        RollupLevel::new(5 * MINUTE_MS, 7 * DAY_MS),
        RollupLevel::new(30 * MINUTE_MS, 30 * DAY_MS),
        RollupLevel::new(4 * HOUR_MS, 365 * DAY_MS),
    ]
}

/// Capture and rollup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub span_limit: usize,

    /// Coarse stack sampling period, 0 disables coarse profiling
    pub coarse_sampling_interval_ms: u64,

    /// Fine stack sampling period, 0 disables fine profiling
    pub fine_sampling_interval_ms: u64,

    /// Level 0 is raw data, each following level is coarser
    pub rollup_levels: Vec<RollupLevel>,

    /// Traces still active after this long are marked stuck, 0 disables
    pub stuck_threshold_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            span_limit: DEFAULT_SPAN_LIMIT,
            coarse_sampling_interval_ms: DEFAULT_COARSE_SAMPLING_INTERVAL_MS,
            fine_sampling_interval_ms: DEFAULT_FINE_SAMPLING_INTERVAL_MS,
            rollup_levels: default_rollup_levels(),
            stuck_threshold_ms: DEFAULT_STUCK_THRESHOLD_MS,
        }
    }
}

impl Config {
    /// Parse and validate configuration from a JSON string
    ///
    /// **Public** - main entry point for configuration loading
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        debug!(
            "Loaded config: span limit {}, {} rollup levels",
            config.span_limit,
            config.rollup_levels.len()
        );
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Reading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check the rollup levels, see [`validate_rollup_levels`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_rollup_levels(&self.rollup_levels)
    }
}

/// Check the invariants the rollup pipeline relies on
///
/// # Errors
/// * `ConfigError::Invalid` - no levels, a zero width, or a level that is
///   not a strictly coarser multiple of the one before it
pub fn validate_rollup_levels(levels: &[RollupLevel]) -> Result<(), ConfigError> {
    if levels.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one rollup level (raw) is required".to_string(),
        ));
    }

    for (i, level) in levels.iter().enumerate() {
        if level.bucket_width_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "rollup level {} has a zero bucket width",
                i
            )));
        }
    }

    for (i, pair) in levels.windows(2).enumerate() {
        let (finer, coarser) = (pair[0], pair[1]);
        if coarser.bucket_width_ms <= finer.bucket_width_ms {
            return Err(ConfigError::Invalid(format!(
                "rollup level {} ({} ms) must be coarser than level {} ({} ms)",
                i + 1,
                coarser.bucket_width_ms,
                i,
                finer.bucket_width_ms
            )));
        }
        if coarser.bucket_width_ms % finer.bucket_width_ms != 0 {
            return Err(ConfigError::Invalid(format!(
                "rollup level {} width {} ms is not a multiple of level {} width {} ms",
                i + 1,
                coarser.bucket_width_ms,
                i,
                finer.bucket_width_ms
            )));
        }
    }

    Ok(())
}
