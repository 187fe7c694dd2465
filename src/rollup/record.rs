//! Capture records, raw and aggregated.

use crate::utils::error::RollupError;
use serde::{Deserialize, Serialize};

/// One time-series point for a `(logical_id, key)` pair
///
/// At level 0 a record is a single capture. At coarser levels
/// `capture_time` is the end of the bucket and the counters are sums over
/// every finer record in that bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub logical_id: String,
    pub key: String,
    pub capture_time: u64,
    pub total_duration_nanos: u64,
    pub execution_count: u64,
    pub error_count: u64,
}

impl CaptureRecord {
    /// Record for a single capture
    pub fn raw(
        logical_id: impl Into<String>,
        key: impl Into<String>,
        capture_time: u64,
        duration_nanos: u64,
        is_error: bool,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            key: key.into(),
            capture_time,
            total_duration_nanos: duration_nanos,
            execution_count: 1,
            error_count: u64::from(is_error),
        }
    }

    /// Empty aggregate for the bucket ending at `bucket_end`
    pub fn empty_bucket(logical_id: &str, key: &str, bucket_end: u64) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            key: key.to_string(),
            capture_time: bucket_end,
            total_duration_nanos: 0,
            execution_count: 0,
            error_count: 0,
        }
    }

    /// Add the counters of `other` into this record
    ///
    /// # Errors
    /// * `RollupError::Overflow` - a counter would wrap; `self` is unchanged
    pub fn absorb(&mut self, other: &CaptureRecord) -> Result<(), RollupError> {
        let overflow = || RollupError::Overflow(self.capture_time);
        let total = self
            .total_duration_nanos
            .checked_add(other.total_duration_nanos)
            .ok_or_else(overflow)?;
        let executions = self
            .execution_count
            .checked_add(other.execution_count)
            .ok_or_else(overflow)?;
        let errors = self
            .error_count
            .checked_add(other.error_count)
            .ok_or_else(overflow)?;

        self.total_duration_nanos = total;
        self.execution_count = executions;
        self.error_count = errors;
        Ok(())
    }
}
