//! Error types for the entire crate.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use thiserror::Error;

/// Errors reported by a time-series store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Time-series store unavailable: {0}")]
    Unavailable(String),

    #[error("Rollup level {0} does not exist in the store")]
    UnknownLevel(usize),
}

impl StoreError {
    /// Whether the failed operation can simply be retried later
    ///
    /// **Public** - callers of rollup/store/read use this to schedule retries
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Errors that can occur while storing, rolling up or reading records
#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Rollup level {0} is not configured")]
    UnknownLevel(usize),

    #[error("Arithmetic overflow while aggregating bucket ending at {0}")]
    Overflow(u64),

    #[error("Capture at {capture_time} falls in a bucket whose level {level} data has already expired")]
    Expired { capture_time: u64, level: usize },
}

impl RollupError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RollupError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur during flamegraph generation
#[derive(Error, Debug)]
pub enum FlamegraphError {
    #[error("Empty stack data")]
    EmptyStacks,
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Refusing to write {0}: content is not an SVG document")]
    NotSvg(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let unavailable = StoreError::Unavailable("connection refused".to_string());
        assert!(unavailable.is_retryable());
        assert!(RollupError::from(unavailable).is_retryable());

        assert!(!StoreError::UnknownLevel(9).is_retryable());
        assert!(!RollupError::UnknownLevel(9).is_retryable());
        assert!(!RollupError::Overflow(300_000).is_retryable());
        assert!(!RollupError::Expired {
            capture_time: 1,
            level: 0
        }
        .is_retryable());
    }
}
