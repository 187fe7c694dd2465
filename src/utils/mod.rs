//! Utility modules for configuration, error handling, and time sources.

pub mod clock;
pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, ManualTicker, SystemClock, SystemTicker, Ticker};
pub use config::{Config, RollupLevel};
pub use error::{ConfigError, FlamegraphError, OutputError, RollupError, StoreError};
