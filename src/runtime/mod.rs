//! Background scheduling and trace lifecycle.

pub mod manager;
pub mod scheduler;

pub use manager::{TraceManager, TraceSink};
pub use scheduler::{Scheduler, TaskHandle};
