//! Stack sample source contract.
//!
//! The capture engine cannot walk another thread's stack by itself; a platform
//! integration implements `StackSampleSource` and the trace asks it for one
//! sample of the owning thread whenever the scheduler fires.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread::ThreadId;

/// One frame of a sampled call chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} ({}:{})", self.function, file, line),
            (Some(file), None) => write!(f, "{} ({})", self.function, file),
            _ => f.write_str(&self.function),
        }
    }
}

/// Run state of a sampled thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

/// A single stack sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSample {
    /// Outermost frame first
    pub frames: Vec<StackFrame>,
    pub state: RunState,
}

impl ThreadSample {
    pub fn new(frames: Vec<StackFrame>, state: RunState) -> Self {
        Self { frames, state }
    }
}

/// Source of stack samples for live threads
///
/// Returning `None` means the thread could not be found or introspected.
/// Implementations must not block the sampled thread for long.
pub trait StackSampleSource: Send + Sync {
    fn sample(&self, thread: ThreadId) -> Option<ThreadSample>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_display() {
        assert_eq!(StackFrame::new("run").to_string(), "run");
        assert_eq!(
            StackFrame::new("handle").with_location("server.rs", 42).to_string(),
            "handle (server.rs:42)"
        );
    }
}
