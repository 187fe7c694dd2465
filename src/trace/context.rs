//! Execution context of the thread that owns a trace.
//!
//! Each thread has exactly one context, held strongly by a thread-local only.
//! Traces keep a `Weak` to it, so the scheduler can find the owning thread for
//! stack sampling without ever keeping that thread's state alive.

use std::sync::Arc;
use std::thread::{self, ThreadId};

#[derive(Debug)]
pub struct ExecutionContext {
    thread_id: ThreadId,
    thread_name: Option<String>,
}

thread_local! {
    static CURRENT: Arc<ExecutionContext> = Arc::new(ExecutionContext::for_current_thread());
}

impl ExecutionContext {
    fn for_current_thread() -> Self {
        let current = thread::current();
        Self {
            thread_id: current.id(),
            thread_name: current.name().map(str::to_string),
        }
    }

    /// Context of the calling thread
    pub fn current() -> Arc<ExecutionContext> {
        CURRENT.with(Arc::clone)
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }
}
