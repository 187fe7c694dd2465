//! Timer runtime for delayed and repeating background tasks.
//!
//! The scheduler owns a small dedicated Tokio runtime, so callers stay
//! synchronous. Tasks run on its worker thread and must be short: stack
//! sampling and stuck checks qualify. A panicking task is logged and dropped;
//! other tasks keep running.

use crate::trace::Cancellable;
use log::{debug, error};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Handle to a scheduled task
#[derive(Debug)]
pub struct TaskHandle {
    task: JoinHandle<()>,
    canceled: AtomicBool,
}

impl TaskHandle {
    /// Stop future runs; a run already in progress finishes
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        self.task.abort();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Whether the task will never run again, canceled or done
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Cancellable for TaskHandle {
    fn cancel(&self) {
        TaskHandle::cancel(self);
    }
}

// `interval_at` rejects a zero period
const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct Scheduler {
    runtime: Option<Runtime>,
    handle: Handle,
    live_tasks: Arc<AtomicUsize>,
}

impl Scheduler {
    /// Build the timer runtime with one worker thread named `name`
    ///
    /// # Errors
    /// Returns the OS error if the runtime cannot be built
    pub fn new(name: &str) -> io::Result<Self> {
        let thread_name = name.to_string();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .thread_name_fn(move || thread_name.clone())
            .build()?;

        debug!("Started scheduler runtime '{}'", name);

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            live_tasks: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Run `job` once after `delay`
    pub fn schedule_once<F>(&self, delay: Duration, job: F) -> TaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.spawn(async move {
            sleep(delay).await;
            run_job(&job);
        })
    }

    /// Run `job` after `initial_delay`, then every `period`
    ///
    /// Runs missed while a previous run was late are skipped, not replayed.
    pub fn schedule_repeating<F>(&self, initial_delay: Duration, period: Duration, job: F) -> TaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let period = period.max(MIN_PERIOD);
        self.spawn(async move {
            let mut ticks = interval_at(Instant::now() + initial_delay, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if !run_job(&job) {
                    return;
                }
            }
        })
    }

    /// Number of tasks that have not finished or been canceled yet
    pub fn pending(&self) -> usize {
        self.live_tasks.load(Ordering::Acquire)
    }

    fn spawn<T>(&self, task: T) -> TaskHandle
    where
        T: std::future::Future<Output = ()> + Send + 'static,
    {
        let live = LiveTask::new(&self.live_tasks);
        let task = self.handle.spawn(async move {
            let _live = live;
            task.await;
        });
        TaskHandle {
            task,
            canceled: AtomicBool::new(false),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Counts a spawned task as live until its future is dropped
struct LiveTask(Arc<AtomicUsize>);

impl LiveTask {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run `job`, returning false if it panicked
fn run_job<F: Fn()>(job: &F) -> bool {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("scheduled task panicked, it will not run again");
        return false;
    }
    true
}
