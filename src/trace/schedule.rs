//! Per-trace slots for scheduled background activities.
//!
//! Each slot moves `Unscheduled -> Scheduled -> Canceled`. Setting a slot that
//! is already scheduled is misuse: it is logged, the previous task is canceled
//! and replaced, and the trace carries on. A task handed to a canceled slot is
//! canceled on the spot.

use log::warn;
use parking_lot::Mutex;

/// Anything that can stop a scheduled task from running again
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    Unscheduled,
    Scheduled,
    Canceled,
}

enum SlotState {
    Unscheduled,
    Scheduled(Box<dyn Cancellable>),
    Canceled,
}

pub struct ScheduleSlot {
    kind: &'static str,
    state: Mutex<SlotState>,
}

impl ScheduleSlot {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: Mutex::new(SlotState::Unscheduled),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Store the handle of a newly scheduled task
    pub fn set(&self, task: Box<dyn Cancellable>) {
        let mut state = self.state.lock();
        match &*state {
            SlotState::Unscheduled => *state = SlotState::Scheduled(task),
            SlotState::Scheduled(previous) => {
                warn!("{} task was already scheduled, replacing it", self.kind);
                previous.cancel();
                *state = SlotState::Scheduled(task);
            }
            SlotState::Canceled => {
                warn!("{} task scheduled after cancellation, canceling it", self.kind);
                task.cancel();
            }
        }
    }

    /// Cancel the stored task, if any; idempotent
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if let SlotState::Scheduled(task) = &*state {
            task.cancel();
        }
        *state = SlotState::Canceled;
    }

    pub fn status(&self) -> ScheduleStatus {
        match &*self.state.lock() {
            SlotState::Unscheduled => ScheduleStatus::Unscheduled,
            SlotState::Scheduled(_) => ScheduleStatus::Scheduled,
            SlotState::Canceled => ScheduleStatus::Canceled,
        }
    }
}

impl std::fmt::Debug for ScheduleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleSlot")
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTask(Arc<AtomicUsize>);

    impl Cancellable for CountingTask {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lifecycle() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let slot = ScheduleSlot::new("stuck");
        assert_eq!(slot.status(), ScheduleStatus::Unscheduled);

        slot.set(Box::new(CountingTask(cancels.clone())));
        assert_eq!(slot.status(), ScheduleStatus::Scheduled);

        slot.cancel();
        slot.cancel();
        assert_eq!(slot.status(), ScheduleStatus::Canceled);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_set_replaces_and_cancels_previous() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let slot = ScheduleSlot::new("coarse profiling");

        slot.set(Box::new(CountingTask(first.clone())));
        slot.set(Box::new(CountingTask(second.clone())));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(slot.status(), ScheduleStatus::Scheduled);

        slot.cancel();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_after_cancel_cancels_incoming() {
        let late = Arc::new(AtomicUsize::new(0));
        let slot = ScheduleSlot::new("fine profiling");
        slot.cancel();
        slot.set(Box::new(CountingTask(late.clone())));
        assert_eq!(late.load(Ordering::SeqCst), 1);
        assert_eq!(slot.status(), ScheduleStatus::Canceled);
    }
}
