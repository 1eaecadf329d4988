//! Bridging `std::task::Waker` onto the run queue.
//!
//! Fibers built from this crate's primitives never touch wakers; the
//! scheduler wakes them directly. The waker exists so fiber bodies can await
//! foreign futures too: a wake becomes a plain run-queue push for the
//! owning fiber on its own thread, and is a no-op anywhere else.

use crate::types::FiberId;
use std::sync::Arc;
use std::task::{Wake, Waker};

use super::record::Resume;
use super::scheduler;

struct RunQueueWaker {
    fiber: FiberId,
}

impl Wake for RunQueueWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let fiber = self.fiber;
        let _ = scheduler::try_with(|state| state.schedule_resume(fiber, Resume::wake(), false));
    }
}

/// A waker that schedules `fiber` when woken on the scheduler's thread.
pub(crate) fn waker_for(fiber: FiberId) -> Waker {
    Waker::from(Arc::new(RunQueueWaker { fiber }))
}
