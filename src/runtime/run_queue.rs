//! The scheduler's FIFO run queue.
//!
//! The queue holds fiber ids only; the pending resume payload lives in the
//! fiber record so re-scheduling can replace it under the signal-precedence
//! rule without touching the queue. A fiber appears at most once:
//! re-scheduling an already-queued fiber moves it to the tail (or the head
//! for prioritized wake-ups).
//!
//! The queue also tracks a high-watermark and a switch count used by the
//! anti-starvation rule: once the queue has been deep and many switches have
//! happened without it draining, the scheduler polls the backend
//! non-blocking so I/O completions are not starved by an always-busy queue.

use crate::types::FiberId;
use std::collections::{HashSet, VecDeque};

/// FIFO queue of fibers scheduled to resume.
#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    queue: VecDeque<FiberId>,
    members: HashSet<FiberId>,
    high_watermark: usize,
    switch_count: usize,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn contains(&self, fiber: FiberId) -> bool {
        self.members.contains(&fiber)
    }

    /// Appends `fiber` at the tail; if already queued it is moved there.
    pub(crate) fn push(&mut self, fiber: FiberId) {
        if !self.members.insert(fiber) {
            self.delete_from_queue(fiber);
        }
        self.queue.push_back(fiber);
        self.note_watermark();
    }

    /// Inserts `fiber` at the head (prioritized wake-up); if already queued
    /// it is moved there.
    pub(crate) fn unshift(&mut self, fiber: FiberId) {
        if !self.members.insert(fiber) {
            self.delete_from_queue(fiber);
        }
        self.queue.push_front(fiber);
        self.note_watermark();
    }

    /// Removes the head of the queue.
    pub(crate) fn shift(&mut self) -> Option<FiberId> {
        let fiber = self.queue.pop_front();
        match fiber {
            Some(f) => {
                self.members.remove(&f);
                self.switch_count += 1;
            }
            None => self.high_watermark = 0,
        }
        fiber
    }

    /// Unschedules `fiber` wherever it sits in the queue.
    pub(crate) fn delete(&mut self, fiber: FiberId) {
        if self.members.remove(&fiber) {
            self.delete_from_queue(fiber);
        }
    }

    /// Anti-starvation check: true once the queue has been deep
    /// (`watermark_threshold`) and `switch_threshold` switches have occurred
    /// since the last check. Resets the switch count when it fires.
    pub(crate) fn should_poll_backend_nonblocking(
        &mut self,
        watermark_threshold: usize,
        switch_threshold: usize,
    ) -> bool {
        if self.high_watermark < watermark_threshold {
            return false;
        }
        if self.switch_count < switch_threshold {
            return false;
        }
        self.switch_count = 0;
        true
    }

    fn delete_from_queue(&mut self, fiber: FiberId) {
        if let Some(pos) = self.queue.iter().position(|f| *f == fiber) {
            self.queue.remove(pos);
        }
    }

    fn note_watermark(&mut self) {
        if self.queue.len() > self.high_watermark {
            self.high_watermark = self.queue.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber(n: u32) -> FiberId {
        FiberId::new_for_test(n, 0)
    }

    #[test]
    fn fifo_order() {
        let mut q = RunQueue::new();
        q.push(fiber(1));
        q.push(fiber(2));
        q.push(fiber(3));

        assert_eq!(q.shift(), Some(fiber(1)));
        assert_eq!(q.shift(), Some(fiber(2)));
        assert_eq!(q.shift(), Some(fiber(3)));
        assert_eq!(q.shift(), None);
    }

    #[test]
    fn repush_moves_to_tail() {
        let mut q = RunQueue::new();
        q.push(fiber(1));
        q.push(fiber(2));
        q.push(fiber(1));

        assert_eq!(q.len(), 2);
        assert_eq!(q.shift(), Some(fiber(2)));
        assert_eq!(q.shift(), Some(fiber(1)));
    }

    #[test]
    fn unshift_takes_head() {
        let mut q = RunQueue::new();
        q.push(fiber(1));
        q.push(fiber(2));
        q.unshift(fiber(3));

        assert_eq!(q.shift(), Some(fiber(3)));
    }

    #[test]
    fn unshift_moves_queued_fiber_to_head() {
        let mut q = RunQueue::new();
        q.push(fiber(1));
        q.push(fiber(2));
        q.unshift(fiber(2));

        assert_eq!(q.shift(), Some(fiber(2)));
        assert_eq!(q.shift(), Some(fiber(1)));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn delete_unschedules() {
        let mut q = RunQueue::new();
        q.push(fiber(1));
        q.push(fiber(2));
        q.delete(fiber(1));

        assert!(!q.contains(fiber(1)));
        assert_eq!(q.shift(), Some(fiber(2)));
        assert_eq!(q.shift(), None);
    }

    #[test]
    fn starvation_check_needs_both_thresholds() {
        let mut q = RunQueue::new();
        for n in 0..4 {
            q.push(fiber(n));
        }
        // Watermark 4, but only two switches so far.
        q.shift();
        q.shift();
        assert!(!q.should_poll_backend_nonblocking(4, 3));

        q.shift();
        assert!(q.should_poll_backend_nonblocking(4, 3));
        // Switch count was reset by the successful check.
        assert!(!q.should_poll_backend_nonblocking(4, 3));
    }
}
