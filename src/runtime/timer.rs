//! The timer service: a min-heap of armed wake-ups.
//!
//! Entries are keyed by absolute fire time with a sequence number breaking
//! ties deterministically. Cancellation is by timer id through a live set;
//! cancelled entries are discarded lazily when they surface at the heap top.
//! Periodic timers re-arm themselves on fire and keep their id.

use crate::types::{FiberId, Time};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use super::record::Resume;

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

struct TimerEntry {
    fire_at: Time,
    seq: u64,
    id: TimerId,
    target: FiberId,
    interval: Option<Duration>,
    resume: Resume,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap behaves as a min-heap on (fire_at, seq).
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap timer store with id-based cancellation.
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    live: HashSet<TimerId>,
    next_id: u64,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashSet::new(),
            next_id: 1,
            next_seq: 0,
        }
    }

    /// Arms a timer that schedules `target` with `resume` at `fire_at`;
    /// `interval` turns it periodic.
    pub(crate) fn arm(
        &mut self,
        fire_at: Time,
        interval: Option<Duration>,
        target: FiberId,
        resume: Resume,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.live.insert(id);
        self.push_entry(fire_at, id, target, interval, resume);
        id
    }

    /// Disarms a timer. Safe to call on an already-fired one-shot.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        self.live.remove(&id);
    }

    /// True while the timer is armed (one-shots die on fire).
    pub(crate) fn is_live(&self, id: TimerId) -> bool {
        self.live.contains(&id)
    }

    /// True when no armed timer remains.
    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// The earliest armed deadline, pruning cancelled entries on the way.
    pub(crate) fn next_deadline(&mut self) -> Option<Time> {
        while let Some(top) = self.heap.peek() {
            if self.live.contains(&top.id) {
                return Some(top.fire_at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops every timer due at `now`, feeding `(target, resume)` pairs to
    /// `sink` in deadline order. Periodic timers re-arm. Returns the number
    /// fired.
    pub(crate) fn fire_due(
        &mut self,
        now: Time,
        mut sink: impl FnMut(FiberId, Resume),
    ) -> usize {
        let mut fired = 0;
        while let Some(top) = self.heap.peek() {
            if !self.live.contains(&top.id) {
                self.heap.pop();
                continue;
            }
            if top.fire_at > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry present");
            sink(entry.target, entry.resume.clone());
            fired += 1;
            match entry.interval {
                Some(period) => {
                    let next = entry.fire_at + period;
                    self.push_entry(next, entry.id, entry.target, entry.interval, entry.resume);
                }
                None => {
                    self.live.remove(&entry.id);
                }
            }
        }
        fired
    }

    fn push_entry(
        &mut self,
        fire_at: Time,
        id: TimerId,
        target: FiberId,
        interval: Option<Duration>,
        resume: Resume,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            fire_at,
            seq,
            id,
            target,
            interval,
            resume,
        });
    }
}

impl std::fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHeap")
            .field("armed", &self.live.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber(n: u32) -> FiberId {
        FiberId::new_for_test(n, 0)
    }

    fn fired_targets(heap: &mut TimerHeap, now: Time) -> Vec<FiberId> {
        let mut out = Vec::new();
        heap.fire_due(now, |target, _| out.push(target));
        out
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut heap = TimerHeap::new();
        heap.arm(Time::from_millis(30), None, fiber(3), Resume::wake());
        heap.arm(Time::from_millis(10), None, fiber(1), Resume::wake());
        heap.arm(Time::from_millis(20), None, fiber(2), Resume::wake());

        let fired = fired_targets(&mut heap, Time::from_millis(25));
        assert_eq!(fired, vec![fiber(1), fiber(2)]);
        assert_eq!(heap.next_deadline(), Some(Time::from_millis(30)));
    }

    #[test]
    fn same_deadline_fires_in_arm_order() {
        let mut heap = TimerHeap::new();
        heap.arm(Time::from_millis(5), None, fiber(1), Resume::wake());
        heap.arm(Time::from_millis(5), None, fiber(2), Resume::wake());

        let fired = fired_targets(&mut heap, Time::from_millis(5));
        assert_eq!(fired, vec![fiber(1), fiber(2)]);
    }

    #[test]
    fn cancel_suppresses_fire() {
        let mut heap = TimerHeap::new();
        let id = heap.arm(Time::from_millis(5), None, fiber(1), Resume::wake());
        heap.cancel(id);

        assert!(!heap.is_live(id));
        assert!(fired_targets(&mut heap, Time::from_millis(10)).is_empty());
        assert!(heap.is_empty());
        assert_eq!(heap.next_deadline(), None);
    }

    #[test]
    fn one_shot_dies_on_fire() {
        let mut heap = TimerHeap::new();
        let id = heap.arm(Time::from_millis(5), None, fiber(1), Resume::wake());

        assert_eq!(fired_targets(&mut heap, Time::from_millis(5)).len(), 1);
        assert!(!heap.is_live(id));
    }

    #[test]
    fn periodic_rearms_with_same_id() {
        let mut heap = TimerHeap::new();
        let id = heap.arm(
            Time::from_millis(10),
            Some(Duration::from_millis(10)),
            fiber(1),
            Resume::wake(),
        );

        assert_eq!(fired_targets(&mut heap, Time::from_millis(10)).len(), 1);
        assert!(heap.is_live(id));
        assert_eq!(heap.next_deadline(), Some(Time::from_millis(20)));

        // A long catch-up window fires each missed period once per call.
        assert_eq!(fired_targets(&mut heap, Time::from_millis(40)).len(), 3);
        assert_eq!(heap.next_deadline(), Some(Time::from_millis(50)));

        heap.cancel(id);
        assert!(heap.is_empty());
    }
}
