//! Per-fiber bookkeeping records.
//!
//! Records live in the scheduler's fiber table for the whole runtime
//! lifetime (results stay readable post-mortem) and hold everything the
//! scheduler needs to resume, signal, message and reap a fiber. The stored
//! body future is kept here too, taken out for the duration of each poll so
//! fiber code can re-enter the scheduler state freely.

use crate::types::{FiberId, Outcome, Payload, Signal};
use core::fmt;
use std::collections::VecDeque;
use std::panic::Location;

use super::stored::StoredFiber;

/// The lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// Scheduled to run (or currently running).
    Runnable,
    /// Suspended at a suspension point, waiting for a wake-up.
    Waiting,
    /// Finished; the record's outcome is final.
    Dead,
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runnable => write!(f, "runnable"),
            Self::Waiting => write!(f, "waiting"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// What a fiber is resumed with.
///
/// `Value(Some(_))` is an explicitly scheduled value: a blocked primitive
/// completes early with it. `Value(None)` is a runtime wake (timer fire,
/// mailbox push, join completion, readiness); primitives re-check their
/// condition and re-park when it does not hold. `Signal` is raised at the
/// suspension point before any normal result.
#[derive(Clone)]
pub(crate) enum Resume {
    Value(Option<Payload>),
    Signal(Signal),
}

impl Resume {
    /// A plain runtime wake.
    pub(crate) const fn wake() -> Self {
        Self::Value(None)
    }

    /// Merges a newly scheduled resume into a pending one.
    ///
    /// Values replace values; signals are sticky over values; between two
    /// signals the precedence lattice decides, with the incumbent winning
    /// ties.
    pub(crate) fn merge(pending: Option<Self>, incoming: Self) -> Self {
        match (pending, incoming) {
            (None | Some(Self::Value(_)), incoming) => incoming,
            (Some(Self::Signal(held)), Self::Value(_)) => Self::Signal(held),
            (Some(Self::Signal(held)), Self::Signal(new)) => Self::Signal(held.strengthen(new)),
        }
    }

    pub(crate) const fn is_terminate(&self) -> bool {
        matches!(self, Self::Signal(Signal::Terminate))
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(None) => write!(f, "Wake"),
            Self::Value(Some(_)) => write!(f, "Value(..)"),
            Self::Signal(s) => write!(f, "Signal({s:?})"),
        }
    }
}

/// One fiber's record in the scheduler table.
pub(crate) struct FiberRecord {
    pub(crate) id: FiberId,
    pub(crate) state: FiberState,
    pub(crate) tag: Option<String>,
    /// Source position of the spawn call.
    pub(crate) location: &'static Location<'static>,
    /// Spawn sites from this fiber up through its ancestors.
    pub(crate) caller_chain: Vec<&'static Location<'static>>,
    pub(crate) parent: Option<FiberId>,
    /// Live children, in spawn order.
    pub(crate) children: Vec<FiberId>,
    pub(crate) mailbox: VecDeque<Payload>,
    /// Pending resume for the fiber's run-queue entry.
    pub(crate) scheduled: Option<Resume>,
    /// Resume moved here by the scheduler just before polling; consumed by
    /// the suspension primitive that observes it.
    pub(crate) delivered: Option<Resume>,
    pub(crate) result: Option<Outcome>,
    /// Fibers waiting for this fiber's death.
    pub(crate) waiters: Vec<FiberId>,
    /// Monotonic death order stamp, set on finalize.
    pub(crate) death_seq: Option<u64>,
    /// The type-erased body; absent for the root fiber and while polling.
    pub(crate) stored: Option<StoredFiber>,
}

impl FiberRecord {
    pub(crate) fn new(
        id: FiberId,
        tag: Option<String>,
        location: &'static Location<'static>,
        parent: Option<FiberId>,
        parent_chain: &[&'static Location<'static>],
    ) -> Self {
        let mut caller_chain = Vec::with_capacity(parent_chain.len() + 1);
        caller_chain.push(location);
        caller_chain.extend_from_slice(parent_chain);

        Self {
            id,
            state: FiberState::Runnable,
            tag,
            location,
            caller_chain,
            parent,
            children: Vec::new(),
            mailbox: VecDeque::new(),
            scheduled: None,
            delivered: None,
            result: None,
            waiters: Vec::new(),
            death_seq: None,
            stored: None,
        }
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.state == FiberState::Dead
    }

    /// Folds `resume` into the pending slot under the merge rule.
    pub(crate) fn absorb_resume(&mut self, resume: Resume) {
        self.scheduled = Some(Resume::merge(self.scheduled.take(), resume));
    }

    pub(crate) fn detach_child(&mut self, child: FiberId) {
        self.children.retain(|c| *c != child);
    }
}

impl fmt::Debug for FiberRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("tag", &self.tag)
            .field("children", &self.children.len())
            .field("mailbox", &self.mailbox.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::payload;

    fn value_resume() -> Resume {
        Resume::Value(Some(payload(1_i32)))
    }

    #[test]
    fn merge_value_over_value() {
        let merged = Resume::merge(Some(Resume::wake()), value_resume());
        assert!(matches!(merged, Resume::Value(Some(_))));
    }

    #[test]
    fn merge_signal_sticky_over_value() {
        let cancel = Resume::Signal(Signal::Cancel { scope: None });
        let merged = Resume::merge(Some(cancel), value_resume());
        assert!(matches!(merged, Resume::Signal(Signal::Cancel { .. })));
    }

    #[test]
    fn merge_signals_by_precedence() {
        let move_on = Resume::Signal(Signal::MoveOn {
            scope: None,
            value: None,
        });
        let merged = Resume::merge(Some(move_on), Resume::Signal(Signal::Terminate));
        assert!(merged.is_terminate());

        let terminate = Resume::Signal(Signal::Terminate);
        let merged = Resume::merge(
            Some(terminate),
            Resume::Signal(Signal::Interrupt { value: None }),
        );
        assert!(merged.is_terminate());
    }

    #[test]
    fn caller_chain_extends_parent() {
        let loc = Location::caller();
        let parent_chain = vec![loc];
        let record = FiberRecord::new(
            FiberId::new_for_test(1, 0),
            None,
            loc,
            Some(FiberId::new_for_test(0, 0)),
            &parent_chain,
        );
        assert_eq!(record.caller_chain.len(), 2);
        assert_eq!(record.state, FiberState::Runnable);
    }
}
