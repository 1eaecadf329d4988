//! The public fiber handle.
//!
//! A [`Fiber`] is a cheap, copyable reference to a fiber record owned by the
//! current thread's scheduler. Handles stay valid after the fiber dies; the
//! recorded [`Outcome`] remains readable post-mortem. Two handles are equal
//! exactly when they name the same fiber.

use crate::error::{Error, Result};
use crate::runtime::record::Resume;
use crate::runtime::scheduler;
use crate::runtime::FiberState;
use crate::types::{payload, FiberId, Outcome, Payload, Signal};
use core::fmt;
use std::future::Future;
use std::ops::Shl;
use std::panic::Location;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A handle to a fiber.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fiber {
    id: FiberId,
}

impl Fiber {
    pub(crate) const fn from_id(id: FiberId) -> Self {
        Self { id }
    }

    /// The handle of the currently executing fiber.
    ///
    /// # Panics
    ///
    /// Panics outside a runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::from_id(scheduler::current())
    }

    /// The fiber's id.
    #[must_use]
    pub const fn id(&self) -> FiberId {
        self.id
    }

    /// The fiber's lifecycle state.
    #[must_use]
    pub fn state(&self) -> FiberState {
        scheduler::state_of(self.id)
    }

    /// True while the fiber has not died.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() != FiberState::Dead
    }

    /// The tag given at spawn time, if any.
    #[must_use]
    pub fn tag(&self) -> Option<String> {
        scheduler::tag_of(self.id)
    }

    /// The source position of the spawn call.
    #[must_use]
    pub fn location(&self) -> Option<&'static Location<'static>> {
        scheduler::location_of(self.id)
    }

    /// The fiber's parent, if it has one (the root fiber has none).
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        scheduler::parent_of(self.id).map(Self::from_id)
    }

    /// The fiber's live children, in spawn order.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        scheduler::children_of(self.id)
            .into_iter()
            .map(Self::from_id)
            .collect()
    }

    /// The recorded outcome, once the fiber is dead.
    #[must_use]
    pub fn result(&self) -> Option<Outcome> {
        scheduler::result_of(self.id)
    }

    /// Schedules the fiber with an optional value.
    ///
    /// The value completes the fiber's blocking primitive early; a plain
    /// wake (`None`) makes it re-check its condition. A pending signal is
    /// never displaced by a value.
    pub fn schedule(&self, value: Option<Payload>) {
        scheduler::schedule(self.id, Resume::Value(value), false);
    }

    /// [`schedule`](Self::schedule) with a concrete value.
    pub fn schedule_value<T: 'static>(&self, value: T) {
        self.schedule(Some(payload(value)));
    }

    /// Delivers an `Interrupt` signal: the fiber unwinds at its next
    /// suspension point; uncaught, `value` becomes its result.
    pub fn interrupt(&self, value: Option<Payload>) {
        scheduler::schedule(
            self.id,
            Resume::Signal(Signal::Interrupt { value }),
            true,
        );
    }

    /// Delivers a `MoveOn` signal: the fiber unwinds silently to its root
    /// and records `value` as its result.
    pub fn stop(&self, value: Option<Payload>) {
        scheduler::schedule(
            self.id,
            Resume::Signal(Signal::MoveOn { scope: None, value }),
            true,
        );
    }

    /// Delivers a `Terminate`: the fiber's body is dropped without another
    /// poll, so only destructors run; its children are terminated too.
    pub fn terminate(&self) {
        scheduler::schedule(self.id, Resume::Signal(Signal::Terminate), true);
    }

    /// Appends a message to the fiber's mailbox, waking it if it is blocked
    /// in `receive`. Never suspends. Messages to dead fibers are dropped.
    pub fn send<M: 'static>(&self, message: M) {
        self.send_payload(payload(message));
    }

    /// [`send`](Self::send) with an already-erased payload.
    pub fn send_payload(&self, message: Payload) {
        scheduler::deliver_message(self.id, message);
    }

    /// Suspends the caller until this fiber is dead, then returns its result
    /// or re-raises its failure with the composed spawn trace appended.
    #[must_use]
    pub fn join(&self) -> Join {
        Join {
            target: self.id,
            registered: false,
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.id)
    }
}

impl fmt::Display for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// `fiber << message` sends to the fiber's mailbox.
impl<M: 'static> Shl<M> for &Fiber {
    type Output = ();

    fn shl(self, message: M) {
        self.send(message);
    }
}

/// Future returned by [`Fiber::join`].
#[derive(Debug)]
pub struct Join {
    target: FiberId,
    registered: bool,
}

impl Future for Join {
    type Output = Result<Option<Payload>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(Resume::Signal(signal)) = scheduler::take_delivered() {
            return Poll::Ready(Err(Error::from(signal)));
        }

        if let Some(outcome) = scheduler::result_of(this.target) {
            return Poll::Ready(match outcome {
                Outcome::Value(value) => Ok(value),
                Outcome::Failure(mut error) => {
                    error.push_spawn_chain(&scheduler::caller_chain_of(this.target));
                    Err(error)
                }
            });
        }

        let me = scheduler::current();
        if !this.registered {
            scheduler::register_waiter(this.target, me);
            this.registered = true;
        }
        scheduler::park_current(false);
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_id() {
        let a = Fiber::from_id(FiberId::new_for_test(1, 0));
        let b = Fiber::from_id(FiberId::new_for_test(1, 0));
        let c = Fiber::from_id(FiberId::new_for_test(2, 0));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_shows_slot() {
        let f = Fiber::from_id(FiberId::new_for_test(7, 1));
        assert_eq!(f.to_string(), "F7");
    }
}
