//! Deterministic reactor with injected readiness, in virtual time.
//!
//! Instead of waiting on the OS, the sim reactor delivers events that tests
//! (or in-process endpoints) injected at chosen virtual times. `poll`
//! advances the shared virtual clock: to the next due event when one falls
//! inside the timeout window, otherwise to the window's end. Same injections
//! plus same poll sequence means same delivery, every run.

use crate::types::{ClockSource, Time};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use super::reactor::{Event, Events, Interest, Reactor, Source, Token};

struct TimedEvent {
    at: Time,
    seq: u64,
    event: Event,
}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimedEvent {}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap as a min-heap on (at, seq).
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SimInner {
    queue: BinaryHeap<TimedEvent>,
    registrations: HashMap<Token, Interest>,
    next_seq: u64,
    woken: bool,
}

/// A deterministic, injectable reactor.
///
/// Cloning yields another handle to the same reactor, so a test can keep an
/// injector handle while the scheduler owns the boxed original.
#[derive(Clone)]
pub struct SimReactor {
    inner: Rc<RefCell<SimInner>>,
    now: Rc<Cell<Time>>,
}

impl SimReactor {
    /// A sim reactor with its own virtual clock.
    #[must_use]
    pub fn new() -> Self {
        Self::from_cell(Rc::new(Cell::new(Time::ZERO)))
    }

    /// A sim reactor sharing the given clock source's virtual time cell
    /// (falls back to an independent clock for a wall source).
    #[must_use]
    pub fn with_clock(clock: &ClockSource) -> Self {
        match clock {
            ClockSource::Virtual { now } => Self::from_cell(now.clone()),
            ClockSource::Wall { .. } => Self::new(),
        }
    }

    fn from_cell(now: Rc<Cell<Time>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimInner {
                queue: BinaryHeap::new(),
                registrations: HashMap::new(),
                next_seq: 0,
                woken: false,
            })),
            now,
        }
    }

    /// The reactor's current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.now.get()
    }

    /// Injects `event` for delivery `delay` from now.
    pub fn inject_after(&self, event: Event, delay: Duration) {
        self.inject_at(event, self.now.get() + delay);
    }

    /// Injects `event` for delivery at absolute virtual time `at`.
    pub fn inject_at(&self, event: Event, at: Time) {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(TimedEvent { at, seq, event });
    }
}

impl Default for SimReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor for SimReactor {
    fn register(&self, _source: &dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.registrations.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "token already registered",
            ));
        }
        inner.registrations.insert(token, interest);
        Ok(())
    }

    fn modify(&self, token: Token, interest: Interest) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        match inner.registrations.get_mut(&token) {
            Some(slot) => {
                *slot = interest;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "token not registered",
            )),
        }
    }

    fn deregister(&self, token: Token) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner
            .registrations
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if std::mem::take(&mut inner.woken) {
            return Ok(0);
        }

        let now = self.now.get();
        let horizon = timeout.map(|t| now + t);

        let due_at = inner.queue.peek().map(|e| e.at);
        let Some(due_at) = due_at.filter(|at| horizon.is_none_or(|h| *at <= h)) else {
            // Nothing due inside the window: logically wait it out.
            if let Some(h) = horizon {
                self.now.set(self.now.get().max(h));
            }
            return Ok(0);
        };

        // Advance to the due batch and deliver everything at that instant.
        if due_at > now {
            self.now.set(due_at);
        }
        let mut count = 0;
        while inner.queue.peek().is_some_and(|e| e.at <= due_at) {
            let timed = inner.queue.pop().expect("peeked event present");
            events.push(timed.event);
            count += 1;
        }
        Ok(count)
    }

    fn wake(&self) -> io::Result<()> {
        self.inner.borrow_mut().woken = true;
        Ok(())
    }

    fn registration_count(&self) -> usize {
        self.inner.borrow().registrations.len()
    }

    fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }
}

impl std::fmt::Debug for SimReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SimReactor")
            .field("now", &self.now.get())
            .field("pending", &inner.queue.len())
            .field("registrations", &inner.registrations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_due_events_and_advances_clock() {
        let reactor = SimReactor::new();
        let token = Token::new(1);
        reactor.inject_after(Event::readable(token), Duration::from_millis(10));

        let mut events = Events::with_capacity(4);
        let count = reactor
            .poll(&mut events, Some(Duration::from_millis(50)))
            .expect("poll");
        assert_eq!(count, 1);
        assert_eq!(reactor.now(), Time::from_millis(10));
        assert_eq!(events.iter().next().map(Event::token), Some(token));
    }

    #[test]
    fn event_beyond_window_waits_it_out() {
        let reactor = SimReactor::new();
        reactor.inject_after(Event::readable(Token::new(1)), Duration::from_millis(100));

        let mut events = Events::with_capacity(4);
        let count = reactor
            .poll(&mut events, Some(Duration::from_millis(20)))
            .expect("poll");
        assert_eq!(count, 0);
        assert_eq!(reactor.now(), Time::from_millis(20));
        assert_eq!(reactor.pending(), 1);
    }

    #[test]
    fn same_instant_events_deliver_in_injection_order() {
        let reactor = SimReactor::new();
        reactor.inject_at(Event::readable(Token::new(1)), Time::from_millis(5));
        reactor.inject_at(Event::readable(Token::new(2)), Time::from_millis(5));

        let mut events = Events::with_capacity(4);
        reactor.poll(&mut events, None).expect("poll");
        let keys: Vec<usize> = events.iter().map(|e| e.token().key()).collect();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn wake_makes_next_poll_return_empty() {
        let reactor = SimReactor::new();
        reactor.inject_after(Event::readable(Token::new(1)), Duration::from_millis(5));
        reactor.wake().expect("wake");

        let mut events = Events::with_capacity(4);
        let count = reactor
            .poll(&mut events, Some(Duration::from_millis(50)))
            .expect("poll");
        assert_eq!(count, 0);
        // The injected event is still pending for the next poll.
        assert_eq!(reactor.pending(), 1);
    }

    #[test]
    fn clone_shares_state() {
        let reactor = SimReactor::new();
        let injector = reactor.clone();
        injector.inject_after(Event::writable(Token::new(9)), Duration::ZERO);

        let mut events = Events::with_capacity(4);
        let count = reactor.poll(&mut events, Some(Duration::ZERO)).expect("poll");
        assert_eq!(count, 1);
    }
}
