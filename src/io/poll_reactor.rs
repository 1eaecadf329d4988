//! OS-backed reactor on the `polling` crate.
//!
//! `poll` and `wake` are fully functional: the scheduler's idle path blocks
//! in [`polling::Poller::wait`] until the earliest timer deadline, and
//! `wake` maps to the poller's built-in notify, which is what a cross-thread
//! wake-up layer would call.
//!
//! Source registration is bookkeeping-only: `Poller::add` is `unsafe`
//! (the poller cannot prove the descriptor outlives the registration) and
//! this crate forbids unsafe code. Deterministic readiness testing goes
//! through [`SimReactor`](super::SimReactor) instead, which is also where
//! the in-process pipe delivers its wake-ups.

use polling::{Events as PollEvents, Poller};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

use super::reactor::{Event, Events, Interest, Reactor, Source, Token};

#[derive(Debug)]
struct Registration {
    raw_fd: i32,
    interest: Interest,
}

/// Reactor shell over [`polling::Poller`].
pub struct PollReactor {
    poller: Poller,
    registrations: RefCell<HashMap<Token, Registration>>,
}

impl PollReactor {
    /// Creates the reactor (one poller instance).
    ///
    /// # Errors
    ///
    /// Fails when the OS poller cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            registrations: RefCell::new(HashMap::new()),
        })
    }
}

impl Reactor for PollReactor {
    fn register(&self, source: &dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        let mut registrations = self.registrations.borrow_mut();
        if registrations.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "token already registered",
            ));
        }
        registrations.insert(
            token,
            Registration {
                raw_fd: source.raw_fd(),
                interest,
            },
        );
        Ok(())
    }

    fn modify(&self, token: Token, interest: Interest) -> io::Result<()> {
        let mut registrations = self.registrations.borrow_mut();
        let registration = registrations
            .get_mut(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;
        registration.interest = interest;
        Ok(())
    }

    fn deregister(&self, token: Token) -> io::Result<()> {
        let mut registrations = self.registrations.borrow_mut();
        registrations
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let mut poll_events = PollEvents::new();
        self.poller.wait(&mut poll_events, timeout)?;

        let mut count = 0;
        for poll_event in poll_events.iter() {
            let mut interest = Interest::NONE;
            if poll_event.readable {
                interest = interest.add(Interest::READABLE);
            }
            if poll_event.writable {
                interest = interest.add(Interest::WRITABLE);
            }
            events.push(Event::new(Token::new(poll_event.key), interest));
            count += 1;
        }
        Ok(count)
    }

    fn wake(&self) -> io::Result<()> {
        self.poller.notify()
    }

    fn registration_count(&self) -> usize {
        self.registrations.borrow().len()
    }
}

impl std::fmt::Debug for PollReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollReactor")
            .field("registrations", &self.registrations.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn poll_times_out() {
        let reactor = PollReactor::new().expect("poller");
        let mut events = Events::with_capacity(8);

        let start = Instant::now();
        let count = reactor
            .poll(&mut events, Some(Duration::from_millis(30)))
            .expect("poll");
        assert_eq!(count, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn poll_zero_timeout_returns_immediately() {
        let reactor = PollReactor::new().expect("poller");
        let mut events = Events::with_capacity(8);

        let start = Instant::now();
        reactor.poll(&mut events, Some(Duration::ZERO)).expect("poll");
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[cfg(unix)]
    #[test]
    fn registration_bookkeeping() {
        let reactor = PollReactor::new().expect("poller");
        let (left, _right) = std::os::unix::net::UnixStream::pair().expect("socket pair");

        reactor
            .register(&left, Token::new(1), Interest::READABLE)
            .expect("register");
        assert_eq!(reactor.registration_count(), 1);

        let duplicate = reactor.register(&left, Token::new(1), Interest::WRITABLE);
        assert_eq!(
            duplicate.expect_err("duplicate").kind(),
            io::ErrorKind::AlreadyExists
        );

        reactor
            .modify(Token::new(1), Interest::both())
            .expect("modify");
        reactor.deregister(Token::new(1)).expect("deregister");
        assert_eq!(reactor.registration_count(), 0);

        let missing = reactor.deregister(Token::new(1));
        assert_eq!(missing.expect_err("missing").kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn wake_interrupts_poll() {
        let reactor = PollReactor::new().expect("poller");
        reactor.wake().expect("wake");

        // The queued notification makes the next poll return promptly even
        // with a long timeout.
        let mut events = Events::with_capacity(8);
        let start = Instant::now();
        reactor
            .poll(&mut events, Some(Duration::from_secs(5)))
            .expect("poll");
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
