//! I/O integration: the reactor contract, stream contracts and endpoints.
//!
//! The runtime core owns no I/O. It consumes a [`Reactor`] (readiness and
//! wake-ups), defines the [`ReadSource`]/[`WriteSink`] stream contracts and
//! ships two endpoints: the in-process [`pipe`] and, for tests of the
//! reactor path, the deterministic [`SimReactor`].

mod pipe;
mod poll_reactor;
mod read;
mod reactor;
mod sim_reactor;

pub use pipe::{pipe, PipeReader, PipeWriter};
pub use poll_reactor::PollReactor;
pub use read::{Feed, LineReader, ReadSource, WaitReadable, WaitWritable, WriteSink};
pub use reactor::{Event, Events, Interest, Reactor, Source, Token};
pub use sim_reactor::SimReactor;

use crate::error::{Error, Result};
use crate::runtime::record::Resume;
use crate::runtime::scheduler;
use crate::tracing_compat::warn;
use crate::types::FiberId;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The reactor used when the configuration names none: the OS-backed one,
/// or the simulated one if the OS poller cannot be created.
pub(crate) fn default_reactor() -> Box<dyn Reactor> {
    match PollReactor::new() {
        Ok(reactor) => Box::new(reactor),
        Err(error) => {
            warn!(%error, "OS poller unavailable, using simulated reactor");
            let _ = error;
            Box::new(SimReactor::new())
        }
    }
}

/// Suspends the current fiber until the reactor delivers readiness for
/// `token` in the requested direction.
///
/// The caller is responsible for having registered its source with the
/// runtime's reactor under the same token and a matching interest. The wait
/// is a suspension point: signals delivered during it unwind as errors.
#[must_use = "futures do nothing unless awaited"]
pub fn wait_io(token: Token, writable: bool) -> IoWait {
    IoWait {
        token,
        writable,
        fiber: None,
    }
}

/// Suspends until `token` is readable.
#[must_use = "futures do nothing unless awaited"]
pub fn wait_readable(token: Token) -> IoWait {
    wait_io(token, false)
}

/// Suspends until `token` is writable.
#[must_use = "futures do nothing unless awaited"]
pub fn wait_writable(token: Token) -> IoWait {
    wait_io(token, true)
}

/// Future returned by [`wait_io`].
#[derive(Debug)]
pub struct IoWait {
    token: Token,
    writable: bool,
    /// Set once registered; used to drop the registration on cancellation.
    fiber: Option<FiberId>,
}

impl Future for IoWait {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => return Poll::Ready(Err(Error::from(signal))),
            Some(Resume::Value(_)) if this.fiber.is_some() => {
                this.fiber = None;
                return Poll::Ready(Ok(()));
            }
            _ => {}
        }
        if this.fiber.is_none() {
            scheduler::register_io_waiter(this.token, this.writable);
            this.fiber = Some(scheduler::current());
        }
        scheduler::park_current(false);
        Poll::Pending
    }
}

impl Drop for IoWait {
    fn drop(&mut self) {
        if let Some(fiber) = self.fiber {
            scheduler::cancel_io_waiter(self.token, fiber);
        }
    }
}
