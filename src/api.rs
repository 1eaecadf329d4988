//! Process-wide verbs.
//!
//! These free functions operate on the current fiber of the calling thread's
//! runtime. The suspension verbs (`snooze`, `suspend`, `sleep`,
//! `sleep_forever`, `receive`, `every`) are the crate's primitive suspension
//! points: each consumes the resume delivered by the scheduler, raising a
//! signal resume as an [`Error`] before producing any normal result, and
//! re-parks itself when a plain wake finds its condition unmet.
//!
//! All of them panic when called outside [`run`](crate::run).

use crate::error::{Error, Result};
use crate::fiber::Fiber;
use crate::runtime::record::Resume;
use crate::runtime::scheduler;
use crate::runtime::TimerHandle;
use crate::types::{payload, Outcome, Payload, Time};
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Spawns `body` as a child fiber of the current fiber and returns its
/// handle. The child is appended to the run-queue tail; the spawner keeps
/// running first.
#[track_caller]
pub fn spin<T, F>(body: F) -> Fiber
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    spin_inner(None, Location::caller(), body)
}

/// [`spin`] with a debugging tag.
#[track_caller]
pub fn spin_tagged<T, F>(tag: &str, body: F) -> Fiber
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    spin_inner(Some(tag.to_owned()), Location::caller(), body)
}

pub(crate) fn spin_inner<T, F>(
    tag: Option<String>,
    location: &'static Location<'static>,
    body: F,
) -> Fiber
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    let id = scheduler::spawn_fiber(tag, location, |_id| async move {
        let outcome = match body.await {
            Ok(value) => Outcome::Value(Some(payload(value))),
            // An uncaught MoveOn/Interrupt makes its payload the result;
            // everything else is a recorded failure.
            Err(error) => match error.root_value() {
                Some(value) => Outcome::Value(value),
                None => Outcome::Failure(error),
            },
        };
        scheduler::finalize_current(outcome);
    });
    Fiber::from_id(id)
}

/// The handle of the currently executing fiber.
#[must_use]
pub fn current() -> Fiber {
    Fiber::current()
}

/// Yields the current fiber to the tail of the run queue, guaranteeing every
/// other runnable fiber a turn before it resumes.
#[must_use = "futures do nothing unless awaited"]
pub fn snooze() -> Snooze {
    Snooze { queued: false }
}

/// Future returned by [`snooze`].
#[derive(Debug)]
pub struct Snooze {
    queued: bool,
}

impl Future for Snooze {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.queued {
            this.queued = true;
            scheduler::yield_current();
            return Poll::Pending;
        }
        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => Poll::Ready(Err(Error::from(signal))),
            _ => Poll::Ready(Ok(())),
        }
    }
}

/// Parks the current fiber without scheduling it.
///
/// A parked root fiber is resumed with `Ok(None)` once the loop runs out of
/// other work; any other fiber stays parked until something schedules it,
/// and resolves to the scheduled value.
#[must_use = "futures do nothing unless awaited"]
pub fn suspend() -> Suspend {
    Suspend {}
}

/// Future returned by [`suspend`].
#[derive(Debug)]
pub struct Suspend {}

impl Future for Suspend {
    type Output = Result<Option<Payload>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => Poll::Ready(Err(Error::from(signal))),
            Some(Resume::Value(value)) => Poll::Ready(Ok(value)),
            None => {
                scheduler::park_current(true);
                Poll::Pending
            }
        }
    }
}

/// Suspends the current fiber for `duration`.
///
/// Returns once the deadline has passed, or early when an explicit value is
/// scheduled at the fiber; signals delivered while sleeping unwind as
/// errors. The armed timer is released on every exit path.
#[must_use = "futures do nothing unless awaited"]
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        duration,
        deadline: None,
        timer: None,
    }
}

/// Future returned by [`sleep`].
#[derive(Debug)]
pub struct Sleep {
    duration: Duration,
    deadline: Option<Time>,
    timer: Option<TimerHandle>,
}

impl Future for Sleep {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => return Poll::Ready(Err(Error::from(signal))),
            Some(Resume::Value(Some(_))) => return Poll::Ready(Ok(())),
            _ => {}
        }

        let now = scheduler::now();
        match this.deadline {
            None => {
                let me = scheduler::current();
                let handle =
                    match scheduler::arm_timer(me, this.duration, None, Resume::wake()) {
                        Ok(handle) => handle,
                        Err(error) => return Poll::Ready(Err(error)),
                    };
                this.deadline = Some(now + this.duration);
                this.timer = Some(handle);
            }
            Some(deadline) => {
                if now >= deadline {
                    return Poll::Ready(Ok(()));
                }
                // Spurious wake before the deadline: re-arm if the timer
                // already fired, then go back to waiting.
                if !this.timer.as_ref().is_some_and(TimerHandle::is_live) {
                    let me = scheduler::current();
                    let remaining = deadline.duration_since(now);
                    match scheduler::arm_timer(me, remaining, None, Resume::wake()) {
                        Ok(handle) => this.timer = Some(handle),
                        Err(error) => return Poll::Ready(Err(error)),
                    }
                }
            }
        }
        scheduler::park_current(false);
        Poll::Pending
    }
}

/// Suspends the current fiber indefinitely, keeping the loop alive.
///
/// Holds a scheduler reference for as long as the future exists, so the
/// event loop does not exit while the fiber sleeps. Ends only through a
/// signal or an explicitly scheduled value.
#[must_use = "futures do nothing unless awaited"]
pub fn sleep_forever() -> SleepForever {
    SleepForever { reffed: false }
}

/// Future returned by [`sleep_forever`].
#[derive(Debug)]
pub struct SleepForever {
    reffed: bool,
}

impl Future for SleepForever {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => return Poll::Ready(Err(Error::from(signal))),
            Some(Resume::Value(Some(_))) => return Poll::Ready(Ok(())),
            _ => {}
        }
        if !this.reffed {
            this.reffed = true;
            scheduler::fiber_ref();
        }
        scheduler::park_current(false);
        Poll::Pending
    }
}

impl Drop for SleepForever {
    fn drop(&mut self) {
        if self.reffed {
            scheduler::fiber_unref();
        }
    }
}

/// Spawns a child fiber that runs `body` after `duration`.
#[track_caller]
pub fn after<T, F>(duration: Duration, body: F) -> Fiber
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    let location = Location::caller();
    spin_inner::<T, _>(None, location, async move {
        sleep(duration).await?;
        body.await
    })
}

/// Runs `f` every `period`, paced by a periodic timer against the calling
/// fiber. Runs until a signal unwinds it; the timer is released on exit.
pub async fn every<F, Fut>(period: Duration, mut f: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let me = scheduler::current();
    let _timer = scheduler::arm_timer(me, period, Some(period), Resume::wake())?;
    loop {
        TickWait { parked: false }.await?;
        f().await?;
    }
}

/// Parks until any wake arrives. Used by periodic verbs between ticks.
#[derive(Debug)]
struct TickWait {
    parked: bool,
}

impl Future for TickWait {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match scheduler::take_delivered() {
            Some(Resume::Signal(signal)) => Poll::Ready(Err(Error::from(signal))),
            Some(Resume::Value(_)) if this.parked => Poll::Ready(Ok(())),
            _ => {
                this.parked = true;
                scheduler::park_current(false);
                Poll::Pending
            }
        }
    }
}

/// Receives the next message from the current fiber's mailbox, suspending
/// until one arrives. Messages are delivered in send order.
#[must_use = "futures do nothing unless awaited"]
pub fn receive() -> Receive {
    Receive {}
}

/// Future returned by [`receive`].
#[derive(Debug)]
pub struct Receive {}

impl Future for Receive {
    type Output = Result<Payload>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(Resume::Signal(signal)) = scheduler::take_delivered() {
            return Poll::Ready(Err(Error::from(signal)));
        }
        match scheduler::pop_message() {
            Some(message) => Poll::Ready(Ok(message)),
            None => {
                scheduler::park_current(false);
                Poll::Pending
            }
        }
    }
}

/// Drains and returns every message currently queued in the current fiber's
/// mailbox, without suspending.
#[must_use]
pub fn receive_pending() -> Vec<Payload> {
    scheduler::drain_messages()
}
