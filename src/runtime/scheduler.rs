//! The per-thread scheduler: fiber table, event loop and entry point.
//!
//! Exactly one scheduler exists per OS thread that runs a Polyphony
//! runtime; it is installed by [`run_config`] and torn down when the root
//! body returns. The loop alternates between draining the run queue and
//! waiting on the reactor until the earliest timer fires, translating
//! wake-ups into run-queue pushes.
//!
//! Suspension works by delivery, not by callbacks: the scheduler moves the
//! fiber's pending resume into its `delivered` slot just before polling, and
//! whichever primitive future is live inside the fiber consumes it, raising
//! a signal resume as an error before producing any normal result.
//!
//! A `Terminate` resume is never delivered: the scheduler drops the stored
//! body instead of polling it, so only destructors run. Termination cascades
//! through descendants post-order, which keeps the invariant that a child
//! never observes a dead parent.

use crate::error::{Error, ErrorKind, Result};
use crate::io::{Events, Reactor, SimReactor, Token};
use crate::tracing_compat::{debug, trace};
use crate::types::{ClockSource, FiberId, Outcome, Payload, ScopeId, Signal, Time};
use crate::util::SlotArena;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::pin::pin;
use std::task::{Context, Poll};
use std::time::Duration;

use super::config::RuntimeConfig;
use super::record::{FiberRecord, FiberState, Resume};
use super::run_queue::RunQueue;
use super::stored::StoredFiber;
use super::timer::{TimerHeap, TimerId};
use super::waker::waker_for;

thread_local! {
    static SCHEDULER: RefCell<Option<SchedulerState>> = const { RefCell::new(None) };
}

/// What the loop should do next.
enum Turn {
    /// Resume this fiber (its resume is already in the delivered slot).
    Run(FiberId),
    /// Drop this fiber's body and finalize it as terminated.
    Terminate(FiberId),
    /// Wait on the reactor; `None` waits indefinitely.
    Wait(Option<Duration>),
    /// Nothing can ever run again.
    Starved,
}

pub(crate) struct SchedulerState {
    pub(crate) fibers: SlotArena<FiberRecord>,
    run_queue: RunQueue,
    timers: TimerHeap,
    reactor: Box<dyn Reactor>,
    clock: ClockSource,
    max_timer: Duration,
    starve_watermark: usize,
    starve_switches: usize,
    current: FiberId,
    root: FiberId,
    /// Set while the root sits in `suspend()`, waiting for the loop to idle.
    root_parked: bool,
    /// Keeps the loop alive while positive (`sleep_forever` holders).
    refs: usize,
    next_scope: u64,
    next_death_seq: u64,
    /// Fibers parked in `wait_io`, by reactor token, with the direction
    /// they wait for (true = writable).
    io_waiters: HashMap<Token, (FiberId, bool)>,
}

impl SchedulerState {
    fn new(config: RuntimeConfig, root: FiberId) -> Self {
        let RuntimeConfig {
            clock,
            reactor,
            max_timer,
            starve_watermark,
            starve_switches,
        } = config;
        let reactor = reactor.unwrap_or_else(|| {
            if clock.is_virtual() {
                Box::new(SimReactor::with_clock(&clock))
            } else {
                crate::io::default_reactor()
            }
        });
        Self {
            fibers: SlotArena::new(),
            run_queue: RunQueue::new(),
            timers: TimerHeap::new(),
            reactor,
            clock,
            max_timer,
            starve_watermark,
            starve_switches,
            current: root,
            root,
            root_parked: false,
            refs: 0,
            next_scope: 1,
            next_death_seq: 1,
            io_waiters: HashMap::new(),
        }
    }

    pub(crate) fn now(&self) -> Time {
        self.clock.now()
    }

    /// Schedules `fiber` with `resume`, folding it into any pending resume.
    ///
    /// Re-scheduling moves the fiber to the queue tail (or head when
    /// `prioritize` is set, the path used for explicit signals). Dead fibers
    /// are never scheduled.
    pub(crate) fn schedule_resume(&mut self, fiber: FiberId, resume: Resume, prioritize: bool) {
        let Some(record) = self.fibers.get_mut(fiber.index()) else {
            return;
        };
        if record.is_dead() {
            return;
        }
        trace!(fiber = %fiber, resume = ?resume, prioritize, "schedule");
        record.absorb_resume(resume);
        record.state = FiberState::Runnable;
        if fiber == self.root {
            self.root_parked = false;
        }
        if prioritize {
            self.run_queue.unshift(fiber);
        } else {
            self.run_queue.push(fiber);
        }
    }

    /// Removes `fiber` from the run queue and clears its pending resume.
    fn unschedule(&mut self, fiber: FiberId) {
        self.run_queue.delete(fiber);
        if let Some(record) = self.fibers.get_mut(fiber.index()) {
            record.scheduled = None;
        }
    }

    fn next_turn(&mut self) -> Turn {
        loop {
            if !self.run_queue.is_empty()
                && !self.io_waiters.is_empty()
                && self
                    .run_queue
                    .should_poll_backend_nonblocking(self.starve_watermark, self.starve_switches)
            {
                // Event starvation guard: a run queue that never drains must
                // not keep readiness from being observed.
                self.poll_backend(Some(Duration::ZERO));
            }

            if let Some(fiber) = self.run_queue.shift() {
                let root = self.root;
                let Some(record) = self.fibers.get_mut(fiber.index()) else {
                    continue;
                };
                if record.is_dead() {
                    record.scheduled = None;
                    continue;
                }
                let resume = record.scheduled.take().unwrap_or(Resume::wake());
                if resume.is_terminate() && fiber != root {
                    return Turn::Terminate(fiber);
                }
                record.delivered = Some(resume);
                record.state = FiberState::Runnable;
                self.current = fiber;
                return Turn::Run(fiber);
            }

            let now = self.clock.now();
            let mut due = Vec::new();
            let fired = self.timers.fire_due(now, |target, resume| due.push((target, resume)));
            for (target, resume) in due {
                self.schedule_resume(target, resume, false);
            }
            if fired > 0 {
                continue;
            }

            let deadline = self.timers.next_deadline();
            if deadline.is_none() && self.io_waiters.is_empty() && self.refs == 0 {
                if self.root_parked {
                    self.root_parked = false;
                    self.schedule_resume(self.root, Resume::wake(), false);
                    continue;
                }
                if self.reactor.pending() == 0 {
                    return Turn::Starved;
                }
            }

            let timeout = deadline.map(|d| d.duration_since(now).max(Duration::from_nanos(1)));
            if timeout.is_none() && self.clock.is_virtual() && self.reactor.pending() == 0 {
                return Turn::Starved;
            }
            return Turn::Wait(timeout);
        }
    }

    /// Waits on the reactor, then turns readiness into run-queue pushes.
    fn poll_backend(&mut self, timeout: Option<Duration>) {
        let before = self.clock.now();
        let mut events = Events::with_capacity(16);
        if let Err(error) = self.reactor.poll(&mut events, timeout) {
            debug!(%error, "reactor poll failed");
            let _ = error;
        }
        let mut woken = Vec::new();
        for event in events.iter() {
            if let Some((fiber, writable)) = self.io_waiters.get(&event.token()) {
                let delivered = if *writable {
                    event.interest().is_writable()
                } else {
                    event.interest().is_readable()
                };
                if delivered {
                    woken.push((event.token(), *fiber));
                }
            }
        }
        for (token, fiber) in woken {
            self.io_waiters.remove(&token);
            self.schedule_resume(fiber, Resume::wake(), false);
        }
        if let Some(timeout) = timeout {
            // Under virtual time the wait is logical; make sure the clock
            // reaches the deadline even if the reactor stopped short.
            self.clock.advance_to(before + timeout);
        }
    }

    /// Collects the live descendants of `fiber`, deepest first.
    fn descendants_post_order(&self, fiber: FiberId) -> Vec<FiberId> {
        let mut order = Vec::new();
        let mut stack = vec![(fiber, false)];
        while let Some((id, visited)) = stack.pop() {
            if visited {
                if id != fiber {
                    order.push(id);
                }
                continue;
            }
            stack.push((id, true));
            if let Some(record) = self.fibers.get(id.index()) {
                for child in &record.children {
                    if self.fibers.get(child.index()).is_some_and(|c| !c.is_dead()) {
                        stack.push((*child, false));
                    }
                }
            }
        }
        order
    }

    /// Marks `fiber` dead with `outcome` and notifies everyone watching.
    fn seal_record(&mut self, fiber: FiberId, outcome: Outcome) {
        self.unschedule(fiber);
        let seq = self.next_death_seq;
        self.next_death_seq += 1;

        let (parent, waiters) = {
            let Some(record) = self.fibers.get_mut(fiber.index()) else {
                return;
            };
            if record.is_dead() {
                return;
            }
            record.state = FiberState::Dead;
            record.result = Some(outcome);
            record.death_seq = Some(seq);
            record.scheduled = None;
            record.delivered = None;
            record.stored = None;
            (record.parent, std::mem::take(&mut record.waiters))
        };
        debug!(fiber = %fiber, seq, "fiber dead");

        if let Some(parent) = parent {
            if let Some(parent_record) = self.fibers.get_mut(parent.index()) {
                parent_record.detach_child(fiber);
            }
        }
        for waiter in waiters {
            self.schedule_resume(waiter, Resume::wake(), false);
        }
    }
}

// ---------------------------------------------------------------------------
// Thread-local access
// ---------------------------------------------------------------------------

/// Runs `f` against this thread's scheduler state.
///
/// # Panics
///
/// Panics when no runtime is installed on this thread.
pub(crate) fn with<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    SCHEDULER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let state = slot
            .as_mut()
            .expect("must be called from within a polyphony runtime");
        f(state)
    })
}

/// Like [`with`], but a no-op returning `None` when no runtime is installed
/// (used from destructors that may outlive the runtime).
pub(crate) fn try_with<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> Option<R> {
    SCHEDULER.with(|cell| {
        let mut slot = cell.try_borrow_mut().ok()?;
        slot.as_mut().map(f)
    })
}

/// True when a runtime is installed on this thread.
#[must_use]
pub fn runtime_installed() -> bool {
    SCHEDULER.with(|cell| cell.borrow().is_some())
}

// ---------------------------------------------------------------------------
// Operations used by primitives and handles
// ---------------------------------------------------------------------------

/// The id of the currently executing fiber.
pub(crate) fn current() -> FiberId {
    with(|s| s.current)
}

/// The current runtime time.
pub(crate) fn now() -> Time {
    with(|s| s.now())
}

/// Consumes the resume delivered to the current fiber, if any.
pub(crate) fn take_delivered() -> Option<Resume> {
    with(|s| {
        let current = s.current;
        s.fibers
            .get_mut(current.index())
            .and_then(|r| r.delivered.take())
    })
}

/// Parks the current fiber. With `until_idle`, a parked root fiber is
/// resumed by the loop once nothing else can run.
pub(crate) fn park_current(until_idle: bool) {
    with(|s| {
        let current = s.current;
        if let Some(record) = s.fibers.get_mut(current.index()) {
            record.state = FiberState::Waiting;
        }
        if until_idle && current == s.root {
            s.root_parked = true;
        }
    });
}

/// Enqueues the current fiber at the tail (the `snooze` half-step).
pub(crate) fn yield_current() {
    with(|s| {
        let current = s.current;
        s.schedule_resume(current, Resume::wake(), false);
    });
}

/// Schedules `fiber` with a resume.
pub(crate) fn schedule(fiber: FiberId, resume: Resume, prioritize: bool) {
    with(|s| s.schedule_resume(fiber, resume, prioritize));
}

/// Increments the loop-liveness reference counter.
pub(crate) fn fiber_ref() {
    with(|s| s.refs += 1);
}

/// Decrements the loop-liveness reference counter.
pub(crate) fn fiber_unref() {
    let _ = try_with(|s| s.refs = s.refs.saturating_sub(1));
}

/// Allocates a fresh cancellation-scope id.
pub(crate) fn next_scope_id() -> ScopeId {
    with(|s| {
        let id = ScopeId(s.next_scope);
        s.next_scope += 1;
        id
    })
}

/// Drops any not-yet-delivered signal belonging to `scope` from `fiber`.
///
/// Called when a scope exits: its timer may already have fired and parked a
/// signal in the resume slots; the signal must not outlive the scope.
pub(crate) fn scrub_scope(fiber: FiberId, scope: ScopeId) {
    let _ = try_with(|s| {
        let mut clear_queue = false;
        if let Some(record) = s.fibers.get_mut(fiber.index()) {
            if let Some(Resume::Signal(signal)) = &record.scheduled {
                if signal.scope() == Some(scope) {
                    record.scheduled = None;
                    clear_queue = true;
                }
            }
            if let Some(Resume::Signal(signal)) = &record.delivered {
                if signal.scope() == Some(scope) {
                    record.delivered = None;
                }
            }
        }
        if clear_queue {
            s.run_queue.delete(fiber);
        }
    });
}

/// Arms a timer against `target`. Fails when the deadline distance exceeds
/// the configured maximum.
pub(crate) fn arm_timer(
    target: FiberId,
    delay: Duration,
    interval: Option<Duration>,
    resume: Resume,
) -> Result<TimerHandle> {
    with(|s| {
        if delay > s.max_timer || interval.is_some_and(|i| i > s.max_timer) {
            return Err(Error::new(ErrorKind::TimerOverflow));
        }
        let fire_at = s.now() + delay;
        let id = s.timers.arm(fire_at, interval, target, resume);
        trace!(fiber = %target, at = %fire_at, periodic = interval.is_some(), "timer armed");
        Ok(TimerHandle { id })
    })
}

/// An armed timer, disarmed on drop.
///
/// Holding the handle is what keeps the timer alive; every owner therefore
/// releases its timer on every exit path, signal unwinds included.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    id: TimerId,
}

impl TimerHandle {
    /// True while the timer has not fired (one-shot) or been cancelled.
    pub(crate) fn is_live(&self) -> bool {
        try_with(|s| s.timers.is_live(self.id)).unwrap_or(false)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        let _ = try_with(|s| s.timers.cancel(self.id));
    }
}

/// Registers the current fiber as the waiter for `token` readiness in the
/// given direction (true = writable).
pub(crate) fn register_io_waiter(token: Token, writable: bool) {
    with(|s| {
        let current = s.current;
        s.io_waiters.insert(token, (current, writable));
    });
}

/// Removes the waiter registration for `token` if it is the given fiber.
pub(crate) fn cancel_io_waiter(token: Token, fiber: FiberId) {
    let _ = try_with(|s| {
        if s.io_waiters.get(&token).is_some_and(|(f, _)| *f == fiber) {
            s.io_waiters.remove(&token);
        }
    });
}

/// Best-effort wake used by endpoints that may outlive the runtime.
pub(crate) fn try_schedule_wake(fiber: FiberId) {
    let _ = try_with(|s| s.schedule_resume(fiber, Resume::wake(), false));
}

/// Appends a message to `fiber`'s mailbox and wakes it if it is waiting.
pub(crate) fn deliver_message(fiber: FiberId, message: Payload) {
    with(|s| {
        let Some(record) = s.fibers.get_mut(fiber.index()) else {
            return;
        };
        if record.is_dead() {
            return;
        }
        record.mailbox.push_back(message);
        if record.state == FiberState::Waiting {
            s.schedule_resume(fiber, Resume::wake(), false);
        }
    });
}

/// Pops the head of the current fiber's mailbox.
pub(crate) fn pop_message() -> Option<Payload> {
    with(|s| {
        let current = s.current;
        s.fibers
            .get_mut(current.index())
            .and_then(|r| r.mailbox.pop_front())
    })
}

/// Drains the current fiber's mailbox in send order.
pub(crate) fn drain_messages() -> Vec<Payload> {
    with(|s| {
        let current = s.current;
        s.fibers
            .get_mut(current.index())
            .map(|r| r.mailbox.drain(..).collect())
            .unwrap_or_default()
    })
}

/// Adds `waiter` to `target`'s death watchers. Returns false when the
/// target is already dead (the caller should read the result instead).
pub(crate) fn register_waiter(target: FiberId, waiter: FiberId) -> bool {
    with(|s| {
        let Some(record) = s.fibers.get_mut(target.index()) else {
            return false;
        };
        if record.is_dead() {
            return false;
        }
        if !record.waiters.contains(&waiter) {
            record.waiters.push(waiter);
        }
        true
    })
}

/// The lifecycle state of `fiber` (dead when the id no longer resolves).
pub(crate) fn state_of(fiber: FiberId) -> FiberState {
    with(|s| {
        s.fibers
            .get(fiber.index())
            .map_or(FiberState::Dead, |r| r.state)
    })
}

/// The recorded outcome of `fiber`, once dead.
pub(crate) fn result_of(fiber: FiberId) -> Option<Outcome> {
    with(|s| s.fibers.get(fiber.index()).and_then(|r| r.result.clone()))
}

/// The death-order stamp of `fiber`, once dead.
pub(crate) fn death_seq_of(fiber: FiberId) -> Option<u64> {
    with(|s| s.fibers.get(fiber.index()).and_then(|r| r.death_seq))
}

/// The tag given at spawn time.
pub(crate) fn tag_of(fiber: FiberId) -> Option<String> {
    with(|s| s.fibers.get(fiber.index()).and_then(|r| r.tag.clone()))
}

/// The source position of the spawn call.
pub(crate) fn location_of(fiber: FiberId) -> Option<&'static Location<'static>> {
    with(|s| s.fibers.get(fiber.index()).map(|r| r.location))
}

/// The parent of `fiber`, if it has one.
pub(crate) fn parent_of(fiber: FiberId) -> Option<FiberId> {
    with(|s| s.fibers.get(fiber.index()).and_then(|r| r.parent))
}

/// The live children of `fiber`, in spawn order.
pub(crate) fn children_of(fiber: FiberId) -> Vec<FiberId> {
    with(|s| {
        s.fibers
            .get(fiber.index())
            .map(|r| r.children.clone())
            .unwrap_or_default()
    })
}

/// The spawn-site chain of `fiber`, from its own spawn site upward.
pub(crate) fn caller_chain_of(fiber: FiberId) -> Vec<&'static Location<'static>> {
    with(|s| {
        s.fibers
            .get(fiber.index())
            .map(|r| r.caller_chain.clone())
            .unwrap_or_default()
    })
}

/// Spawns a fiber as a child of the current fiber. The body future is built
/// after the record exists, so it can embed its own id.
pub(crate) fn spawn_fiber<F, Fut>(
    tag: Option<String>,
    location: &'static Location<'static>,
    make_body: F,
) -> FiberId
where
    F: FnOnce(FiberId) -> Fut,
    Fut: Future<Output = ()> + 'static,
{
    let (id, parent) = with(|s| {
        let parent = s.current;
        let parent_chain = s
            .fibers
            .get(parent.index())
            .map(|r| r.caller_chain.clone())
            .unwrap_or_default();
        let index = s.fibers.insert_with(|index| {
            FiberRecord::new(
                FiberId::from_index(index),
                tag,
                location,
                Some(parent),
                &parent_chain,
            )
        });
        (FiberId::from_index(index), parent)
    });

    let body = make_body(id);
    with(|s| {
        if let Some(record) = s.fibers.get_mut(id.index()) {
            record.stored = Some(StoredFiber::new(id, body));
        }
        if let Some(parent_record) = s.fibers.get_mut(parent.index()) {
            parent_record.children.push(id);
        }
        // Tail append: the spawner keeps running first.
        s.schedule_resume(id, Resume::wake(), false);
    });
    debug!(fiber = %id, "spawned");
    id
}

/// Records the current fiber's outcome and reaps it.
///
/// Live children are terminated (post-order) before the fiber's own death
/// becomes observable, so no child ever outlives its parent.
pub(crate) fn finalize_current(outcome: Outcome) {
    let current = with(|s| s.current);
    terminate_descendants(current);
    with(|s| s.seal_record(current, outcome));
}

/// Terminates `fiber` without polling it again: children first, then the
/// body future is dropped (running destructors only) and the record sealed.
pub(crate) fn terminate_fiber(fiber: FiberId) {
    terminate_descendants(fiber);
    let stored = with(|s| s.fibers.get_mut(fiber.index()).and_then(|r| r.stored.take()));
    // Dropped outside the state borrow: destructors may re-enter the
    // scheduler (timer handles, reference counts).
    drop(stored);
    with(|s| s.seal_record(fiber, Outcome::Failure(Error::from(Signal::Terminate))));
}

fn terminate_descendants(fiber: FiberId) {
    let order = with(|s| s.descendants_post_order(fiber));
    for id in order {
        let stored = with(|s| s.fibers.get_mut(id.index()).and_then(|r| r.stored.take()));
        drop(stored);
        with(|s| s.seal_record(id, Outcome::Failure(Error::from(Signal::Terminate))));
    }
}

/// Polls a stored fiber body once, outside the state borrow.
fn poll_fiber(fiber: FiberId) {
    let Some(mut stored) = with(|s| s.fibers.get_mut(fiber.index()).and_then(|r| r.stored.take()))
    else {
        return;
    };
    let waker = waker_for(fiber);
    let mut cx = Context::from_waker(&waker);
    match stored.poll(&mut cx) {
        Poll::Ready(()) => {
            // The body wrapper sealed the record before returning.
        }
        Poll::Pending => {
            with(move |s| {
                if let Some(record) = s.fibers.get_mut(fiber.index()) {
                    if !record.is_dead() {
                        record.stored = Some(stored);
                    }
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Runs `body` as the root fiber of a new runtime on this thread, with the
/// default configuration.
///
/// Returns the root body's result once it completes; any fibers still alive
/// at that point are terminated (destructors run, results become
/// `Terminated`) before the runtime is torn down.
///
/// # Errors
///
/// Besides errors from `body` itself: [`ErrorKind::Usage`] when a runtime is
/// already installed on this thread, and [`ErrorKind::Starved`] when every
/// fiber is suspended with no timer, readiness source or reference to wait
/// for.
#[track_caller]
pub fn run<T, F>(body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    run_config(RuntimeConfig::default(), body)
}

/// [`run`] with an explicit [`RuntimeConfig`].
///
/// # Errors
///
/// See [`run`].
#[track_caller]
pub fn run_config<T, F>(config: RuntimeConfig, body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let location = Location::caller();
    let root = SCHEDULER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_some() {
            return Err(Error::usage("a polyphony runtime is already running on this thread"));
        }
        let mut state = SchedulerState::new(config, FiberId::PLACEHOLDER);
        let index = state.fibers.insert_with(|index| {
            FiberRecord::new(FiberId::from_index(index), None, location, None, &[])
        });
        let root = FiberId::from_index(index);
        state.root = root;
        state.current = root;
        *slot = Some(state);
        Ok(root)
    })?;

    let mut root_body = pin!(body);
    let waker = waker_for(root);
    let result = loop {
        match with(SchedulerState::next_turn) {
            Turn::Run(fiber) => {
                if fiber == root {
                    let terminated = with(|s| {
                        s.fibers.get_mut(root.index()).is_some_and(|r| {
                            if r.delivered.as_ref().is_some_and(Resume::is_terminate) {
                                r.delivered = None;
                                true
                            } else {
                                false
                            }
                        })
                    });
                    if terminated {
                        break Err(Error::from(Signal::Terminate));
                    }
                    let mut cx = Context::from_waker(&waker);
                    match root_body.as_mut().poll(&mut cx) {
                        Poll::Ready(result) => break result,
                        Poll::Pending => {}
                    }
                } else {
                    poll_fiber(fiber);
                }
            }
            Turn::Terminate(fiber) => terminate_fiber(fiber),
            Turn::Wait(timeout) => with(|s| s.poll_backend(timeout)),
            Turn::Starved => break Err(Error::new(ErrorKind::Starved)),
        }
    };

    // Structured teardown: nothing outlives the root.
    terminate_descendants(root);
    with(|s| {
        let outcome = match &result {
            Ok(_) => Outcome::nil(),
            Err(e) => Outcome::Failure(e.clone()),
        };
        s.seal_record(root, outcome);
    });
    SCHEDULER.with(|cell| cell.borrow_mut().take());
    result
}
