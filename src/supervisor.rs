//! Supervision: coordinating the lifetimes of a set of fibers.
//!
//! [`supervise`] suspends the calling fiber until every watched fiber is
//! dead, reporting each death (in death order) through a callback. The
//! [`Supervisor`] form owns respawn factories, enabling restart policies;
//! a restarted child is a fresh fiber with an empty mailbox.
//!
//! A supervising fiber that is itself terminated takes its supervised
//! children down with it through the runtime's ordinary cascade: children
//! are terminated and sealed before the supervisor's own death is
//! observable.

use crate::error::{Error, Result};
use crate::fiber::Fiber;
use crate::runtime::record::Resume;
use crate::runtime::scheduler;
use crate::types::Outcome;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Callback invoked once per watched fiber death, in death order.
pub type OnDone = Box<dyn FnMut(&Fiber, &Outcome)>;

/// Restart policy for supervised fibers with a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Never respawn; each child is watched to its first death.
    #[default]
    Never,
    /// Respawn a child whose outcome was a failure.
    OnError,
    /// Respawn on any death.
    Always,
}

/// Options for [`supervise`] and [`Supervisor::supervise`].
#[derive(Default)]
pub struct SuperviseOptions {
    on_done: Option<OnDone>,
    restart: RestartPolicy,
}

impl SuperviseOptions {
    /// Empty options: watch to death, no callback, no restarts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-death callback.
    #[must_use]
    pub fn on_done(mut self, f: impl FnMut(&Fiber, &Outcome) + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    /// Sets the restart policy (effective only for factory-backed entries).
    #[must_use]
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }
}

impl std::fmt::Debug for SuperviseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperviseOptions")
            .field("restart", &self.restart)
            .field("has_on_done", &self.on_done.is_some())
            .finish()
    }
}

/// Suspends until every fiber in `fibers` is dead, invoking the options'
/// callback per death in death order.
///
/// With an empty list, the current fiber's children are watched instead,
/// but only when a callback is given; an empty list without a callback is a
/// usage error.
///
/// # Errors
///
/// [`crate::ErrorKind::Usage`] as described above, and any signal delivered
/// to the supervising fiber while it waits.
pub async fn supervise(fibers: &[Fiber], opts: SuperviseOptions) -> Result<()> {
    let watched: Vec<Fiber> = if fibers.is_empty() {
        if opts.on_done.is_none() {
            return Err(Error::usage("supervise needs fibers to watch or a callback"));
        }
        Fiber::current().children()
    } else {
        fibers.to_vec()
    };

    let entries = watched
        .into_iter()
        .map(|fiber| Entry {
            fiber,
            factory: None,
            reported_seq: None,
            done: false,
        })
        .collect();
    supervise_entries(entries, opts).await
}

/// A supervisor that owns how its children are (re)spawned.
#[derive(Default)]
pub struct Supervisor {
    entries: Vec<Entry>,
}

impl Supervisor {
    /// An empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches an existing fiber (never restarted: there is no factory).
    pub fn add(&mut self, fiber: Fiber) -> &mut Self {
        self.entries.push(Entry {
            fiber,
            factory: None,
            reported_seq: None,
            done: false,
        });
        self
    }

    /// Spawns a child through `factory` and keeps the factory for restarts.
    pub fn spawn(&mut self, mut factory: impl FnMut() -> Fiber + 'static) -> Fiber {
        let fiber = factory();
        self.entries.push(Entry {
            fiber,
            factory: Some(Box::new(factory)),
            reported_seq: None,
            done: false,
        });
        fiber
    }

    /// Number of supervised entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is supervised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Supervises the registered children until all are done under the
    /// restart policy.
    ///
    /// # Errors
    ///
    /// [`crate::ErrorKind::Usage`] when nothing was registered, plus any
    /// signal delivered to the supervising fiber.
    pub async fn supervise(self, opts: SuperviseOptions) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::usage("supervisor has no children"));
        }
        supervise_entries(self.entries, opts).await
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("entries", &self.entries.len())
            .finish()
    }
}

struct Entry {
    fiber: Fiber,
    factory: Option<Box<dyn FnMut() -> Fiber>>,
    /// Death stamp already reported for the current incarnation.
    reported_seq: Option<u64>,
    done: bool,
}

async fn supervise_entries(mut entries: Vec<Entry>, mut opts: SuperviseOptions) -> Result<()> {
    loop {
        // Collect deaths that have not been reported yet, in death order.
        let mut deaths: Vec<(usize, u64)> = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            if entry.done {
                continue;
            }
            if let Some(seq) = scheduler::death_seq_of(entry.fiber.id()) {
                if entry.reported_seq != Some(seq) {
                    deaths.push((idx, seq));
                }
            }
        }
        deaths.sort_by_key(|(_, seq)| *seq);

        for (idx, seq) in deaths {
            let outcome = entries[idx]
                .fiber
                .result()
                .unwrap_or(Outcome::nil());
            let fiber = entries[idx].fiber;
            if let Some(on_done) = opts.on_done.as_mut() {
                on_done(&fiber, &outcome);
            }
            entries[idx].reported_seq = Some(seq);

            let wants_restart = match opts.restart {
                RestartPolicy::Never => false,
                RestartPolicy::OnError => outcome.is_failure(),
                RestartPolicy::Always => true,
            };
            match (wants_restart, entries[idx].factory.as_mut()) {
                (true, Some(factory)) => {
                    let fresh = factory();
                    entries[idx].fiber = fresh;
                    entries[idx].reported_seq = None;
                }
                _ => entries[idx].done = true,
            }
        }

        if entries.iter().all(|e| e.done) {
            return Ok(());
        }

        // Register for the next death and park until something happens.
        let me = scheduler::current();
        let mut registered_any = false;
        for entry in &entries {
            if !entry.done && scheduler::register_waiter(entry.fiber.id(), me) {
                registered_any = true;
            }
        }
        if registered_any {
            DeathWait { parked: false }.await?;
        }
        // Otherwise a watched fiber died between the scan and registration;
        // loop around and report it.
    }
}

/// Parks the supervisor until a watched fiber's death (or any wake).
#[derive(Debug)]
struct DeathWait {
    parked: bool,
}

impl Future for DeathWait {
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
