//! Cancellation scopes: scoped deadlines and cancellable regions.
//!
//! A [`CancelScope`] bounds a region of a fiber's execution. It can arm a
//! deadline timer whose signal unwinds the region, and it hands out
//! [`Canceller`]s other fibers can fire explicitly. Every scope owns a
//! [`ScopeId`]; the signals it arms carry that id, so a scope catches
//! exactly its own signal and nesting behaves: an inner scope's timeout
//! never disturbs an outer scope.
//!
//! On every exit path (normal completion, its own signal, a foreign signal
//! passing through, even the whole fiber being dropped) the scope disarms
//! its timer and scrubs any not-yet-delivered signal of its own.

use crate::error::Result;
use crate::runtime::record::Resume;
use crate::runtime::scheduler;
use crate::runtime::TimerHandle;
use crate::types::{FiberId, Payload, ScopeId, Signal};
use std::future::Future;
use std::time::Duration;

/// Which signal a scope delivers when cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// `MoveOn`: swallowed at the scope boundary, which yields a fallback
    /// value.
    MoveOn,
    /// `Cancel`: surfaces as an error at the scope boundary and keeps
    /// unwinding until caught.
    Cancel,
}

/// A cancellable region of the current fiber.
#[derive(Debug)]
pub struct CancelScope {
    id: ScopeId,
    mode: ScopeMode,
    fiber: FiberId,
    timer: Option<TimerHandle>,
}

impl CancelScope {
    /// Creates a scope for the current fiber.
    ///
    /// # Panics
    ///
    /// Panics outside a runtime.
    #[must_use]
    pub fn new(mode: ScopeMode) -> Self {
        Self {
            id: scheduler::next_scope_id(),
            mode,
            fiber: scheduler::current(),
            timer: None,
        }
    }

    /// Arms a deadline: after `duration` the scope's signal is scheduled
    /// into its fiber.
    ///
    /// # Errors
    ///
    /// Fails when the deadline exceeds the configured maximum.
    pub fn with_timeout(mut self, duration: Duration) -> Result<Self> {
        let resume = Resume::Signal(self.signal(None));
        self.timer = Some(scheduler::arm_timer(self.fiber, duration, None, resume)?);
        Ok(self)
    }

    /// The scope's id.
    #[must_use]
    pub const fn id(&self) -> ScopeId {
        self.id
    }

    /// A handle for cancelling this scope from another fiber.
    #[must_use]
    pub const fn canceller(&self) -> Canceller {
        Canceller {
            id: self.id,
            mode: self.mode,
            fiber: self.fiber,
        }
    }

    /// Runs `body` inside the scope.
    ///
    /// Returns `Ok(Some(value))` when the body completes first. In `MoveOn`
    /// mode the scope's own signal is caught here and yields `Ok(None)`; in
    /// `Cancel` mode it surfaces as the error. Foreign signals and ordinary
    /// errors always pass through.
    pub async fn enter<T, F>(self, body: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match body.await {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                if self.mode == ScopeMode::MoveOn && error.signal_for_scope(self.id).is_some() {
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        };
        // `self` drops here on every path, disarming the timer and
        // scrubbing any in-flight signal of this scope.
        result
    }

    fn signal(&self, value: Option<Payload>) -> Signal {
        match self.mode {
            ScopeMode::MoveOn => Signal::MoveOn {
                scope: Some(self.id),
                value,
            },
            ScopeMode::Cancel => Signal::Cancel {
                scope: Some(self.id),
            },
        }
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        // The timer handle's own drop disarms it; what remains is a signal
        // that may already sit in the fiber's resume slots.
        scheduler::scrub_scope(self.fiber, self.id);
    }
}

/// Cancels a [`CancelScope`] from anywhere in the same runtime.
#[derive(Debug, Clone, Copy)]
pub struct Canceller {
    id: ScopeId,
    mode: ScopeMode,
    fiber: FiberId,
}

impl Canceller {
    /// Schedules the scope's signal into its fiber, prioritized.
    pub fn cancel(&self) {
        let signal = match self.mode {
            ScopeMode::MoveOn => Signal::MoveOn {
                scope: Some(self.id),
                value: None,
            },
            ScopeMode::Cancel => Signal::Cancel {
                scope: Some(self.id),
            },
        };
        scheduler::schedule(self.fiber, Resume::Signal(signal), true);
    }
}

/// Runs `body` with a deadline; on timeout the body unwinds silently and
/// `None` is returned instead of its value.
///
/// # Errors
///
/// Ordinary errors and foreign signals from `body`, or `TimerOverflow` for
/// an oversized `duration`.
pub async fn move_on_after<T, F>(duration: Duration, body: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    CancelScope::new(ScopeMode::MoveOn)
        .with_timeout(duration)?
        .enter(body)
        .await
}

/// [`move_on_after`] with a fallback value produced on timeout.
///
/// # Errors
///
/// See [`move_on_after`].
pub async fn move_on_after_with_value<T, F>(duration: Duration, value: T, body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    Ok(move_on_after(duration, body).await?.unwrap_or(value))
}

/// Runs `body` with a deadline; on timeout a `Cancel` signal unwinds the
/// body and surfaces here as an error (`ErrorKind::Cancelled`).
///
/// The scope itself never catches the cancellation; it only guarantees the
/// timer is disarmed on exit.
///
/// # Errors
///
/// `Cancelled` on timeout, plus anything `body` fails with.
pub async fn cancel_after<T, F>(duration: Duration, body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let scope = CancelScope::new(ScopeMode::Cancel).with_timeout(duration)?;
    match scope.enter(body).await? {
        Some(value) => Ok(value),
        // Cancel mode never swallows its own signal.
        None => unreachable!("cancel scope produced no value without an error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{sleep, snooze, spin, suspend};
    use crate::error::ErrorKind;
    use crate::run_config;
    use crate::runtime::RuntimeConfig;
    use std::time::Duration;

    fn run_virtual<T: 'static>(
        body: impl Future<Output = Result<T>> + 'static,
    ) -> Result<T> {
        run_config(RuntimeConfig::new().virtual_time(), body)
    }

    #[test]
    fn move_on_after_times_out_to_none() {
        let result = run_virtual(async {
            move_on_after(Duration::from_millis(10), async {
                sleep(Duration::from_millis(100)).await?;
                Ok("finished")
            })
            .await
        })
        .expect("runtime");
        assert_eq!(result, None);
    }

    #[test]
    fn move_on_after_passes_fast_body_through() {
        let result = run_virtual(async {
            move_on_after(Duration::from_millis(100), async { Ok(7_i32) }).await
        })
        .expect("runtime");
        assert_eq!(result, Some(7));
    }

    #[test]
    fn move_on_after_with_value_yields_fallback() {
        let result = run_virtual(async {
            move_on_after_with_value(Duration::from_millis(10), "bar", async {
                sleep(Duration::from_secs(1)).await?;
                Ok("foo")
            })
            .await
        })
        .expect("runtime");
        assert_eq!(result, "bar");
    }

    #[test]
    fn cancel_after_surfaces_cancelled() {
        let error = run_virtual(async {
            cancel_after(Duration::from_millis(10), async {
                sleep(Duration::from_secs(1000)).await?;
                Ok(())
            })
            .await
        })
        .expect_err("timeout must cancel");
        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn nested_inner_timeout_leaves_outer_alone() {
        let result = run_virtual(async {
            move_on_after(Duration::from_secs(10), async {
                let inner = move_on_after(Duration::from_millis(5), async {
                    sleep(Duration::from_secs(1)).await?;
                    Ok("inner")
                })
                .await?;
                assert_eq!(inner, None);
                Ok("outer finished")
            })
            .await
        })
        .expect("runtime");
        assert_eq!(result, Some("outer finished"));
    }

    #[test]
    fn canceller_fires_scope_from_another_fiber() {
        let result = run_virtual(async {
            let scope = CancelScope::new(ScopeMode::MoveOn);
            let canceller = scope.canceller();
            spin(async move {
                snooze().await?;
                canceller.cancel();
                Ok(())
            });
            let out = scope
                .enter(async {
                    sleep(Duration::from_secs(100)).await?;
                    Ok("slept")
                })
                .await?;
            suspend().await?;
            Ok(out)
        })
        .expect("runtime");
        assert_eq!(result, None);
    }

    #[test]
    fn scope_exit_does_not_leak_its_signal() {
        // The body finishes without suspending, so the armed signal is never
        // delivered; a leaked MoveOn would unwind the follow-up sleep.
        let result = run_virtual(async {
            let out = move_on_after(Duration::from_millis(1), async {
                Ok::<_, crate::Error>(1_i32)
            })
            .await?;
            sleep(Duration::from_millis(5)).await?;
            Ok(out)
        })
        .expect("runtime");
        assert_eq!(result, Some(1));
    }
}
