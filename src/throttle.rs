//! Rate limiting for loops: the throttler and the loop verbs.
//!
//! A [`Throttler`] paces iterations from a fixed base deadline rather than
//! from "now", so the achieved rate does not drift when iteration bodies
//! take time: each slot is the previous slot plus the period, and the
//! throttler only sleeps for whatever remains of it.

use crate::api::{sleep, spin_inner};
use crate::error::Result;
use crate::fiber::Fiber;
use crate::runtime::scheduler;
use crate::types::Time;
use std::future::Future;
use std::panic::Location;
use std::time::Duration;

/// Paces a loop to a maximum iteration rate.
#[derive(Debug)]
pub struct Throttler {
    period: Duration,
    next_slot: Option<Time>,
}

impl Throttler {
    /// A throttler allowing `rate` iterations per second.
    ///
    /// # Panics
    ///
    /// Panics when `rate` is not positive and finite.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        assert!(
            rate.is_finite() && rate > 0.0,
            "throttle rate must be positive, got {rate}"
        );
        Self::from_interval(Duration::from_secs_f64(1.0 / rate))
    }

    /// A throttler with an explicit period between iterations.
    #[must_use]
    pub const fn from_interval(period: Duration) -> Self {
        Self {
            period,
            next_slot: None,
        }
    }

    /// The pacing period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the current iteration's slot.
    ///
    /// The first call passes immediately and fixes the base; each later call
    /// sleeps the remainder of its slot, measured from the base rather than
    /// from the previous wake-up.
    ///
    /// # Errors
    ///
    /// Signals delivered while sleeping unwind as errors.
    pub async fn call(&mut self) -> Result<()> {
        let now = scheduler::now();
        let slot = self.next_slot.unwrap_or(now);
        if slot > now {
            sleep(slot.duration_since(now)).await?;
        }
        self.next_slot = Some(slot + self.period);
        Ok(())
    }
}

/// Drives `body` no faster than `rate` iterations per second; `count`
/// bounds the number of iterations (unbounded when `None`).
///
/// The iteration index is passed to `body`.
///
/// # Errors
///
/// Whatever `body` fails with, and signals delivered while pacing.
pub async fn throttled_loop<F, Fut>(rate: f64, count: Option<u64>, mut body: F) -> Result<()>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut throttler = Throttler::new(rate);
    match count {
        Some(n) => {
            for i in 0..n {
                throttler.call().await?;
                body(i).await?;
            }
        }
        None => {
            let mut i = 0_u64;
            loop {
                throttler.call().await?;
                body(i).await?;
                i += 1;
            }
        }
    }
    Ok(())
}

/// Spawns a fiber whose whole life is a loop of `body`, optionally capped at
/// `rate` iterations per second. Ended by `stop`/`terminate` (or an error
/// from `body`).
#[track_caller]
pub fn spin_loop<F, Fut>(tag: Option<&str>, rate: Option<f64>, mut body: F) -> Fiber
where
    F: FnMut() -> Fut + 'static,
    Fut: Future<Output = Result<()>> + 'static,
{
    let location = Location::caller();
    let mut throttler = rate.map(Throttler::new);
    spin_inner::<(), _>(tag.map(str::to_owned), location, async move {
        loop {
            if let Some(throttler) = throttler.as_mut() {
                throttler.call().await?;
            }
            body().await?;
        }
    })
}
