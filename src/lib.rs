//! Polyphony: a cooperative fiber runtime with structured concurrency.
//!
//! Polyphony runs lightweight fibers on a single-threaded event loop per OS
//! thread. Fibers suspend transparently at the crate's suspension points
//! (timers, messaging, joining, I/O waits) and never anywhere else; pure
//! computation is never preempted.
//!
//! # Core Guarantees
//!
//! - **Deterministic fairness**: the run queue is strictly FIFO; a fiber
//!   that yields goes to the tail and every runnable peer gets a turn first
//! - **Structured lifetimes**: every fiber is a child of its spawner; no
//!   fiber outlives its parent, and termination cascades through children
//!   before a parent's death is observable
//! - **Signal-based cancellation**: unwinds are tagged signals delivered
//!   only at suspension points; `MoveOn` is caught at exactly its scope,
//!   `Cancel`/`Interrupt` unwind as catchable errors, `Terminate` runs
//!   destructors only
//! - **Scoped resources**: every armed timer and readiness registration is
//!   released on every exit path, signal unwinds included
//! - **Composed failure traces**: joining a failed fiber re-raises its error
//!   with the spawn chain appended across fiber boundaries
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! polyphony::run(async {
//!     let worker = polyphony::spin(async {
//!         polyphony::sleep(Duration::from_millis(10)).await?;
//!         Ok(42_i32)
//!     });
//!     let value = worker.join().await?;
//!     assert_eq!(value.as_ref().and_then(|v| v.downcast_ref::<i32>()), Some(&42));
//!     Ok(())
//! })
//! .unwrap();
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, time, signals, outcomes
//! - [`io`]: the reactor contract, stream contracts and endpoints
//! - top level: the global verbs, [`Fiber`], cancel scopes, supervision,
//!   throttling, [`run`]/[`run_config`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod api;
mod error;
mod fiber;
pub mod io;
mod runtime;
mod scope;
mod supervisor;
mod throttle;
pub mod tracing_compat;
pub mod types;
mod util;

pub use api::{
    after, current, every, receive, receive_pending, sleep, sleep_forever, snooze, spin,
    spin_tagged, suspend, Receive, Sleep, SleepForever, Snooze, Suspend,
};
pub use error::{Error, ErrorKind, Result, TraceFrame};
pub use fiber::{Fiber, Join};
pub use runtime::{run, run_config, runtime_installed, FiberState, RuntimeConfig};
pub use scope::{
    cancel_after, move_on_after, move_on_after_with_value, CancelScope, Canceller, ScopeMode,
};
pub use supervisor::{supervise, OnDone, RestartPolicy, SuperviseOptions, Supervisor};
pub use throttle::{spin_loop, throttled_loop, Throttler};
pub use types::{payload, payload_as, Outcome, Payload, Signal};
