//! Core types: identifiers, time, signals, outcomes.

mod id;
mod outcome;
mod signal;
mod time;

pub use id::FiberId;
pub use outcome::{payload, payload_as, Outcome, Payload};
pub use signal::{ScopeId, Signal};
pub use time::{ClockSource, Time};
