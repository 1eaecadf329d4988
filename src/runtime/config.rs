//! Runtime configuration.

use crate::io::Reactor;
use crate::types::ClockSource;
use std::time::Duration;

/// Builder-style configuration for [`run_config`](crate::run_config).
///
/// The defaults give a wall-clock runtime backed by the OS reactor. Tests
/// that need determinism switch to virtual time, which pairs with the
/// simulated reactor unless another one is supplied.
pub struct RuntimeConfig {
    pub(crate) clock: ClockSource,
    pub(crate) reactor: Option<Box<dyn Reactor>>,
    /// Deadlines further out than this are rejected with `TimerOverflow`.
    pub(crate) max_timer: Duration,
    /// Run-queue depth that arms the anti-starvation backend poll.
    pub(crate) starve_watermark: usize,
    /// Switch count that triggers the armed anti-starvation poll.
    pub(crate) starve_switches: usize,
}

impl RuntimeConfig {
    /// A wall-clock configuration with default guards.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: ClockSource::wall(),
            reactor: None,
            max_timer: Duration::from_secs(7 * 24 * 60 * 60),
            starve_watermark: 128,
            starve_switches: 64,
        }
    }

    /// Switches to virtual time (deterministic timers, no real waiting).
    #[must_use]
    pub fn virtual_time(mut self) -> Self {
        self.clock = ClockSource::virtual_clock();
        self
    }

    /// Uses the given clock source.
    #[must_use]
    pub fn with_clock(mut self, clock: ClockSource) -> Self {
        self.clock = clock;
        self
    }

    /// Uses the given reactor instead of the default for the clock choice.
    #[must_use]
    pub fn with_reactor(mut self, reactor: Box<dyn Reactor>) -> Self {
        self.reactor = Some(reactor);
        self
    }

    /// Sets the maximum accepted timer deadline distance.
    #[must_use]
    pub fn with_max_timer(mut self, max: Duration) -> Self {
        self.max_timer = max;
        self
    }

    /// Tunes the anti-starvation thresholds (queue depth, switch count).
    #[must_use]
    pub fn with_starvation_thresholds(mut self, watermark: usize, switches: usize) -> Self {
        self.starve_watermark = watermark;
        self.starve_switches = switches;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("clock", &self.clock)
            .field("max_timer", &self.max_timer)
            .field("starve_watermark", &self.starve_watermark)
            .field("starve_switches", &self.starve_switches)
            .finish_non_exhaustive()
    }
}
