//! Fiber identifiers.
//!
//! A [`FiberId`] is a generation-tagged index into the scheduler's fiber
//! table. All cross-fiber references (parent links, child sets, await
//! waiters, timer targets) are ids, dereferenced through the scheduler;
//! nothing holds a direct reference to another fiber's record.

use crate::util::SlotIndex;
use core::fmt;

/// A unique identifier for a fiber within one scheduler.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(pub(crate) SlotIndex);

impl FiberId {
    /// Placeholder id used while the real root id is being allocated.
    pub(crate) const PLACEHOLDER: Self = Self(SlotIndex::new(0, 0));

    /// Wraps a fiber-table index (internal use).
    #[must_use]
    pub(crate) const fn from_index(index: SlotIndex) -> Self {
        Self(index)
    }

    /// The underlying fiber-table index (internal use).
    #[must_use]
    pub(crate) const fn index(self) -> SlotIndex {
        self.0
    }

    /// Builds an id from raw parts, for unit tests that need stable ids
    /// without a live scheduler.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(slot: u32, generation: u32) -> Self {
        Self(SlotIndex::new(slot, generation))
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({}:{})", self.0.slot(), self.0.generation())
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0.slot())
    }
}
