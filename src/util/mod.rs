//! Internal utilities.

mod arena;

pub use arena::{SlotArena, SlotIndex};
