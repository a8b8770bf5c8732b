//! Cache entries for packs and items
//!
//! A pack entry owns the map of item entries materialized from it; both
//! kinds share the [`Stage`] lifecycle, a refcount, a retain timer, and
//! a pending-waiter list that coalesces concurrent requests for the same
//! not-yet-ready resource into a single underlying load.
//!
//! Entries hold no references to each other or to the registry. All
//! cross-entry effects (dependency refcounts, fan-in signaling, item
//! unit release) are applied by the registry, which owns the arena.

pub mod fan_in;
pub mod item;
pub mod pack;
pub mod stage;

pub use fan_in::FanIn;
pub use item::ItemCache;
pub use pack::PackCache;
pub use stage::Stage;

use crate::manifest::{ItemId, PackId};

/// Callback invoked once a load request settles
pub type DoneCallback = Box<dyn FnOnce(bool) + Send>;

/// A party waiting for a pack load to settle.
///
/// Cross-entry completions are ids resolved by the registry, never
/// closures capturing it.
pub(crate) enum PackWaiter {
    /// An external caller's completion callback
    External(DoneCallback),
    /// A dependent pack's fan-in slot to signal
    Dependent { pack: PackId, slot: usize },
    /// An item request sequenced behind the pack load
    ItemRequest { item: ItemId, done: DoneCallback },
}

/// Outcome of a refcount decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecOutcome {
    /// Refcount still positive
    Active,
    /// Reached zero; parked in `Retained` with the timer armed
    Parked,
    /// Reached zero with retention off; marked for eviction
    MarkedDead,
}

impl DecOutcome {
    /// Whether the decrement brought the refcount to zero
    pub fn reached_zero(&self) -> bool {
        !matches!(self, Self::Active)
    }
}
