//! Cache entry lifecycle stages
//!
//! Both pack and item cache entries move through the same machine:
//!
//! ```text
//! Created -> Loading -> Loaded -> Retained -> Unloading -> Unloaded
//! ```
//!
//! `Retained` holds a zero-refcount entry alive until its retain timer
//! expires; a new acquisition flips it back to `Loaded` without a reload.
//! A failed load goes straight from `Loading` to `Unloading`. `Unloaded`
//! is terminal: the entry is removed from its owning map, and a new
//! request creates a fresh entry.

use std::fmt;

/// Lifecycle stage of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Entry exists but no load has been requested yet
    Created,
    /// A load is in flight; new requests coalesce onto it
    Loading,
    /// Resource is materialized and referenced
    Loaded,
    /// Refcount is zero; eviction deferred behind the retain timer
    Retained,
    /// Marked dead, awaiting the eviction sweep
    Unloading,
    /// Terminal; the entry is removed rather than reused
    Unloaded,
}

impl Stage {
    /// Whether the underlying resource is materialized and usable
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded | Self::Retained)
    }

    /// Whether the entry is dead or dying
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Unloading | Self::Unloaded)
    }

    /// Whether a load request for this entry has already settled
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Created | Self::Loading)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Retained => write!(f, "retained"),
            Self::Unloading => write!(f, "unloading"),
            Self::Unloaded => write!(f, "unloaded"),
        }
    }
}
