//! Per-item cache entry
//!
//! Lives inside its owning pack's item map and cannot outlive it: the
//! pack carries one refcount unit per live item entry, released by the
//! registry when the item is evicted.

use crate::cache::stage::Stage;
use crate::cache::{DecOutcome, DoneCallback};
use crate::loader::ItemBytes;
use crate::manifest::ItemId;
use tracing::{error, warn};

/// Cache entry for one item materialized from a loaded pack
pub struct ItemCache {
    id: ItemId,
    stage: Stage,
    refcount: u32,
    retain_remaining: f64,
    waiters: Vec<DoneCallback>,
    payload: Option<ItemBytes>,
}

impl ItemCache {
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            stage: Stage::Created,
            refcount: 0,
            retain_remaining: 0.0,
            waiters: Vec::new(),
            payload: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Materialized payload, present iff the stage is loaded/retained
    pub fn payload(&self) -> Option<ItemBytes> {
        self.payload.clone()
    }

    /// Queue a callback for the in-flight or not-yet-started load
    pub fn push_waiter(&mut self, done: DoneCallback) {
        self.waiters.push(done);
    }

    /// Drain the waiter list for settlement
    pub fn take_waiters(&mut self) -> Vec<DoneCallback> {
        std::mem::take(&mut self.waiters)
    }

    /// Created -> Loading; the registry issues exactly one materialization
    pub fn begin_load(&mut self) {
        debug_assert_eq!(self.stage, Stage::Created);
        self.stage = Stage::Loading;
    }

    /// Settle the in-flight load. Failure skips Loaded and marks the
    /// entry dead for the next sweep.
    pub fn settle(&mut self, payload: Option<ItemBytes>) -> bool {
        debug_assert_eq!(self.stage, Stage::Loading);
        match payload {
            Some(bytes) => {
                self.payload = Some(bytes);
                self.stage = Stage::Loaded;
                true
            }
            None => {
                self.stage = Stage::Unloading;
                false
            }
        }
    }

    /// Register one more holder. Returns true when this reactivated a
    /// retained entry (canceling its pending eviction).
    pub fn inc_ref(&mut self) -> bool {
        match self.stage {
            Stage::Created | Stage::Loading | Stage::Loaded => {
                self.refcount += 1;
                false
            }
            Stage::Retained => {
                self.refcount += 1;
                self.stage = Stage::Loaded;
                self.retain_remaining = 0.0;
                true
            }
            Stage::Unloading | Stage::Unloaded => {
                error!(item = %self.id, stage = %self.stage, "inc_ref on dead item entry");
                false
            }
        }
    }

    /// Release one holder. On reaching zero the entry parks in
    /// `Retained` (retention on) or is marked dead (retention off).
    pub fn dec_ref(&mut self, retain_enabled: bool, retain_seconds: f64) -> DecOutcome {
        if self.refcount == 0 {
            warn!(item = %self.id, "dec_ref on item with zero refcount");
            return DecOutcome::Active;
        }
        self.refcount -= 1;
        if self.refcount > 0 {
            return DecOutcome::Active;
        }
        if retain_enabled && self.stage == Stage::Loaded {
            self.stage = Stage::Retained;
            self.retain_remaining = retain_seconds;
            DecOutcome::Parked
        } else {
            if self.stage.is_loaded() {
                self.stage = Stage::Unloading;
            }
            self.retain_remaining = 0.0;
            DecOutcome::MarkedDead
        }
    }

    /// Park a freshly-settled entry that nobody holds. Happens when the
    /// last holder released while the materialization was still in
    /// flight; the entry parks in `Retained` (or is marked dead with
    /// retention off) instead of lingering loaded at zero.
    pub fn park_if_unreferenced(&mut self, retain_enabled: bool, retain_seconds: f64) -> bool {
        if self.refcount > 0 || self.stage != Stage::Loaded {
            return false;
        }
        if retain_enabled {
            self.stage = Stage::Retained;
            self.retain_remaining = retain_seconds;
        } else {
            self.stage = Stage::Unloading;
        }
        true
    }

    /// Age the retain timer. Returns true when expiry moved the entry to
    /// `Unloading`; the caller collects it for eviction after the pass.
    pub fn tick(&mut self, dt: f64) -> bool {
        if self.stage != Stage::Retained {
            return false;
        }
        self.retain_remaining -= dt;
        if self.retain_remaining <= 0.0 {
            self.stage = Stage::Unloading;
            true
        } else {
            false
        }
    }

    /// Hard teardown when the owning pack dies; bypasses refcounting.
    pub fn dispose(&mut self) {
        self.payload = None;
        self.stage = Stage::Unloaded;
    }
}
