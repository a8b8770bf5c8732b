//! Per-pack cache entry
//!
//! Owns the pack's lifecycle state, its item entries, and the fan-in
//! bookkeeping for an in-flight load (one slot per dependency plus one
//! for the pack's own image fetch). The registry drives all transitions;
//! this type never touches other entries.

use crate::cache::fan_in::FanIn;
use crate::cache::stage::Stage;
use crate::cache::{DecOutcome, ItemCache, PackWaiter};
use crate::loader::PackBytes;
use crate::manifest::{ItemId, PackDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Fan-in state for an in-flight pack load
pub struct PendingLoad {
    /// One slot per dependency, plus the own-image slot
    pub group: FanIn,
    /// Slot index reserved for the pack's own image fetch
    pub own_slot: usize,
    /// Fetched image bytes, parked until the group completes
    pub bytes: Option<PackBytes>,
    /// First failure reported into the group, for diagnostics
    pub error: Option<String>,
    /// Spawned fetch task, aborted on whole-cache teardown
    pub task: Option<JoinHandle<()>>,
}

/// Cache entry for one pack and the items materialized from it
pub struct PackCache {
    descriptor: Arc<PackDescriptor>,
    stage: Stage,
    refcount: u32,
    retain_remaining: f64,
    waiters: Vec<PackWaiter>,
    items: HashMap<ItemId, ItemCache>,
    handle: Option<PackBytes>,
    pending: Option<PendingLoad>,
    /// Whether this pack currently holds one refcount unit on each of
    /// its dependencies (pinned when its load is requested and on
    /// reactivation, released when its own refcount reaches zero or
    /// its load fails).
    holds_dep_refs: bool,
}

impl PackCache {
    pub fn new(descriptor: Arc<PackDescriptor>) -> Self {
        Self {
            descriptor,
            stage: Stage::Created,
            refcount: 0,
            retain_remaining: 0.0,
            waiters: Vec::new(),
            items: HashMap::new(),
            handle: None,
            pending: None,
            holds_dep_refs: false,
        }
    }

    pub fn descriptor(&self) -> &Arc<PackDescriptor> {
        &self.descriptor
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Raw pack image, present iff the stage is loaded/retained
    pub fn handle(&self) -> Option<PackBytes> {
        self.handle.clone()
    }

    pub fn holds_dep_refs(&self) -> bool {
        self.holds_dep_refs
    }

    pub fn item(&self, id: &str) -> Option<&ItemCache> {
        self.items.get(id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut ItemCache> {
        self.items.get_mut(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemCache> {
        self.items.values()
    }

    pub fn live_item_count(&self) -> usize {
        self.items.len()
    }

    /// Whether an item entry exists; creating one costs the pack a
    /// refcount unit, which the registry accounts for.
    pub fn has_item_entry(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Insert a fresh item entry. The registry pairs this with one
    /// `inc_ref` on the pack ("this pack is needed because it owns a
    /// live item").
    pub fn insert_item(&mut self, id: ItemId) -> &mut ItemCache {
        debug_assert!(!self.items.contains_key(&id));
        self.items.entry(id.clone()).or_insert_with(|| ItemCache::new(id))
    }

    /// Remove an evicted item entry; the registry releases the matching
    /// pack refcount unit.
    pub fn remove_item(&mut self, id: &str) -> Option<ItemCache> {
        self.items.remove(id)
    }

    pub(crate) fn push_waiter(&mut self, waiter: PackWaiter) {
        self.waiters.push(waiter);
    }

    pub(crate) fn take_waiters(&mut self) -> Vec<PackWaiter> {
        std::mem::take(&mut self.waiters)
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Created -> Loading with fan-in bookkeeping attached
    pub fn begin_load(&mut self, pending: PendingLoad) {
        debug_assert_eq!(self.stage, Stage::Created);
        self.stage = Stage::Loading;
        self.pending = Some(pending);
    }

    pub fn pending_mut(&mut self) -> Option<&mut PendingLoad> {
        self.pending.as_mut()
    }

    /// Settle the in-flight load once the fan-in completed. On success
    /// the parked image bytes become the live handle; the registry then
    /// drains the waiters.
    pub fn settle(&mut self, success: bool) {
        debug_assert_eq!(self.stage, Stage::Loading);
        let pending = self.pending.take();
        if success {
            self.handle = pending.and_then(|p| p.bytes);
            debug_assert!(self.handle.is_some(), "settled loaded without image bytes");
            self.stage = Stage::Loaded;
        } else {
            self.stage = Stage::Unloading;
        }
    }

    /// Register one more holder. Returns true when this reactivated a
    /// retained entry; the registry then re-acquires dependency refs.
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
                error!(pack = %self.descriptor.id, stage = %self.stage, "inc_ref on dead pack entry");
                false
            }
        }
    }

    /// Release one holder. Reaching zero parks the pack (retention on)
    /// or marks it dead; either way the registry cascades the release
    /// of dependency refs.
    pub fn dec_ref(&mut self, retain_enabled: bool, retain_seconds: f64) -> DecOutcome {
        if self.refcount == 0 {
            warn!(pack = %self.descriptor.id, "dec_ref on pack with zero refcount");
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

    /// Park a freshly-settled pack that nobody holds. An item-only
    /// request whose item never took a pack unit lands here: the pack
    /// sits in `Retained` (or goes straight to `Unloading` with
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

    /// Mark dependency refs as held (at load request or reactivation)
    pub fn set_holds_dep_refs(&mut self, held: bool) {
        self.holds_dep_refs = held;
    }

    /// Age the pack's own retain timer. Returns true on expiry.
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

    /// Age item retain timers; expired item ids are collected and
    /// evicted by the registry after the pass, never mid-iteration.
    pub fn tick_items(&mut self, dt: f64) -> Vec<ItemId> {
        let mut expired = Vec::new();
        for (id, item) in self.items.iter_mut() {
            if item.tick(dt) {
                expired.push(id.clone());
            }
        }
        expired
    }

    /// Hard teardown: dispose every item entry (bypassing refcounts),
    /// abort any in-flight fetch, drop the handle. A positive refcount
    /// at this point on a live pack is a leak worth a diagnostic; the
    /// unload proceeds regardless.
    pub fn unload(&mut self) {
        if self.stage == Stage::Unloaded {
            return;
        }
        for item in self.items.values_mut() {
            item.dispose();
        }
        self.items.clear();

        if self.refcount > 0 && !matches!(self.stage, Stage::Retained | Stage::Unloading) {
            warn!(
                pack = %self.descriptor.id,
                refcount = self.refcount,
                "unloading pack with outstanding references"
            );
        }

        if let Some(pending) = self.pending.take() {
            if let Some(task) = pending.task {
                task.abort();
            }
        }
        self.handle = None;
        self.stage = Stage::Unloaded;
    }
}
