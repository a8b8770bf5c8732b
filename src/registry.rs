//! The registry: the single-threaded heart of the cache
//!
//! All cache state lives here and is mutated only through `&mut self`
//! methods, so no entry is ever touched from two places at once. Fetch
//! work runs on spawned tasks; each task posts its completion as a
//! [`LoadEvent`] on an unbounded channel, and the owner thread applies
//! events either by draining the channel opportunistically ([`Registry::pump`])
//! or by blocking on it (the `_sync` entry points). Because both styles
//! consume the same channel and the same entries, a synchronous load
//! adopts an already in-flight asynchronous load instead of racing it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::{DoneCallback, FanIn, PackCache, PackWaiter, Stage};
use crate::cache::pack::PendingLoad;
use crate::config::Config;
use crate::error::{DepotError, DepotResult};
use crate::loader::{ItemBytes, PackBytes, PackLoader, Priority, Uri};
use crate::manifest::{ItemId, PackDescriptor, PackId, PackManifest};
use crate::telemetry::{LoadKind, LoadObserver};

/// A fetch completion marshaled back to the registry thread
enum LoadEvent {
    PackFetched {
        pack: PackId,
        result: DepotResult<Vec<u8>>,
    },
    ItemFetched {
        pack: PackId,
        item: ItemId,
        result: DepotResult<Vec<u8>>,
    },
}

/// Dependency-aware pack and item cache
pub struct Registry {
    packs: HashMap<PackId, PackCache>,
    manifest: PackManifest,
    loader: Arc<dyn PackLoader>,
    observer: Arc<dyn LoadObserver>,
    config: Config,
    runtime: Handle,
    events_tx: mpsc::UnboundedSender<LoadEvent>,
    events_rx: mpsc::UnboundedReceiver<LoadEvent>,
}

impl Registry {
    pub fn new(
        manifest: PackManifest,
        loader: Arc<dyn PackLoader>,
        observer: Arc<dyn LoadObserver>,
        config: Config,
        runtime: Handle,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            packs: HashMap::new(),
            manifest,
            loader,
            observer,
            config,
            runtime,
            events_tx,
            events_rx,
        }
    }

    pub fn manifest(&self) -> &PackManifest {
        &self.manifest
    }

    /// Where a pack image is fetched from under the current source config
    pub fn resolve_uri(&self, descriptor: &PackDescriptor) -> Uri {
        if self.config.source.is_remote() {
            let base = self.config.source.base_url.trim_end_matches('/');
            Uri::Http(format!("{base}/{}", descriptor.path))
        } else {
            Uri::File(self.config.source.root.join(&descriptor.path))
        }
    }

    // ---- public loading API ------------------------------------------------

    /// Request a pack. The caller is granted one reference immediately;
    /// `on_done` fires exactly once when the load settles (or right away
    /// on a cache hit), with the success flag.
    pub fn load_pack(
        &mut self,
        id: &str,
        priority: Priority,
        on_done: impl FnOnce(bool) + Send + 'static,
    ) -> DepotResult<()> {
        self.ensure_entry(id)?;
        let (stage, reactivated) = {
            let pack = self.pack_mut(id)?;
            let reactivated = pack.inc_ref();
            (pack.stage(), reactivated)
        };
        match stage {
            Stage::Loaded => {
                if reactivated {
                    self.acquire_dep_refs(id);
                }
                let path = self.pack_path(id);
                self.observer
                    .on_load_end(LoadKind::Pack, &path, "", true, true, None);
                on_done(true);
            }
            Stage::Loading => {
                self.pack_mut(id)?
                    .push_waiter(PackWaiter::External(Box::new(on_done)));
            }
            Stage::Created => {
                self.pack_mut(id)?
                    .push_waiter(PackWaiter::External(Box::new(on_done)));
                self.start_pack_load(id, priority);
            }
            Stage::Retained | Stage::Unloading | Stage::Unloaded => {
                // ensure_entry replaced dead entries and inc_ref left
                // Retained already
                error!(pack = id, stage = %stage, "unexpected stage on load request");
                on_done(false);
            }
        }
        Ok(())
    }

    /// Request a pack and block until it settles, draining completion
    /// events in the meantime. Returns whether the pack loaded.
    ///
    /// Must not be called from inside the async runtime.
    pub fn load_pack_sync(&mut self, id: &str, priority: Priority) -> DepotResult<bool> {
        self.ensure_entry(id)?;
        let (stage, reactivated) = {
            let pack = self.pack_mut(id)?;
            let reactivated = pack.inc_ref();
            (pack.stage(), reactivated)
        };
        match stage {
            Stage::Loaded => {
                if reactivated {
                    self.acquire_dep_refs(id);
                }
                let path = self.pack_path(id);
                self.observer
                    .on_load_end(LoadKind::Pack, &path, "", true, true, None);
                Ok(true)
            }
            Stage::Loading => Ok(self.wait_pack_settled(id)),
            Stage::Created => {
                self.start_pack_load(id, priority);
                Ok(self.wait_pack_settled(id))
            }
            _ => Ok(false),
        }
    }

    /// Request one item out of a pack. Loads the pack first if needed;
    /// `on_done` fires exactly once with the success flag. The caller is
    /// granted one item reference; the pack itself keeps one reference
    /// per live item entry, not per item request.
    pub fn load_item(
        &mut self,
        pack_id: &str,
        item: &str,
        priority: Priority,
        on_done: impl FnOnce(bool) + Send + 'static,
    ) -> DepotResult<()> {
        let descriptor = self.manifest.descriptor(pack_id)?;
        if !descriptor.has_item(item) {
            return Err(DepotError::ItemNotFound {
                pack: pack_id.to_string(),
                item: item.to_string(),
            });
        }
        self.ensure_entry(pack_id)?;
        match self.pack_mut(pack_id)?.stage() {
            Stage::Loaded | Stage::Retained => {
                self.start_item_request(pack_id, item, Box::new(on_done));
            }
            Stage::Loading => {
                self.pack_mut(pack_id)?.push_waiter(PackWaiter::ItemRequest {
                    item: item.to_string(),
                    done: Box::new(on_done),
                });
            }
            Stage::Created => {
                self.pack_mut(pack_id)?.push_waiter(PackWaiter::ItemRequest {
                    item: item.to_string(),
                    done: Box::new(on_done),
                });
                self.start_pack_load(pack_id, priority);
            }
            stage => {
                error!(pack = pack_id, %stage, "unexpected stage on item request");
                on_done(false);
            }
        }
        Ok(())
    }

    /// Request one item and block until its payload is ready.
    ///
    /// Must not be called from inside the async runtime.
    pub fn load_item_sync(
        &mut self,
        pack_id: &str,
        item: &str,
        priority: Priority,
    ) -> DepotResult<ItemBytes> {
        let descriptor = self.manifest.descriptor(pack_id)?;
        if !descriptor.has_item(item) {
            return Err(DepotError::ItemNotFound {
                pack: pack_id.to_string(),
                item: item.to_string(),
            });
        }
        // Hold the pack for the duration of the request; the item's own
        // pack unit takes over before this temporary ref is dropped.
        if !self.load_pack_sync(pack_id, priority)? {
            self.release_pack(pack_id);
            return Err(DepotError::PackLoadFailed {
                pack: pack_id.to_string(),
                reason: "pack image load failed".to_string(),
            });
        }
        let settled = Arc::new(std::sync::Mutex::new(None::<bool>));
        let flag = Arc::clone(&settled);
        self.start_item_request(
            pack_id,
            item,
            Box::new(move |ok| {
                *flag.lock().unwrap_or_else(|e| e.into_inner()) = Some(ok);
            }),
        );
        let ok = loop {
            if let Some(ok) = *settled.lock().unwrap_or_else(|e| e.into_inner()) {
                break ok;
            }
            match self.events_rx.blocking_recv() {
                Some(event) => self.apply(event),
                None => break false,
            }
        };
        self.release_pack(pack_id);
        if !ok {
            return Err(DepotError::ItemLoadFailed {
                pack: pack_id.to_string(),
                item: item.to_string(),
                reason: "item materialization failed".to_string(),
            });
        }
        self.item_payload(pack_id, item)
            .ok_or_else(|| DepotError::Internal("settled item has no payload".to_string()))
    }

    /// Take one more reference on an already-requested pack
    pub fn acquire_pack(&mut self, id: &str) -> DepotResult<()> {
        let pack = self.pack_mut(id)?;
        if pack.stage().is_dead() {
            return Err(DepotError::PackLoadFailed {
                pack: id.to_string(),
                reason: "pack entry is unloading".to_string(),
            });
        }
        let reactivated = pack.inc_ref();
        if reactivated {
            self.acquire_dep_refs(id);
        }
        Ok(())
    }

    /// Drop one pack reference. Reaching zero parks the pack (or marks
    /// it dead with retention off) and cascades the release through its
    /// dependencies.
    pub fn release_pack(&mut self, id: &str) {
        let Some(pack) = self.packs.get_mut(id) else {
            warn!(pack = id, "release of unknown pack");
            return;
        };
        let outcome = pack.dec_ref(self.config.retain.enabled, self.config.retain.pack_seconds);
        if outcome.reached_zero() {
            self.release_dep_refs(id);
        }
    }

    /// Drop one item reference. Reaching zero parks the item entry; the
    /// pack's per-item unit is released only when the entry is evicted.
    /// A zero-ref entry still materializing is left to settle first, so
    /// coalesced waiters are never dropped mid-flight.
    pub fn release_item(&mut self, pack_id: &str, item: &str) {
        let Some(pack) = self.packs.get_mut(pack_id) else {
            warn!(pack = pack_id, item, "release of item in unknown pack");
            return;
        };
        let Some(entry) = pack.item_mut(item) else {
            warn!(pack = pack_id, item, "release of unknown item");
            return;
        };
        let outcome = entry.dec_ref(self.config.retain.enabled, self.config.retain.item_seconds);
        if outcome == crate::cache::DecOutcome::MarkedDead && entry.stage().is_dead() {
            self.evict_item(pack_id, item);
        }
    }

    // ---- event pumping and time --------------------------------------------

    /// Apply every completion event already delivered, without blocking
    pub fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
    }

    /// Block on the event channel until the pack settles. Returns the
    /// success flag; a vanished or dead entry counts as failure.
    pub fn wait_pack_settled(&mut self, id: &str) -> bool {
        loop {
            match self.packs.get(id).map(PackCache::stage) {
                Some(Stage::Loaded | Stage::Retained) => return true,
                Some(Stage::Unloading | Stage::Unloaded) | None => return false,
                Some(Stage::Created | Stage::Loading) => {}
            }
            match self.events_rx.blocking_recv() {
                Some(event) => self.apply(event),
                None => return false,
            }
        }
    }

    /// Block on the event channel until the item entry settles. An item
    /// request queued behind a still-loading pack has no entry yet, so
    /// a missing entry only counts as failure once the pack itself has
    /// settled.
    pub fn wait_item_settled(&mut self, pack_id: &str, item: &str) -> bool {
        loop {
            let Some(pack) = self.packs.get(pack_id) else {
                return false;
            };
            match pack.item(item).map(|i| i.stage()) {
                Some(Stage::Loaded | Stage::Retained) => return true,
                Some(Stage::Unloading | Stage::Unloaded) => return false,
                Some(Stage::Created | Stage::Loading) => {}
                None if matches!(pack.stage(), Stage::Created | Stage::Loading) => {}
                None => return false,
            }
            match self.events_rx.blocking_recv() {
                Some(event) => self.apply(event),
                None => return false,
            }
        }
    }

    /// Advance retain timers by `dt` seconds and evict what expired.
    /// Timers only move here; wall-clock time never evicts on its own.
    pub fn tick(&mut self, dt: f64) {
        let ids: Vec<PackId> = self.packs.keys().cloned().collect();
        let mut expired_items: Vec<(PackId, ItemId)> = Vec::new();
        for id in &ids {
            let Some(pack) = self.packs.get_mut(id) else {
                continue;
            };
            for item in pack.tick_items(dt) {
                expired_items.push((id.clone(), item));
            }
            pack.tick(dt);
        }
        for (pack, item) in expired_items {
            self.evict_item(&pack, &item);
        }
        self.sweep();
    }

    /// Tear down every entry regardless of outstanding references
    pub fn shutdown(&mut self) {
        let ids: Vec<PackId> = self.packs.keys().cloned().collect();
        for id in ids {
            self.evict_pack(&id);
        }
    }

    // ---- accessors ---------------------------------------------------------

    pub fn pack_stage(&self, id: &str) -> Option<Stage> {
        self.packs.get(id).map(PackCache::stage)
    }

    pub fn pack_refcount(&self, id: &str) -> Option<u32> {
        self.packs.get(id).map(PackCache::refcount)
    }

    pub fn pack_handle(&self, id: &str) -> Option<PackBytes> {
        self.packs.get(id).and_then(PackCache::handle)
    }

    pub fn item_stage(&self, pack_id: &str, item: &str) -> Option<Stage> {
        self.packs
            .get(pack_id)
            .and_then(|p| p.item(item))
            .map(|i| i.stage())
    }

    pub fn item_refcount(&self, pack_id: &str, item: &str) -> Option<u32> {
        self.packs
            .get(pack_id)
            .and_then(|p| p.item(item))
            .map(|i| i.refcount())
    }

    pub fn item_payload(&self, pack_id: &str, item: &str) -> Option<ItemBytes> {
        self.packs
            .get(pack_id)
            .and_then(|p| p.item(item))
            .and_then(|i| i.payload())
    }

    pub fn live_pack_count(&self) -> usize {
        self.packs.len()
    }

    // ---- internals ---------------------------------------------------------

    /// Make sure a usable entry exists for `id`. A dead leftover entry
    /// awaiting the sweep is evicted first so the request gets a fresh
    /// one; settled entries are never reused across unload.
    fn ensure_entry(&mut self, id: &str) -> DepotResult<()> {
        if let Some(pack) = self.packs.get(id) {
            if !pack.stage().is_dead() {
                return Ok(());
            }
            self.evict_pack(id);
        }
        let descriptor = self.manifest.descriptor(id)?;
        self.packs.insert(id.to_string(), PackCache::new(descriptor));
        Ok(())
    }

    fn pack_mut(&mut self, id: &str) -> DepotResult<&mut PackCache> {
        self.packs
            .get_mut(id)
            .ok_or_else(|| DepotError::PackNotFound(id.to_string()))
    }

    fn pack_path(&self, id: &str) -> String {
        self.packs
            .get(id)
            .map(|p| p.descriptor().path.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Dependency ids for a pack, with self-loops dropped. The manifest
    /// validator rejects those up front; this is the runtime backstop.
    fn dep_ids(descriptor: &PackDescriptor) -> Vec<PackId> {
        descriptor
            .dependencies
            .iter()
            .filter(|dep| {
                if **dep == descriptor.id {
                    error!(pack = %descriptor.id, "skipping self-dependency");
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect()
    }

    /// Begin the fan-in load for a `Created` pack: one slot per
    /// dependency plus one for the pack's own image fetch. The group
    /// fires exactly once, after every slot reported, success or not.
    /// Dependencies are pinned as they are requested; the pins are
    /// released when the load fails or the refcount reaches zero.
    fn start_pack_load(&mut self, id: &str, priority: Priority) {
        let Some(pack) = self.packs.get_mut(id) else {
            return;
        };
        let descriptor = Arc::clone(pack.descriptor());
        let deps = Self::dep_ids(&descriptor);
        let own_slot = deps.len();
        pack.begin_load(PendingLoad {
            group: FanIn::new(deps.len() + 1),
            own_slot,
            bytes: None,
            error: None,
            task: None,
        });
        pack.set_holds_dep_refs(true);

        for (slot, dep) in deps.iter().enumerate() {
            self.request_dependency(dep, id, slot, priority);
        }

        let uri = self.resolve_uri(&descriptor);
        self.observer
            .on_load_begin(LoadKind::Pack, &descriptor.path, "");
        debug!(pack = id, %uri, strategy = self.loader.strategy_name(), "pack fetch start");

        let loader = Arc::clone(&self.loader);
        let tx = self.events_tx.clone();
        let pack_id = id.to_string();
        let task = self.runtime.spawn(async move {
            let result = loader.fetch_pack(&descriptor, &uri, priority).await;
            let _ = tx.send(LoadEvent::PackFetched {
                pack: pack_id,
                result,
            });
        });
        if let Some(pending) = self.packs.get_mut(id).and_then(PackCache::pending_mut) {
            pending.task = Some(task);
        }
    }

    /// Hook a dependency into a dependent's fan-in group. The dependent
    /// pins one reference on the dependency right here, for its whole
    /// lifetime, so the dependency can never be swept out from under a
    /// dependent that has not settled yet. A dependency that is already
    /// materialized signals its slot right away.
    fn request_dependency(&mut self, dep_id: &str, dependent: &str, slot: usize, priority: Priority) {
        if let Err(err) = self.ensure_entry(dep_id) {
            error!(pack = dependent, dep = dep_id, error = %err, "unresolvable dependency");
            self.signal_dependency(dependent, slot, false);
            return;
        }
        let reactivated = match self.packs.get_mut(dep_id) {
            Some(pack) => pack.inc_ref(),
            None => return,
        };
        if reactivated {
            self.acquire_dep_refs(dep_id);
        }
        let stage = match self.packs.get(dep_id) {
            Some(pack) => pack.stage(),
            None => return,
        };
        match stage {
            Stage::Loaded | Stage::Retained => {
                self.signal_dependency(dependent, slot, true);
            }
            Stage::Loading => {
                if let Ok(pack) = self.pack_mut(dep_id) {
                    pack.push_waiter(PackWaiter::Dependent {
                        pack: dependent.to_string(),
                        slot,
                    });
                }
            }
            Stage::Created => {
                if let Ok(pack) = self.pack_mut(dep_id) {
                    pack.push_waiter(PackWaiter::Dependent {
                        pack: dependent.to_string(),
                        slot,
                    });
                }
                self.start_pack_load(dep_id, priority);
            }
            Stage::Unloading | Stage::Unloaded => {
                // ensure_entry just replaced dead entries
                self.signal_dependency(dependent, slot, false);
            }
        }
    }

    /// Report one slot into a pack's fan-in group; settles the pack when
    /// the group completes.
    fn signal_dependency(&mut self, id: &str, slot: usize, success: bool) {
        let complete = {
            let Some(pack) = self.packs.get_mut(id) else {
                return;
            };
            let Some(pending) = pack.pending_mut() else {
                return;
            };
            if !success && pending.error.is_none() {
                pending.error = Some("dependency load failed".to_string());
            }
            pending.group.signal(slot, success)
        };
        if let Some(all_ok) = complete {
            self.settle_pack(id, all_ok);
        }
    }

    fn on_pack_fetched(&mut self, id: &str, result: DepotResult<Vec<u8>>) {
        let (own_slot, ok) = {
            let Some(pack) = self.packs.get_mut(id) else {
                debug!(pack = id, "dropping fetch completion for evicted pack");
                return;
            };
            if pack.stage() != Stage::Loading {
                debug!(pack = id, stage = %pack.stage(), "dropping stale fetch completion");
                return;
            }
            let Some(pending) = pack.pending_mut() else {
                return;
            };
            match result {
                Ok(bytes) => {
                    pending.bytes = Some(PackBytes::from(bytes.into_boxed_slice()));
                    (pending.own_slot, true)
                }
                Err(err) => {
                    warn!(pack = id, error = %err, "pack image fetch failed");
                    pending.error = Some(err.to_string());
                    (pending.own_slot, false)
                }
            }
        };
        self.signal_dependency(id, own_slot, ok);
    }

    /// Settle a pack whose fan-in group completed: promote it to loaded
    /// or mark it dead (giving back its dependency pins), drain the
    /// waiter list exactly once, then park it if nobody ended up
    /// holding a reference.
    fn settle_pack(&mut self, id: &str, success: bool) {
        let (path, error) = {
            let Some(pack) = self.packs.get_mut(id) else {
                return;
            };
            let error = pack.pending_mut().and_then(|p| p.error.take());
            pack.settle(success);
            (pack.descriptor().path.clone(), error)
        };

        if success {
            info!(pack = id, "pack loaded");
            // Every ref may have been dropped and re-taken mid-flight,
            // which released the request-time pins; re-pin for the
            // holders that came back.
            let repin = self
                .packs
                .get(id)
                .is_some_and(|p| p.refcount() > 0 && !p.holds_dep_refs());
            if repin {
                self.acquire_dep_refs(id);
            }
        } else {
            warn!(
                pack = id,
                error = error.as_deref().unwrap_or("unknown"),
                "pack load failed"
            );
            self.release_dep_refs(id);
        }
        self.observer
            .on_load_end(LoadKind::Pack, &path, "", success, false, error.as_deref());

        let waiters = self
            .packs
            .get_mut(id)
            .map(PackCache::take_waiters)
            .unwrap_or_default();
        for waiter in waiters {
            match waiter {
                PackWaiter::External(done) => done(success),
                PackWaiter::Dependent { pack, slot } => {
                    self.signal_dependency(&pack, slot, success);
                }
                PackWaiter::ItemRequest { item, done } => {
                    if success {
                        self.start_item_request(id, &item, done);
                    } else {
                        done(false);
                    }
                }
            }
        }

        // An item-only load whose item never took a pack unit settles
        // with nobody holding it; park it under the retain policy.
        if success {
            if let Some(pack) = self.packs.get_mut(id) {
                pack.park_if_unreferenced(
                    self.config.retain.enabled,
                    self.config.retain.pack_seconds,
                );
            }
        }
    }

    /// Re-pin one reference on each dependency of a pack reactivating
    /// out of retention, recursing where a dependency reactivates in
    /// turn (its own dependency refs were released at zero).
    fn acquire_dep_refs(&mut self, id: &str) {
        let descriptor = match self.packs.get(id) {
            Some(pack) => Arc::clone(pack.descriptor()),
            None => return,
        };
        if self.packs.get(id).is_some_and(PackCache::holds_dep_refs) {
            return;
        }
        if let Some(pack) = self.packs.get_mut(id) {
            pack.set_holds_dep_refs(true);
        }
        for dep in Self::dep_ids(&descriptor) {
            let reactivated = match self.packs.get_mut(&dep) {
                Some(entry) => entry.inc_ref(),
                None => {
                    warn!(pack = id, dep = %dep, "dependency missing while acquiring refs");
                    continue;
                }
            };
            if reactivated {
                self.acquire_dep_refs(&dep);
            }
        }
    }

    /// Release the dependency refs a pack holds, cascading through
    /// dependencies that reach zero themselves.
    fn release_dep_refs(&mut self, id: &str) {
        let descriptor = match self.packs.get(id) {
            Some(pack) if pack.holds_dep_refs() => Arc::clone(pack.descriptor()),
            _ => return,
        };
        if let Some(pack) = self.packs.get_mut(id) {
            pack.set_holds_dep_refs(false);
        }
        for dep in Self::dep_ids(&descriptor) {
            let outcome = match self.packs.get_mut(&dep) {
                Some(entry) => {
                    entry.dec_ref(self.config.retain.enabled, self.config.retain.pack_seconds)
                }
                None => {
                    debug!(pack = id, dep = %dep, "dependency already evicted");
                    continue;
                }
            };
            if outcome.reached_zero() {
                self.release_dep_refs(&dep);
            }
        }
    }

    /// Request an item from a materialized pack. Creates the item entry
    /// (charging the pack one unit per live entry), grants the caller an
    /// item reference, and coalesces into an in-flight materialization
    /// when one exists.
    fn start_item_request(&mut self, pack_id: &str, item: &str, done: DoneCallback) {
        let (handle, descriptor) = match self.packs.get(pack_id) {
            Some(pack) => match pack.handle() {
                Some(handle) => (handle, Arc::clone(pack.descriptor())),
                None => {
                    error!(pack = pack_id, item, "item request against unmaterialized pack");
                    done(false);
                    return;
                }
            },
            None => {
                error!(pack = pack_id, item, "item request against evicted pack");
                done(false);
                return;
            }
        };

        // A dead leftover entry is evicted so the request starts fresh
        let leftover = self
            .packs
            .get(pack_id)
            .and_then(|p| p.item(item))
            .is_some_and(|i| i.stage().is_dead());
        if leftover {
            self.evict_item(pack_id, item);
        }

        let created = !self
            .packs
            .get(pack_id)
            .is_some_and(|p| p.has_item_entry(item));
        if created {
            if let Some(pack) = self.packs.get_mut(pack_id) {
                pack.insert_item(item.to_string());
                // the pack's one unit for this live item entry
                let reactivated = pack.inc_ref();
                if reactivated {
                    self.acquire_dep_refs(pack_id);
                }
            }
        }

        let Some(entry) = self.packs.get_mut(pack_id).and_then(|p| p.item_mut(item)) else {
            done(false);
            return;
        };
        entry.inc_ref();
        match entry.stage() {
            Stage::Loaded => {
                self.observer.on_load_end(
                    LoadKind::Item,
                    item,
                    &descriptor.path,
                    true,
                    true,
                    None,
                );
                done(true);
            }
            Stage::Loading => {
                entry.push_waiter(done);
            }
            Stage::Created => {
                entry.begin_load();
                entry.push_waiter(done);
                self.observer
                    .on_load_begin(LoadKind::Item, item, &descriptor.path);
                let loader = Arc::clone(&self.loader);
                let tx = self.events_tx.clone();
                let pack_name = pack_id.to_string();
                let item_name = item.to_string();
                self.runtime.spawn(async move {
                    let result = loader
                        .materialize_item(&descriptor, &handle, &item_name)
                        .await;
                    let _ = tx.send(LoadEvent::ItemFetched {
                        pack: pack_name,
                        item: item_name,
                        result,
                    });
                });
            }
            stage => {
                error!(pack = pack_id, item, %stage, "unexpected item stage");
                done(false);
            }
        }
    }

    fn on_item_fetched(&mut self, pack_id: &str, item: &str, result: DepotResult<Vec<u8>>) {
        let retain = self.config.retain.clone();
        let (ok, waiters, path, error) = {
            let Some(pack) = self.packs.get_mut(pack_id) else {
                debug!(pack = pack_id, item, "dropping item completion for evicted pack");
                return;
            };
            let path = pack.descriptor().path.clone();
            let Some(entry) = pack.item_mut(item) else {
                debug!(pack = pack_id, item, "dropping item completion for evicted item");
                return;
            };
            if entry.stage() != Stage::Loading {
                return;
            }
            let (payload, error) = match result {
                Ok(bytes) => (Some(ItemBytes::from(bytes.into_boxed_slice())), None),
                Err(err) => {
                    warn!(pack = pack_id, item, error = %err, "item materialization failed");
                    (None, Some(err.to_string()))
                }
            };
            let ok = entry.settle(payload);
            let waiters = entry.take_waiters();
            // every holder released mid-flight; park under the policy
            entry.park_if_unreferenced(retain.enabled, retain.item_seconds);
            (ok, waiters, path, error)
        };
        self.observer
            .on_load_end(LoadKind::Item, item, &path, ok, false, error.as_deref());
        for done in waiters {
            done(ok);
        }
        // A failed entry stays dead until the sweep or a re-request
        // evicts it; its pack unit is released at eviction.
    }

    /// Remove one item entry and give back the pack unit it was holding
    fn evict_item(&mut self, pack_id: &str, item: &str) {
        let removed = match self.packs.get_mut(pack_id) {
            Some(pack) => match pack.remove_item(item) {
                Some(mut entry) => {
                    entry.dispose();
                    true
                }
                None => false,
            },
            None => false,
        };
        if !removed {
            return;
        }
        debug!(pack = pack_id, item, "item evicted");
        let outcome = match self.packs.get_mut(pack_id) {
            Some(pack) => {
                pack.dec_ref(self.config.retain.enabled, self.config.retain.pack_seconds)
            }
            None => return,
        };
        if outcome.reached_zero() {
            self.release_dep_refs(pack_id);
        }
    }

    /// Remove every entry marked `Unloading`. Dead item entries go
    /// first: evicting one gives its pack unit back, which may mark the
    /// owning pack dead in time for the pack pass.
    fn sweep(&mut self) {
        let dead_items: Vec<(PackId, ItemId)> = self
            .packs
            .iter()
            .flat_map(|(id, pack)| {
                pack.items()
                    .filter(|item| item.stage() == Stage::Unloading)
                    .map(move |item| (id.clone(), item.id().to_string()))
            })
            .collect();
        for (pack, item) in dead_items {
            self.evict_item(&pack, &item);
        }

        let dead: Vec<PackId> = self
            .packs
            .iter()
            .filter(|(_, pack)| pack.stage() == Stage::Unloading)
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead {
            self.evict_pack(&id);
        }
    }

    /// Hard-remove a pack entry: release any dependency refs it still
    /// holds, fail whatever was still waiting on it, then tear the
    /// entry down. Waiters fire exactly once even on teardown.
    fn evict_pack(&mut self, id: &str) {
        self.release_dep_refs(id);

        let waiters = self
            .packs
            .get_mut(id)
            .map(PackCache::take_waiters)
            .unwrap_or_default();
        for waiter in waiters {
            match waiter {
                PackWaiter::External(done) => done(false),
                PackWaiter::Dependent { pack, slot } => {
                    self.signal_dependency(&pack, slot, false);
                }
                PackWaiter::ItemRequest { done, .. } => done(false),
            }
        }
        let item_ids: Vec<ItemId> = self
            .packs
            .get(id)
            .map(|p| p.items().map(|i| i.id().to_string()).collect())
            .unwrap_or_default();
        for item in item_ids {
            let drained = self
                .packs
                .get_mut(id)
                .and_then(|p| p.item_mut(&item))
                .map(|i| i.take_waiters())
                .unwrap_or_default();
            for done in drained {
                done(false);
            }
        }

        if let Some(mut pack) = self.packs.remove(id) {
            pack.unload();
            debug!(pack = id, "pack evicted");
        }
    }

    fn apply(&mut self, event: LoadEvent) {
        match event {
            LoadEvent::PackFetched { pack, result } => self.on_pack_fetched(&pack, result),
            LoadEvent::ItemFetched { pack, item, result } => {
                self.on_item_fetched(&pack, &item, result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::image::encode_pack;
    use crate::telemetry::NullObserver;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    /// Gated fetches: each fetch parks on a oneshot until the test
    /// completes it, unless the pack id has an auto result registered.
    #[derive(Default)]
    struct StubState {
        pending: Vec<(String, oneshot::Sender<DepotResult<Vec<u8>>>)>,
        fetches: HashMap<String, usize>,
        auto: HashMap<String, Vec<u8>>,
    }

    struct StubLoader {
        state: Arc<Mutex<StubState>>,
        materialized: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PackLoader for StubLoader {
        async fn fetch_pack(
            &self,
            descriptor: &PackDescriptor,
            _uri: &Uri,
            _priority: Priority,
        ) -> DepotResult<Vec<u8>> {
            let rx = {
                let mut state = self.state.lock().unwrap();
                *state.fetches.entry(descriptor.id.clone()).or_default() += 1;
                if let Some(bytes) = state.auto.get(&descriptor.id) {
                    return Ok(bytes.clone());
                }
                let (tx, rx) = oneshot::channel();
                state.pending.push((descriptor.id.clone(), tx));
                rx
            };
            rx.await
                .unwrap_or_else(|_| Err(DepotError::Internal("stub sender dropped".to_string())))
        }

        async fn materialize_item(
            &self,
            descriptor: &PackDescriptor,
            pack: &PackBytes,
            item: &str,
        ) -> DepotResult<Vec<u8>> {
            self.materialized.fetch_add(1, Ordering::SeqCst);
            crate::loader::image::extract_item(pack, &descriptor.id, item)
        }

        fn strategy_name(&self) -> &'static str {
            "stub"
        }
    }

    struct Harness {
        registry: Registry,
        state: Arc<Mutex<StubState>>,
        materialized: Arc<AtomicUsize>,
        _runtime: tokio::runtime::Runtime,
    }

    impl Harness {
        fn new(manifest_json: &str, config: Config) -> Self {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let state = Arc::new(Mutex::new(StubState::default()));
            let materialized = Arc::new(AtomicUsize::new(0));
            let loader = Arc::new(StubLoader {
                state: Arc::clone(&state),
                materialized: Arc::clone(&materialized),
            });
            let manifest = PackManifest::parse(manifest_json, Path::new("manifest.json")).unwrap();
            let registry = Registry::new(
                manifest,
                loader,
                Arc::new(NullObserver),
                config,
                runtime.handle().clone(),
            );
            Self {
                registry,
                state,
                materialized,
                _runtime: runtime,
            }
        }

        fn auto(self, id: &str, bytes: Vec<u8>) -> Self {
            self.state
                .lock()
                .unwrap()
                .auto
                .insert(id.to_string(), bytes);
            self
        }

        fn complete(&self, id: &str, result: DepotResult<Vec<u8>>) {
            complete_fetch(&self.state, id, result);
        }

        fn fetches(&self, id: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .fetches
                .get(id)
                .copied()
                .unwrap_or(0)
        }
    }

    /// Release the gated fetch for `id`, spinning until the spawned
    /// fetch task has registered itself.
    fn complete_fetch(state: &Arc<Mutex<StubState>>, id: &str, result: DepotResult<Vec<u8>>) {
        let mut result = Some(result);
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            {
                let mut st = state.lock().unwrap();
                if let Some(pos) = st.pending.iter().position(|(pack, _)| pack == id) {
                    let (_, tx) = st.pending.remove(pos);
                    let _ = tx.send(result.take().unwrap());
                    return;
                }
            }
            assert!(Instant::now() < deadline, "no pending fetch for {id}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn record(into: &Arc<Mutex<Vec<bool>>>) -> impl FnOnce(bool) + Send + 'static {
        let into = Arc::clone(into);
        move |ok| into.lock().unwrap().push(ok)
    }

    fn single_pack() -> &'static str {
        r#"{"packs": {"p": {"path": "p.pack", "items": ["a", "b"]}}}"#
    }

    fn chain() -> &'static str {
        r#"{"packs": {
            "p": {"path": "p.pack", "items": ["a", "b"], "dependencies": ["q"]},
            "q": {"path": "q.pack"}
        }}"#
    }

    fn diamond_deps() -> &'static str {
        r#"{"packs": {
            "p": {"path": "p.pack", "dependencies": ["q", "r"]},
            "q": {"path": "q.pack"},
            "r": {"path": "r.pack"}
        }}"#
    }

    fn image() -> Vec<u8> {
        encode_pack(&[
            ("a".to_string(), b"alpha".to_vec()),
            ("b".to_string(), b"beta".to_vec()),
        ])
    }

    #[test]
    fn concurrent_requests_share_one_fetch() {
        let mut h = Harness::new(single_pack(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            h.registry
                .load_pack("p", Priority::Normal, record(&results))
                .unwrap();
        }
        h.complete("p", Ok(image()));
        assert!(h.registry.wait_pack_settled("p"));

        assert_eq!(h.fetches("p"), 1);
        assert_eq!(*results.lock().unwrap(), vec![true, true, true]);
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Loaded));
        assert_eq!(h.registry.pack_refcount("p"), Some(3));
    }

    #[test]
    fn cached_hit_completes_without_fetch() {
        let mut h = Harness::new(single_pack(), Config::default())
            .auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();
        // callback fires inline, no pump needed
        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(h.fetches("p"), 1);
        assert_eq!(h.registry.pack_refcount("p"), Some(2));
    }

    #[test]
    fn dependency_loads_with_dependent_and_holds_ref() {
        let mut h = Harness::new(chain(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();

        h.complete("q", Ok(image()));
        h.complete("p", Ok(image()));
        assert!(h.registry.wait_pack_settled("p"));

        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Loaded));
        assert_eq!(h.registry.pack_stage("q"), Some(Stage::Loaded));
        assert_eq!(h.registry.pack_refcount("p"), Some(1));
        // p's dependency ref keeps q alive
        assert_eq!(h.registry.pack_refcount("q"), Some(1));
    }

    #[test]
    fn release_cascades_through_dependencies() {
        let mut h = Harness::new(chain(), Config::default());
        h.registry
            .load_pack("p", Priority::Normal, |_| {})
            .unwrap();
        h.complete("q", Ok(image()));
        h.complete("p", Ok(image()));
        assert!(h.registry.wait_pack_settled("p"));

        h.registry.release_pack("p");
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));
        assert_eq!(h.registry.pack_refcount("p"), Some(0));
        // the cascade released p's ref on q too
        assert_eq!(h.registry.pack_stage("q"), Some(Stage::Retained));
        assert_eq!(h.registry.pack_refcount("q"), Some(0));
    }

    #[test]
    fn reacquire_cancels_timed_eviction() {
        let mut h = Harness::new(single_pack(), Config::default()).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());
        h.registry.release_pack("p");
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));

        h.registry.tick(15.0);
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));

        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();
        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Loaded));
        assert_eq!(h.fetches("p"), 1); // no reload

        // a full budget runs again after the next release
        h.registry.release_pack("p");
        h.registry.tick(29.9);
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));
        h.registry.tick(0.2);
        assert_eq!(h.registry.pack_stage("p"), None);
    }

    #[test]
    fn retention_disabled_evicts_at_zero() {
        let mut config = Config::default();
        config.retain.enabled = false;
        let mut h = Harness::new(single_pack(), config).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        h.registry.release_pack("p");
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Unloading));
        h.registry.tick(0.0);
        assert_eq!(h.registry.pack_stage("p"), None);
    }

    #[test]
    fn dependency_failure_fails_dependent() {
        let mut h = Harness::new(diamond_deps(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();

        h.complete("q", Err(DepotError::network("http://x/q.pack", "reset")));
        h.complete("r", Ok(image()));
        h.complete("p", Ok(image()));
        assert!(!h.registry.wait_pack_settled("p"));

        assert_eq!(*results.lock().unwrap(), vec![false]);
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Unloading));
        assert_eq!(h.registry.pack_stage("q"), Some(Stage::Unloading));
        // the dependent's failure released its pin on the healthy sibling
        assert_eq!(h.registry.pack_stage("r"), Some(Stage::Retained));
        assert_eq!(h.registry.pack_refcount("r"), Some(0));
    }

    #[test]
    fn retention_disabled_dependency_survives_until_release() {
        let mut config = Config::default();
        config.retain.enabled = false;
        let mut h = Harness::new(chain(), config)
            .auto("p", image())
            .auto("q", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        // the dependent's pin keeps q alive even with no retention
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Loaded));
        assert_eq!(h.registry.pack_stage("q"), Some(Stage::Loaded));
        assert_eq!(h.registry.pack_refcount("q"), Some(1));
        h.registry.tick(0.0);
        assert_eq!(h.registry.pack_stage("q"), Some(Stage::Loaded));

        h.registry.release_pack("p");
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Unloading));
        assert_eq!(h.registry.pack_stage("q"), Some(Stage::Unloading));
        h.registry.tick(0.0);
        assert_eq!(h.registry.live_pack_count(), 0);
    }

    #[test]
    fn fan_in_waits_for_every_slot() {
        let mut h = Harness::new(chain(), Config::default());
        h.registry
            .load_pack("p", Priority::Normal, |_| {})
            .unwrap();

        // own image done, dependency still outstanding
        h.complete("p", Ok(image()));
        std::thread::sleep(Duration::from_millis(20));
        h.registry.pump();
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Loading));

        h.complete("q", Ok(image()));
        assert!(h.registry.wait_pack_settled("p"));
    }

    #[test]
    fn failed_pack_rerequest_fetches_fresh() {
        let mut h = Harness::new(single_pack(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();
        h.complete("p", Err(DepotError::network("http://x/p.pack", "reset")));
        assert!(!h.registry.wait_pack_settled("p"));
        assert_eq!(*results.lock().unwrap(), vec![false]);

        // a new request replaces the dead entry and loads again
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();
        h.complete("p", Ok(image()));
        assert!(h.registry.wait_pack_settled("p"));
        assert_eq!(*results.lock().unwrap(), vec![false, true]);
        assert_eq!(h.fetches("p"), 2);
    }

    #[test]
    fn sync_load_adopts_inflight_async_load() {
        let mut h = Harness::new(single_pack(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();

        let state = Arc::clone(&h.state);
        let completer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            complete_fetch(&state, "p", Ok(image()));
        });

        // blocks on the same event channel, does not start a second fetch
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());
        completer.join().unwrap();

        assert_eq!(h.fetches("p"), 1);
        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(h.registry.pack_refcount("p"), Some(2));
    }

    #[test]
    fn item_load_materializes_payload() {
        let mut h = Harness::new(single_pack(), Config::default()).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_item("p", "a", Priority::Normal, record(&results))
            .unwrap();
        assert!(h.registry.wait_item_settled("p", "a"));

        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(&h.registry.item_payload("p", "a").unwrap()[..], b"alpha");
        assert_eq!(h.registry.item_refcount("p", "a"), Some(1));
        // caller's pack ref plus one unit for the live item entry
        assert_eq!(h.registry.pack_refcount("p"), Some(2));
    }

    #[test]
    fn item_requests_coalesce() {
        let mut h = Harness::new(single_pack(), Config::default()).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_item("p", "a", Priority::Normal, record(&results))
            .unwrap();
        h.registry
            .load_item("p", "a", Priority::Normal, record(&results))
            .unwrap();
        assert!(h.registry.wait_item_settled("p", "a"));

        assert_eq!(*results.lock().unwrap(), vec![true, true]);
        assert_eq!(h.materialized.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.item_refcount("p", "a"), Some(2));
    }

    #[test]
    fn item_eviction_releases_pack_unit() {
        let mut h = Harness::new(single_pack(), Config::default()).auto("p", image());
        let payload = h
            .registry
            .load_item_sync("p", "a", Priority::Normal)
            .unwrap();
        assert_eq!(&payload[..], b"alpha");
        // only the item's unit holds the pack
        assert_eq!(h.registry.pack_refcount("p"), Some(1));

        h.registry.release_item("p", "a");
        assert_eq!(h.registry.item_stage("p", "a"), Some(Stage::Retained));

        h.registry.tick(10.0);
        assert_eq!(h.registry.item_stage("p", "a"), None);
        // the unit came back; the pack parked in turn
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));
        h.registry.tick(30.0);
        assert_eq!(h.registry.pack_stage("p"), None);
    }

    #[test]
    fn item_request_queues_behind_pack_load() {
        let mut h = Harness::new(single_pack(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_item("p", "a", Priority::Normal, record(&results))
            .unwrap();
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Loading));

        h.complete("p", Ok(image()));
        assert!(h.registry.wait_item_settled("p", "a"));
        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(&h.registry.item_payload("p", "a").unwrap()[..], b"alpha");
    }

    #[test]
    fn item_request_fails_with_pack_load() {
        let mut h = Harness::new(single_pack(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_item("p", "a", Priority::Normal, record(&results))
            .unwrap();

        h.complete("p", Err(DepotError::network("http://x/p.pack", "reset")));
        assert!(!h.registry.wait_pack_settled("p"));
        assert_eq!(*results.lock().unwrap(), vec![false]);
        assert_eq!(h.registry.item_stage("p", "a"), None);
    }

    #[test]
    fn failed_item_entry_is_swept() {
        let manifest = r#"{"packs": {"p": {"path": "p.pack", "items": ["a", "ghost"]}}}"#;
        let mut h = Harness::new(manifest, Config::default()).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        // "ghost" is declared but absent from the image
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_item("p", "ghost", Priority::Normal, record(&results))
            .unwrap();
        assert!(!h.registry.wait_item_settled("p", "ghost"));
        assert_eq!(*results.lock().unwrap(), vec![false]);
        assert_eq!(h.registry.item_stage("p", "ghost"), Some(Stage::Unloading));

        // the sweep evicts the dead entry and gives its pack unit back
        h.registry.release_pack("p");
        h.registry.tick(0.0);
        assert_eq!(h.registry.item_stage("p", "ghost"), None);
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));
        h.registry.tick(30.0);
        assert_eq!(h.registry.pack_stage("p"), None);
    }

    #[test]
    fn release_during_materialization_defers_eviction() {
        let mut h = Harness::new(single_pack(), Config::default()).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_item("p", "a", Priority::Normal, record(&results))
            .unwrap();
        assert_eq!(h.registry.item_stage("p", "a"), Some(Stage::Loading));

        // the only holder walks away before the materialization settles
        h.registry.release_item("p", "a");
        assert_eq!(h.registry.item_stage("p", "a"), Some(Stage::Loading));

        assert!(h.registry.wait_item_settled("p", "a"));
        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(h.registry.item_stage("p", "a"), Some(Stage::Retained));
        assert_eq!(h.registry.item_refcount("p", "a"), Some(0));

        h.registry.tick(10.0);
        assert_eq!(h.registry.item_stage("p", "a"), None);
    }

    #[test]
    fn item_request_reactivates_retained_pack() {
        let mut h = Harness::new(single_pack(), Config::default()).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());
        h.registry.release_pack("p");
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));

        let payload = h
            .registry
            .load_item_sync("p", "a", Priority::Normal)
            .unwrap();
        assert_eq!(&payload[..], b"alpha");
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Loaded));
        assert_eq!(h.registry.pack_refcount("p"), Some(1));
        assert_eq!(h.fetches("p"), 1); // still the original image
    }

    #[test]
    fn acquire_adds_a_reference_without_loading() {
        let mut h = Harness::new(single_pack(), Config::default()).auto("p", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());

        h.registry.acquire_pack("p").unwrap();
        assert_eq!(h.registry.pack_refcount("p"), Some(2));
        assert_eq!(h.fetches("p"), 1);

        h.registry.release_pack("p");
        h.registry.release_pack("p");
        assert_eq!(h.registry.pack_stage("p"), Some(Stage::Retained));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut h = Harness::new(single_pack(), Config::default());
        let err = h
            .registry
            .load_pack("nope", Priority::Normal, |_| {})
            .unwrap_err();
        assert!(matches!(err, DepotError::PackNotFound(_)));

        let err = h
            .registry
            .load_item("p", "missing.bin", Priority::Normal, |_| {})
            .unwrap_err();
        assert!(matches!(err, DepotError::ItemNotFound { .. }));
    }

    #[test]
    fn shutdown_tears_down_everything() {
        let mut h = Harness::new(chain(), Config::default())
            .auto("p", image())
            .auto("q", image());
        assert!(h.registry.load_pack_sync("p", Priority::Normal).unwrap());
        h.registry
            .load_item("p", "a", Priority::Normal, |_| {})
            .unwrap();
        assert!(h.registry.wait_item_settled("p", "a"));

        h.registry.shutdown();
        assert_eq!(h.registry.live_pack_count(), 0);
    }

    #[test]
    fn shutdown_fails_queued_waiters() {
        let mut h = Harness::new(single_pack(), Config::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        h.registry
            .load_pack("p", Priority::Normal, record(&results))
            .unwrap();
        h.registry
            .load_item("p", "a", Priority::Normal, record(&results))
            .unwrap();

        // teardown mid-flight still fires every callback, once, as failed
        h.registry.shutdown();
        assert_eq!(*results.lock().unwrap(), vec![false, false]);
        assert_eq!(h.registry.live_pack_count(), 0);
    }

    #[test]
    fn refcounts_stay_consistent_under_churn() {
        let mut h = Harness::new(chain(), Config::default())
            .auto("p", image())
            .auto("q", image());
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut pack_refs = 0usize;
        let mut item_refs = 0usize;
        for _ in 0..500 {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            match (seed >> 33) % 6 {
                0 => {
                    h.registry
                        .load_pack("p", Priority::Normal, |_| {})
                        .unwrap();
                    pack_refs += 1;
                }
                1 if pack_refs > 0 => {
                    h.registry.release_pack("p");
                    pack_refs -= 1;
                }
                2 => {
                    h.registry
                        .load_item("p", "a", Priority::Normal, |_| {})
                        .unwrap();
                    item_refs += 1;
                }
                3 if item_refs > 0 => {
                    h.registry.release_item("p", "a");
                    item_refs -= 1;
                }
                4 => h.registry.tick(1.0),
                _ => h.registry.pump(),
            }
            for id in ["p", "q"] {
                if let Some(stage) = h.registry.pack_stage(id) {
                    let refcount = h.registry.pack_refcount(id).unwrap();
                    if stage == Stage::Retained {
                        assert_eq!(refcount, 0, "retained {id} with live refs");
                    }
                    if stage == Stage::Loaded {
                        assert!(h.registry.pack_handle(id).is_some());
                    }
                }
            }
        }
        h.registry.pump();
        h.registry.shutdown();
        assert_eq!(h.registry.live_pack_count(), 0);
    }
}
