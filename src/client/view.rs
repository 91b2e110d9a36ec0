//! Live mirrored views of remote child-lists and property-maps.
//!
//! Each (requested path, kind) pair has at most one cache entry; repeated
//! requests return handles to the same entry with a reference count, and
//! dropping the last handle evicts the entry and tears down its remote
//! watch. Entries track both the path as requested and the real path it
//! currently resolves to; when the tree mutates and the link chain
//! re-resolves differently, the watch is redirected without changing the
//! identity of the handle, so subscribers keep working transparently.
//!
//! Delivery never diffs: a change notification triggers a refetch of the
//! authoritative snapshot, which then fans out to every subscriber.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::capability::{Coordination, CoordError, WatchId, WatchKind};
use crate::client::recovery::RecoveryManager;
use crate::client::resolve::{PathResolver, ResolveError};
use crate::core::{PropertyCodec, PropertyMap};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ViewError {
    /// The underlying node was deleted and the path no longer re-resolves;
    /// the view is a dead mirror and mutations through it are refused.
    #[error("live view for `{0}` is stale (underlying node deleted)")]
    Stale(String),
    #[error(transparent)]
    Coord(#[from] CoordError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Identifies one registered subscriber on one view entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ChildrenCallback = Arc<dyn Fn(Option<&[String]>) + Send + Sync>;
type PropertiesCallback = Arc<dyn Fn(Option<&PropertyMap>) + Send + Sync>;

enum Callback {
    Children(ChildrenCallback),
    Properties(PropertiesCallback),
}

impl Clone for Callback {
    fn clone(&self) -> Self {
        match self {
            Callback::Children(f) => Callback::Children(f.clone()),
            Callback::Properties(f) => Callback::Properties(f.clone()),
        }
    }
}

enum Snapshot {
    Children(Vec<String>),
    Properties(PropertyMap),
}

struct EntryState {
    real_path: String,
    watch: Option<WatchId>,
    refcount: usize,
    dead: bool,
    snapshot: Snapshot,
    subscribers: BTreeMap<u64, Callback>,
    next_subscription: u64,
}

pub(crate) struct ViewEntry {
    path: String,
    kind: WatchKind,
    state: Mutex<EntryState>,
}

impl ViewEntry {
    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().expect("view entry lock poisoned")
    }
}

pub(crate) struct ViewRegistry {
    coord: Arc<dyn Coordination>,
    codec: Arc<dyn PropertyCodec>,
    resolver: PathResolver,
    recovery: Arc<RecoveryManager>,
    entries: Mutex<HashMap<(String, WatchKind), Arc<ViewEntry>>>,
}

impl ViewRegistry {
    pub(crate) fn new(
        coord: Arc<dyn Coordination>,
        codec: Arc<dyn PropertyCodec>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        let resolver = PathResolver::new(coord.clone(), codec.clone());
        Self {
            coord,
            codec,
            resolver,
            recovery,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<(String, WatchKind), Arc<ViewEntry>>> {
        self.entries.lock().expect("view registry lock poisoned")
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entries().len()
    }

    fn fetch(&self, kind: WatchKind, real_path: &str) -> Result<Snapshot, CoordError> {
        match kind {
            WatchKind::Children => Ok(Snapshot::Children(self.coord.get_children(real_path)?)),
            WatchKind::Data => {
                let (data, _) = self.coord.get(real_path)?;
                Ok(Snapshot::Properties(self.codec.decode(&data, real_path)))
            }
        }
    }

    /// Fetch or create the entry for (path, kind), incrementing its
    /// reference count. The registry lock is never held across capability
    /// calls; a racing creation is resolved by keeping the first entry.
    fn acquire(self: &Arc<Self>, path: &str, kind: WatchKind) -> Result<Arc<ViewEntry>, ViewError> {
        if let Some(entry) = self.entries().get(&(path.to_string(), kind)) {
            entry.lock().refcount += 1;
            return Ok(entry.clone());
        }

        let real_path = self.resolver.resolve(path)?;
        let watch = self.coord.watch(&real_path, kind)?;
        let snapshot = match self.fetch(kind, &real_path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let _ = self.coord.unwatch(watch);
                return Err(err.into());
            }
        };
        let entry = Arc::new(ViewEntry {
            path: path.to_string(),
            kind,
            state: Mutex::new(EntryState {
                real_path,
                watch: Some(watch),
                refcount: 1,
                dead: false,
                snapshot,
                subscribers: BTreeMap::new(),
                next_subscription: 1,
            }),
        });

        let mut entries = self.entries();
        if let Some(existing) = entries.get(&(path.to_string(), kind)) {
            // Lost the creation race; discard ours.
            existing.lock().refcount += 1;
            let existing = existing.clone();
            drop(entries);
            let _ = self.coord.unwatch(watch);
            return Ok(existing);
        }
        entries.insert((path.to_string(), kind), entry.clone());
        Ok(entry)
    }

    fn retain(&self, entry: &Arc<ViewEntry>) {
        entry.lock().refcount += 1;
    }

    /// Drop one reference; the last release evicts the entry and tears
    /// down its watch.
    fn release(&self, entry: &Arc<ViewEntry>) {
        let watch = {
            let mut entries = self.entries();
            let mut state = entry.lock();
            state.refcount -= 1;
            if state.refcount > 0 {
                return;
            }
            entries.remove(&(entry.path.clone(), entry.kind));
            state.watch.take()
        };
        if let Some(watch) = watch {
            let _ = self.coord.unwatch(watch);
        }
    }

    fn entries_watching(&self, real_path: &str, kind: WatchKind) -> Vec<Arc<ViewEntry>> {
        self.entries()
            .values()
            .filter(|e| {
                e.kind == kind && {
                    let state = e.lock();
                    !state.dead && state.real_path == real_path
                }
            })
            .cloned()
            .collect()
    }

    fn all_entries(&self) -> Vec<Arc<ViewEntry>> {
        self.entries().values().cloned().collect()
    }

    /// Refetch the authoritative snapshot for every entry mirroring
    /// `real_path` with the given kind, and notify subscribers.
    pub(crate) fn on_changed(&self, real_path: &str, kind: WatchKind) {
        for entry in self.entries_watching(real_path, kind) {
            self.refresh(&entry);
        }
    }

    /// The real node behind some entries was deleted: re-resolve each
    /// affected entry; redirect its watch when the original path still
    /// resolves through a link, mark it dead otherwise.
    pub(crate) fn on_deleted(&self, real_path: &str) {
        for kind in [WatchKind::Children, WatchKind::Data] {
            for entry in self.entries_watching(real_path, kind) {
                self.rebind(&entry);
            }
        }
    }

    /// Re-resolve, re-arm, and refresh every live entry. Used after
    /// session re-establishment, when the service has dropped all watches.
    pub(crate) fn reprime_all(&self) {
        for entry in self.all_entries() {
            if entry.lock().dead {
                continue;
            }
            self.rebind(&entry);
        }
    }

    fn refresh(&self, entry: &Arc<ViewEntry>) {
        let real_path = entry.lock().real_path.clone();
        match self.fetch(entry.kind, &real_path) {
            Ok(snapshot) => notify(entry, Some(snapshot)),
            Err(CoordError::NoNode(_)) => self.rebind(entry),
            Err(err) => warn!(path = %entry.path, %err, "snapshot refetch failed"),
        }
    }

    fn rebind(&self, entry: &Arc<ViewEntry>) {
        match self.resolver.resolve(&entry.path) {
            Ok(new_real) => {
                let old_watch = {
                    let mut state = entry.lock();
                    debug!(path = %entry.path, real = %new_real, "view re-resolved");
                    state.real_path = new_real.clone();
                    state.watch.take()
                };
                if let Some(watch) = old_watch {
                    let _ = self.coord.unwatch(watch);
                }
                match self.coord.watch(&new_real, entry.kind) {
                    Ok(watch) => entry.lock().watch = Some(watch),
                    Err(err) => {
                        warn!(path = %entry.path, %err, "failed to re-arm watch");
                        self.invalidate(entry);
                        return;
                    }
                }
                self.refresh(entry);
            }
            Err(err) => {
                debug!(path = %entry.path, %err, "view path no longer resolves");
                self.invalidate(entry);
            }
        }
    }

    /// Mark an entry dead: clear the snapshot, drop the watch, and signal
    /// every subscriber once with no data.
    fn invalidate(&self, entry: &Arc<ViewEntry>) {
        let watch = {
            let mut state = entry.lock();
            if state.dead {
                return;
            }
            state.dead = true;
            state.snapshot = match entry.kind {
                WatchKind::Children => Snapshot::Children(Vec::new()),
                WatchKind::Data => Snapshot::Properties(PropertyMap::new()),
            };
            state.watch.take()
        };
        if let Some(watch) = watch {
            let _ = self.coord.unwatch(watch);
        }
        notify(entry, None);
    }
}

enum Payload {
    Children(Option<Vec<String>>),
    Properties(Option<PropertyMap>),
}

/// Invoke every subscriber with the new snapshot (`None` = invalidated).
/// Callbacks run outside the entry lock; a subscriber that panics is
/// logged and removed so one bad callback cannot wedge delivery.
fn notify(entry: &Arc<ViewEntry>, snapshot: Option<Snapshot>) {
    let (payload, subscribers) = {
        let mut state = entry.lock();
        if let Some(snapshot) = snapshot {
            state.snapshot = snapshot;
        }
        let live = !state.dead;
        let payload = match &state.snapshot {
            Snapshot::Children(names) => Payload::Children(live.then(|| names.clone())),
            Snapshot::Properties(props) => Payload::Properties(live.then(|| props.clone())),
        };
        let subscribers: Vec<(u64, Callback)> = state
            .subscribers
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();
        (payload, subscribers)
    };

    let mut panicked = Vec::new();
    for (id, callback) in &subscribers {
        let outcome = match (callback, &payload) {
            (Callback::Children(f), Payload::Children(names)) => {
                catch_unwind(AssertUnwindSafe(|| f(names.as_deref())))
            }
            (Callback::Properties(f), Payload::Properties(props)) => {
                catch_unwind(AssertUnwindSafe(|| f(props.as_ref())))
            }
            _ => continue,
        };
        if outcome.is_err() {
            warn!(path = %entry.path, subscription = id, "subscriber panicked; removing it");
            panicked.push(*id);
        }
    }
    if !panicked.is_empty() {
        let mut state = entry.lock();
        for id in panicked {
            state.subscribers.remove(&id);
        }
    }
}

fn subscribe_entry(entry: &Arc<ViewEntry>, callback: Callback) -> SubscriptionId {
    let (id, immediate) = {
        let mut state = entry.lock();
        let id = state.next_subscription;
        state.next_subscription += 1;
        let immediate = match (&callback, &state.snapshot) {
            (Callback::Children(f), Snapshot::Children(names)) => {
                let arg = (!state.dead).then(|| names.clone());
                let f = f.clone();
                Some(Box::new(move || f(arg.as_deref())) as Box<dyn FnOnce()>)
            }
            (Callback::Properties(f), Snapshot::Properties(props)) => {
                let arg = (!state.dead).then(|| props.clone());
                let f = f.clone();
                Some(Box::new(move || f(arg.as_ref())) as Box<dyn FnOnce()>)
            }
            _ => None,
        };
        state.subscribers.insert(id, callback);
        (id, immediate)
    };
    // Synchronous immediate delivery of the current snapshot, outside the
    // entry lock, before subscribe returns.
    if let Some(deliver) = immediate {
        deliver();
    }
    SubscriptionId(id)
}

/// A live, reference-counted mirror of a remote node's child list.
pub struct Children {
    entry: Arc<ViewEntry>,
    registry: Arc<ViewRegistry>,
}

impl Children {
    pub(crate) fn acquire(registry: &Arc<ViewRegistry>, path: &str) -> Result<Self, ViewError> {
        let entry = registry.acquire(path, WatchKind::Children)?;
        Ok(Self {
            entry,
            registry: registry.clone(),
        })
    }

    /// The path as requested, possibly virtual.
    pub fn path(&self) -> &str {
        &self.entry.path
    }

    /// The real path currently backing this view.
    pub fn real_path(&self) -> String {
        self.entry.lock().real_path.clone()
    }

    /// False once the underlying node is gone and unlinkable.
    pub fn is_live(&self) -> bool {
        !self.entry.lock().dead
    }

    pub fn to_vec(&self) -> Vec<String> {
        match &self.entry.lock().snapshot {
            Snapshot::Children(names) => names.clone(),
            Snapshot::Properties(_) => Vec::new(),
        }
    }

    /// Iterate over a copy of the current snapshot.
    pub fn iter(&self) -> impl Iterator<Item = String> {
        self.to_vec().into_iter()
    }

    pub fn len(&self) -> usize {
        match &self.entry.lock().snapshot {
            Snapshot::Children(names) => names.len(),
            Snapshot::Properties(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        match &self.entry.lock().snapshot {
            Snapshot::Children(names) => names.iter().any(|n| n == name),
            Snapshot::Properties(_) => false,
        }
    }

    /// Register a subscriber: invoked synchronously once with the current
    /// snapshot before this returns, then on every change. `None` signals
    /// that the view was invalidated.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Option<&[String]>) + Send + Sync + 'static,
    {
        subscribe_entry(&self.entry, Callback::Children(Arc::new(callback)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.entry.lock().subscribers.remove(&id.0);
    }

    /// Whether two handles mirror the same cache entry.
    pub fn same_view(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Clone for Children {
    fn clone(&self) -> Self {
        self.registry.retain(&self.entry);
        Self {
            entry: self.entry.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl Drop for Children {
    fn drop(&mut self) {
        self.registry.release(&self.entry);
    }
}

impl std::fmt::Debug for Children {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.entry.lock();
        f.debug_struct("Children")
            .field("path", &self.entry.path)
            .field("real_path", &state.real_path)
            .field("dead", &state.dead)
            .finish()
    }
}

/// A live, reference-counted mirror of a remote node's property map.
pub struct Properties {
    entry: Arc<ViewEntry>,
    registry: Arc<ViewRegistry>,
}

impl Properties {
    pub(crate) fn acquire(registry: &Arc<ViewRegistry>, path: &str) -> Result<Self, ViewError> {
        let entry = registry.acquire(path, WatchKind::Data)?;
        Ok(Self {
            entry,
            registry: registry.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.entry.path
    }

    pub fn real_path(&self) -> String {
        self.entry.lock().real_path.clone()
    }

    pub fn is_live(&self) -> bool {
        !self.entry.lock().dead
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match &self.entry.lock().snapshot {
            Snapshot::Properties(props) => props.get(key).cloned(),
            Snapshot::Children(_) => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        match &self.entry.lock().snapshot {
            Snapshot::Properties(props) => props.contains_key(key),
            Snapshot::Children(_) => false,
        }
    }

    pub fn to_map(&self) -> PropertyMap {
        match &self.entry.lock().snapshot {
            Snapshot::Properties(props) => props.clone(),
            Snapshot::Children(_) => PropertyMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.entry.lock().snapshot {
            Snapshot::Properties(props) => props.len(),
            Snapshot::Children(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole property map: keys not present in `data` are
    /// removed from the node.
    pub fn set(&self, data: PropertyMap) -> Result<(), ViewError> {
        self.write(data)
    }

    /// Merge `data` into the current map, adding or overwriting only the
    /// given keys.
    pub fn update(&self, data: PropertyMap) -> Result<(), ViewError> {
        let mut merged = self.to_map();
        merged.extend(data);
        self.write(merged)
    }

    fn write(&self, data: PropertyMap) -> Result<(), ViewError> {
        let real_path = {
            let state = self.entry.lock();
            if state.dead {
                return Err(ViewError::Stale(self.entry.path.clone()));
            }
            state.real_path.clone()
        };
        let encoded = self.registry.codec.encode(&data);
        self.registry.coord.set(&real_path, &encoded)?;
        // Keep the replay payload current if this node is a tracked
        // ephemeral registration.
        self.registry.recovery.record_set(&real_path, &encoded);
        // The change notification will refetch and fan out; update the
        // local copy now so reads through this handle are not stale in the
        // meantime.
        let mut state = self.entry.lock();
        if !state.dead {
            state.snapshot = Snapshot::Properties(data);
        }
        Ok(())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Option<&PropertyMap>) + Send + Sync + 'static,
    {
        subscribe_entry(&self.entry, Callback::Properties(Arc::new(callback)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.entry.lock().subscribers.remove(&id.0);
    }

    pub fn same_view(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Clone for Properties {
    fn clone(&self) -> Self {
        self.registry.retain(&self.entry);
        Self {
            entry: self.entry.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl Drop for Properties {
    fn drop(&mut self) {
        self.registry.release(&self.entry);
    }
}

impl std::fmt::Debug for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.entry.lock();
        f.debug_struct("Properties")
            .field("path", &self.entry.path)
            .field("real_path", &state.real_path)
            .field("dead", &state.dead)
            .finish()
    }
}
