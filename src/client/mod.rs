//! The top-level client handle and its engines.
//!
//! `TreeClient` owns the delivery thread draining the capability's single
//! ordered event channel: change notifications refresh live views, and
//! session re-establishment triggers registration replay followed by view
//! re-priming, synchronously within the transition handling so the window
//! where stale local data could be acted on stays small.

pub mod reconcile;
mod recovery;
pub mod resolve;
pub mod view;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capability::{Coordination, CoordError, CoordEvent, CreateMode, SessionEvent, WatchKind};
use crate::config::Config;
use crate::core::path::{join, normalize};
use crate::core::{symlink_key, AclEntry, PropertyCodec, PropertyMap};
use crate::tree::{self, TreeDefinition};
use crate::Result;

use reconcile::Reconciler;
use recovery::RecoveryManager;
use view::ViewRegistry;

pub use reconcile::{DeleteOptions, ImportError, ImportOptions, ImportReport};
pub use resolve::{PathResolver, ResolveError, MAX_LINK_HOPS};
pub use view::{Children, Properties, SubscriptionId, ViewError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    #[error("can't connect to the coordination service at `{connection}`")]
    ConnectionFailure { connection: String },
    #[error("the capability's event channel was already taken")]
    EventsUnavailable,
    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// Client handle over an injected coordination capability.
///
/// Cheap to share behind an `Arc`; all operations take `&self`. Closing is
/// idempotent and stops event delivery without waiting for the service to
/// expire this session's ephemeral nodes (that is server-side and
/// asynchronous).
pub struct TreeClient {
    coord: Arc<dyn Coordination>,
    codec: Arc<dyn PropertyCodec>,
    resolver: PathResolver,
    views: Arc<ViewRegistry>,
    recovery: Arc<RecoveryManager>,
    reconciler: Reconciler,
    closed: AtomicBool,
    shutdown: Sender<()>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl TreeClient {
    /// Connect over `coord` with the default JSON property codec.
    pub fn connect(coord: Arc<dyn Coordination>, config: &Config) -> Result<Self> {
        Self::connect_with_codec(coord, Arc::new(crate::core::JsonPropertyCodec), config)
    }

    /// Connect with an injected property codec strategy.
    pub fn connect_with_codec(
        coord: Arc<dyn Coordination>,
        codec: Arc<dyn PropertyCodec>,
        config: &Config,
    ) -> Result<Self> {
        let events = coord
            .take_events()
            .ok_or(ConnectError::EventsUnavailable)?;
        wait_for_session(&events, config)?;
        info!(connection = %config.connection, "connected");

        let recovery = Arc::new(RecoveryManager::new(coord.clone()));
        let views = Arc::new(ViewRegistry::new(
            coord.clone(),
            codec.clone(),
            recovery.clone(),
        ));
        let reconciler = Reconciler::new(coord.clone(), codec.clone(), recovery.clone());
        let resolver = PathResolver::new(coord.clone(), codec.clone());
        let (shutdown, shutdown_rx) = bounded(1);

        let delivery = {
            let views = views.clone();
            let recovery = recovery.clone();
            std::thread::spawn(move || delivery_loop(events, shutdown_rx, views, recovery))
        };

        Ok(Self {
            coord,
            codec,
            resolver,
            views,
            recovery,
            reconciler,
            closed: AtomicBool::new(false),
            shutdown,
            delivery: Mutex::new(Some(delivery)),
        })
    }

    /// A live mirror of the child list at `path` (which may be virtual).
    pub fn children(&self, path: &str) -> Result<Children> {
        Ok(Children::acquire(&self.views, path)?)
    }

    /// A live mirror of the property map at `path`.
    pub fn properties(&self, path: &str) -> Result<Properties> {
        Ok(Properties::acquire(&self.views, path)?)
    }

    /// Resolve a possibly-virtual path to the real path it denotes.
    pub fn resolve(&self, path: &str) -> Result<String> {
        Ok(self.resolver.resolve(path)?)
    }

    /// Resolve one property, following a property link for one hop.
    pub fn resolve_property(&self, path: &str, key: &str) -> Result<Value> {
        Ok(self.resolver.resolve_property(path, key)?)
    }

    /// One-shot fetch of the property map at `path` (resolved).
    pub fn get_properties(&self, path: &str) -> Result<PropertyMap> {
        let real = self.resolver.resolve(path)?;
        let (data, _) = self.coord.get(&real)?;
        Ok(self.codec.decode(&data, &real))
    }

    /// Create a node with the given properties. Ephemeral creations are
    /// retained for replay after session loss.
    pub fn create(
        &self,
        path: &str,
        props: &PropertyMap,
        acl: &[AclEntry],
        mode: CreateMode,
    ) -> Result<()> {
        let data = self.codec.encode(props);
        self.coord.create(path, &data, acl, mode)?;
        if mode == CreateMode::Ephemeral {
            self.recovery.record_create(path, &data, acl);
        }
        Ok(())
    }

    /// Delete a single (childless) node.
    pub fn delete(&self, path: &str) -> Result<()> {
        self.coord.delete(path)?;
        self.recovery.record_delete(path);
        Ok(())
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.coord.exists(path)?)
    }

    /// Register a reachable endpoint: an ephemeral `<path>/<addr>` node
    /// carrying `props` plus this process's `pid`, replayed automatically
    /// after session loss until [`TreeClient::unregister`].
    pub fn register(
        &self,
        path: &str,
        addr: &str,
        props: &PropertyMap,
        acl: &[AclEntry],
    ) -> Result<()> {
        let service = self.resolver.resolve(path)?;
        let mut props = props.clone();
        props.insert("pid".to_string(), Value::from(std::process::id()));
        info!(addr, path = %service, "registering server");
        self.create(&join(&service, addr), &props, acl, CreateMode::Ephemeral)
    }

    /// Withdraw a registration made with [`TreeClient::register`].
    pub fn unregister(&self, path: &str, addr: &str) -> Result<()> {
        let service = self.resolver.resolve(path)?;
        self.delete(&join(&service, addr))
    }

    /// Write a symbolic link: `source`'s parent gets a `<leaf> ->` property
    /// pointing at `target`. A trailing `/` on the target appends the
    /// source's leaf name.
    pub fn ln(&self, target: &str, source: &str) -> Result<()> {
        let (base, name) = crate::core::path::split(source)
            .ok_or_else(|| ResolveError::PathUnresolvable(source.to_string()))?;
        let target = if let Some(stripped) = target.strip_suffix('/') {
            normalize(stripped, name)
        } else {
            target.to_string()
        };
        let mut props = self.get_properties(base)?;
        props.insert(symlink_key(name), Value::String(target));
        let base = self.resolver.resolve(base)?;
        self.coord.set(&base, &self.codec.encode(&props))?;
        Ok(())
    }

    /// Parse a definition and reconcile it against the live tree at `path`
    /// (which may be virtual).
    pub fn import_tree(&self, text: &str, path: &str, opts: &ImportOptions) -> Result<ImportReport> {
        let root = tree::parse(text).map_err(ImportError::Parse)?;
        self.reconcile(&root, path, opts)
    }

    /// Reconcile an already-parsed definition forest.
    pub fn reconcile(
        &self,
        root: &TreeDefinition,
        path: &str,
        opts: &ImportOptions,
    ) -> Result<ImportReport> {
        let at = self
            .resolver
            .resolve(path)
            .map_err(ImportError::Resolve)?;
        Ok(self.reconciler.reconcile(root, &at, opts)?)
    }

    /// Render the live subtree at `path` as definition text. Ephemeral
    /// nodes are skipped unless `include_ephemeral`. `root_name` overrides
    /// the exported root's name; naming the namespace root wraps the whole
    /// export under a single top-level node.
    pub fn export_tree(
        &self,
        path: &str,
        include_ephemeral: bool,
        root_name: Option<&str>,
    ) -> Result<String> {
        let path = self.resolver.resolve(path)?;
        let def = self.export_node(&path, include_ephemeral)?;
        let root = match def {
            Some(mut def) => {
                if let Some(name) = root_name {
                    def.name = name.to_string();
                }
                if def.name.is_empty() {
                    def
                } else {
                    let mut root = TreeDefinition::default();
                    root.children.insert(def.name.clone(), def);
                    root
                }
            }
            None => TreeDefinition::default(),
        };
        Ok(tree::render(&root))
    }

    fn export_node(&self, path: &str, include_ephemeral: bool) -> Result<Option<TreeDefinition>> {
        let (data, meta) = self.coord.get(path)?;
        if meta.is_ephemeral() && !include_ephemeral {
            return Ok(None);
        }
        let name = crate::core::path::split(path).map_or("", |(_, leaf)| leaf);
        let props = self.codec.decode(&data, path);
        let mut def = TreeDefinition::from_property_map(name, &props);
        for child in self.coord.get_children(path)? {
            let cpath = join(path, &child);
            if let Some(child_def) = self.export_node(&cpath, include_ephemeral)? {
                def.children.insert(child_def.name.clone(), child_def);
            }
        }
        Ok(Some(def))
    }

    /// Ephemeral-safe recursive deletion; see [`DeleteOptions`].
    pub fn delete_recursive(&self, path: &str, opts: &DeleteOptions) -> Result<ImportReport> {
        let real = self.resolver.resolve(path)?;
        Ok(self.reconciler.delete_recursive(&real, opts)?)
    }

    /// Replace the ACL at `path` (resolved). Tracked so a replayed
    /// registration carries its latest ACL.
    pub fn set_acl(&self, path: &str, acl: &[AclEntry]) -> Result<()> {
        let real = self.resolver.resolve(path)?;
        self.coord.set_acl(&real, acl)?;
        self.recovery.record_set_acl(&real, acl);
        Ok(())
    }

    /// Number of live view cache entries (diagnostic).
    pub fn view_count(&self) -> usize {
        self.views.entry_count()
    }

    /// Number of retained ephemeral registrations (diagnostic).
    pub fn registration_count(&self) -> usize {
        self.recovery.registration_count()
    }

    /// Stop event delivery and close the capability. Idempotent; never
    /// waits for server-side ephemeral expiry.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(());
        self.coord.close();
        if let Ok(mut guard) = self.delivery.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for TreeClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn wait_for_session(events: &Receiver<CoordEvent>, config: &Config) -> Result<()> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    loop {
        match events.recv_timeout(timeout) {
            Ok(CoordEvent::Session(SessionEvent::Connected | SessionEvent::Reconnected)) => {
                return Ok(());
            }
            Ok(other) => {
                debug!(?other, "event before initial session establishment");
            }
            Err(RecvTimeoutError::Timeout) if config.wait => {
                error!(connection = %config.connection, "can't connect, still waiting");
            }
            Err(_) => {
                return Err(ConnectError::ConnectionFailure {
                    connection: config.connection.clone(),
                }
                .into());
            }
        }
    }
}

fn delivery_loop(
    events: Receiver<CoordEvent>,
    shutdown: Receiver<()>,
    views: Arc<ViewRegistry>,
    recovery: Arc<RecoveryManager>,
) {
    loop {
        crossbeam::select! {
            recv(events) -> msg => match msg {
                Ok(event) => handle_event(event, &views, &recovery),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("delivery loop stopped");
}

fn handle_event(event: CoordEvent, views: &Arc<ViewRegistry>, recovery: &Arc<RecoveryManager>) {
    match event {
        CoordEvent::ChildrenChanged(path) => views.on_changed(&path, WatchKind::Children),
        CoordEvent::DataChanged(path) => views.on_changed(&path, WatchKind::Data),
        CoordEvent::Deleted(path) => views.on_deleted(&path),
        CoordEvent::Session(SessionEvent::Reconnected) => {
            // Replay registrations before re-priming views, so the views'
            // fresh snapshots already include our own ephemeral nodes.
            info!("session re-established, replaying registrations");
            recovery.replay();
            views.reprime_all();
        }
        CoordEvent::Session(SessionEvent::Expired) => {
            warn!("session expired; awaiting re-establishment");
        }
        CoordEvent::Session(SessionEvent::Lost) => {
            warn!("connection lost");
        }
        CoordEvent::Session(SessionEvent::Connected) => {
            debug!("connected");
        }
    }
}
