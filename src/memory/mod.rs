//! In-memory coordination service.
//!
//! A deterministic, single-session implementation of [`Coordination`] for
//! this crate's own tests and for downstream test suites: a locked node
//! tree whose mutations emit events in mutation order, plus a scripting
//! surface for session loss, expiry, and reconnection. Session expiry
//! removes the session's ephemeral nodes and drops its watches, exactly
//! what the real service does.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::SystemTime;

use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::capability::{
    Coordination, CoordError, CoordEvent, CreateMode, SessionEvent, WatchId, WatchKind,
};
use crate::core::{open_acl_unsafe, AclEntry, NodeMeta};

#[derive(Debug, Clone)]
struct Node {
    data: String,
    children: BTreeMap<String, Node>,
    acl: Vec<AclEntry>,
    /// Owning session id when ephemeral, zero otherwise.
    ephemeral_owner: u64,
    version: u64,
    created: SystemTime,
    modified: SystemTime,
}

impl Node {
    fn new(data: &str, acl: Vec<AclEntry>, ephemeral_owner: u64) -> Self {
        let now = SystemTime::now();
        Self {
            data: data.to_string(),
            children: BTreeMap::new(),
            acl,
            ephemeral_owner,
            version: 0,
            created: now,
            modified: now,
        }
    }

    fn meta(&self) -> NodeMeta {
        NodeMeta {
            ephemeral_owner: self.ephemeral_owner,
            version: self.version,
            num_children: self.children.len(),
            created: self.created,
            modified: self.modified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    Disconnected,
    Closed,
}

struct Inner {
    root: Node,
    state: SessionState,
    session_id: u64,
    watches: HashMap<WatchId, (String, WatchKind)>,
    next_watch: u64,
    events: Sender<CoordEvent>,
    receiver: Option<Receiver<CoordEvent>>,
}

impl Inner {
    fn check(&self) -> Result<(), CoordError> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(CoordError::ConnectionLoss),
            SessionState::Closed => Err(CoordError::Closed),
        }
    }

    fn node(&self, path: &str) -> Result<&Node, CoordError> {
        let mut node = &self.root;
        for seg in crate::core::path::segments(path) {
            node = node
                .children
                .get(seg)
                .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        }
        Ok(node)
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node, CoordError> {
        let mut node = &mut self.root;
        for seg in crate::core::path::segments(path) {
            node = node
                .children
                .get_mut(seg)
                .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        }
        Ok(node)
    }

    fn emit(&self, event: CoordEvent) {
        // Receiver may be gone after close; delivery is best-effort.
        let _ = self.events.send(event);
    }

    fn watched(&self, path: &str, kind: WatchKind) -> bool {
        self.watches
            .values()
            .any(|(p, k)| p == path && *k == kind)
    }

    fn notify_children_changed(&self, path: &str) {
        if self.watched(path, WatchKind::Children) {
            self.emit(CoordEvent::ChildrenChanged(path.to_string()));
        }
    }

    fn notify_data_changed(&self, path: &str) {
        if self.watched(path, WatchKind::Data) {
            self.emit(CoordEvent::DataChanged(path.to_string()));
        }
    }

    fn notify_deleted(&self, path: &str) {
        if self.watched(path, WatchKind::Data) || self.watched(path, WatchKind::Children) {
            self.emit(CoordEvent::Deleted(path.to_string()));
        }
    }

    /// Paths of every ephemeral node owned by the current session,
    /// leaves-last so parents are walked before children.
    fn ephemeral_paths(&self) -> Vec<String> {
        fn walk(node: &Node, path: &str, session: u64, out: &mut Vec<String>) {
            for (name, child) in &node.children {
                let cpath = crate::core::path::join(path, name);
                if child.ephemeral_owner == session {
                    out.push(cpath.clone());
                }
                walk(child, &cpath, session, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, "/", self.session_id, &mut out);
        out
    }
}

/// See the module docs.
pub struct MemoryCoordination {
    inner: Mutex<Inner>,
}

impl MemoryCoordination {
    /// A connected service with an empty tree; the `Connected` session
    /// event is already queued.
    pub fn new() -> Self {
        Self::with_initial_state(true)
    }

    /// A service that stays silent until [`MemoryCoordination::connect`] is
    /// called, for connection-failure tests.
    pub fn disconnected() -> Self {
        Self::with_initial_state(false)
    }

    fn with_initial_state(connect_immediately: bool) -> Self {
        let (tx, rx) = unbounded();
        let inner = Inner {
            root: Node::new("", open_acl_unsafe(), 0),
            state: if connect_immediately {
                SessionState::Connected
            } else {
                SessionState::Disconnected
            },
            session_id: 1,
            watches: HashMap::new(),
            next_watch: 1,
            events: tx,
            receiver: Some(rx),
        };
        if connect_immediately {
            inner.emit(CoordEvent::Session(SessionEvent::Connected));
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory service lock poisoned")
    }

    /// Establish the initial session (used with [`Self::disconnected`]).
    pub fn connect(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Connected;
        inner.emit(CoordEvent::Session(SessionEvent::Connected));
    }

    /// Drop connectivity without ending the session. Calls fail with
    /// `ConnectionLoss` until [`Self::reconnect`].
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Disconnected;
        inner.emit(CoordEvent::Session(SessionEvent::Lost));
    }

    /// Restore connectivity on the same session: ephemerals and watches
    /// survive, no replay is required.
    pub fn reconnect(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Connected;
        inner.emit(CoordEvent::Session(SessionEvent::Connected));
    }

    /// End the session: remove its ephemeral nodes, drop its watches, then
    /// hand the client a fresh session requiring replay.
    pub fn expire_session(&self) {
        let mut inner = self.lock();
        inner.watches.clear();
        for path in inner.ephemeral_paths().into_iter().rev() {
            if let Some((parent, name)) = crate::core::path::split(&path) {
                let (parent, name) = (parent.to_string(), name.to_string());
                if let Ok(node) = inner.node_mut(&parent) {
                    node.children.remove(&name);
                }
            }
        }
        inner.session_id += 1;
        inner.state = SessionState::Connected;
        debug!(session = inner.session_id, "session expired, new session");
        inner.emit(CoordEvent::Session(SessionEvent::Expired));
        inner.emit(CoordEvent::Session(SessionEvent::Reconnected));
    }

    /// Number of armed watches, for lifecycle assertions in tests.
    pub fn watch_count(&self) -> usize {
        self.lock().watches.len()
    }
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordination for MemoryCoordination {
    fn create(
        &self,
        path: &str,
        data: &str,
        acl: &[AclEntry],
        mode: CreateMode,
    ) -> Result<(), CoordError> {
        let mut inner = self.lock();
        inner.check()?;
        let (parent, name) = crate::core::path::split(path)
            .ok_or_else(|| CoordError::NodeExists(path.to_string()))?;
        let owner = match mode {
            CreateMode::Persistent => 0,
            CreateMode::Ephemeral => inner.session_id,
        };
        let node = Node::new(data, acl.to_vec(), owner);
        let (parent, name) = (parent.to_string(), name.to_string());
        {
            let pnode = inner.node_mut(&parent)?;
            if pnode.children.contains_key(&name) {
                return Err(CoordError::NodeExists(path.to_string()));
            }
            pnode.children.insert(name, node);
        }
        inner.notify_children_changed(&parent);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), CoordError> {
        let mut inner = self.lock();
        inner.check()?;
        let (parent, name) =
            crate::core::path::split(path).ok_or_else(|| CoordError::NotEmpty("/".to_string()))?;
        let (parent, name) = (parent.to_string(), name.to_string());
        {
            let node = inner.node(path)?;
            if !node.children.is_empty() {
                return Err(CoordError::NotEmpty(path.to_string()));
            }
        }
        let pnode = inner.node_mut(&parent)?;
        pnode.children.remove(&name);
        inner.notify_deleted(path);
        inner.notify_children_changed(&parent);
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, CoordError> {
        let inner = self.lock();
        inner.check()?;
        Ok(inner.node(path).is_ok())
    }

    fn get(&self, path: &str) -> Result<(String, NodeMeta), CoordError> {
        let inner = self.lock();
        inner.check()?;
        let node = inner.node(path)?;
        Ok((node.data.clone(), node.meta()))
    }

    fn set(&self, path: &str, data: &str) -> Result<(), CoordError> {
        let mut inner = self.lock();
        inner.check()?;
        {
            let node = inner.node_mut(path)?;
            node.data = data.to_string();
            node.version += 1;
            node.modified = SystemTime::now();
        }
        inner.notify_data_changed(path);
        Ok(())
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>, CoordError> {
        let inner = self.lock();
        inner.check()?;
        Ok(inner.node(path)?.children.keys().cloned().collect())
    }

    fn get_acl(&self, path: &str) -> Result<Vec<AclEntry>, CoordError> {
        let inner = self.lock();
        inner.check()?;
        Ok(inner.node(path)?.acl.clone())
    }

    fn set_acl(&self, path: &str, acl: &[AclEntry]) -> Result<(), CoordError> {
        let mut inner = self.lock();
        inner.check()?;
        inner.node_mut(path)?.acl = acl.to_vec();
        Ok(())
    }

    fn watch(&self, path: &str, kind: WatchKind) -> Result<WatchId, CoordError> {
        let mut inner = self.lock();
        inner.check()?;
        if inner.node(path).is_err() {
            return Err(CoordError::NoNode(path.to_string()));
        }
        let id = WatchId(inner.next_watch);
        inner.next_watch += 1;
        inner.watches.insert(id, (path.to_string(), kind));
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) -> Result<(), CoordError> {
        let mut inner = self.lock();
        inner.watches.remove(&id);
        Ok(())
    }

    fn take_events(&self) -> Option<Receiver<CoordEvent>> {
        self.lock().receiver.take()
    }

    fn close(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Closed;
        inner.watches.clear();
    }
}
