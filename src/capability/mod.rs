//! The coordination-service capability consumed by the client.
//!
//! grove does not implement the coordination protocol; it consumes a
//! strongly-consistent hierarchical store through this seam. The contract
//! the client relies on: session-level ordering of event delivery over a
//! single channel, automatic removal of ephemeral nodes when their session
//! ends, and an explicit re-establish transition after session loss.

use crossbeam::channel::Receiver;
use thiserror::Error;

use crate::core::AclEntry;
use crate::core::NodeMeta;

/// Persistence mode for node creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed automatically when the creating session ends.
    Ephemeral,
}

/// Which aspect of a node a watch observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Children,
    Data,
}

/// Handle to an armed watch, used to tear it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Session lifecycle transitions, delivered in order on the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Initial connection established.
    Connected,
    /// Connectivity lost; the session may still be recoverable.
    Lost,
    /// The session expired: ephemeral nodes are gone, watches are dropped.
    Expired,
    /// A fresh session is established after loss; replay is required.
    Reconnected,
}

/// Everything the service pushes at the client, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordEvent {
    Session(SessionEvent),
    ChildrenChanged(String),
    DataChanged(String),
    Deleted(String),
}

/// Errors surfaced by the capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoordError {
    #[error("no node at `{0}`")]
    NoNode(String),
    #[error("node already exists at `{0}`")]
    NodeExists(String),
    #[error("node at `{0}` has children")]
    NotEmpty(String),
    #[error("connection to the coordination service lost")]
    ConnectionLoss,
    #[error("session expired")]
    SessionExpired,
    #[error("capability is closed")]
    Closed,
}

impl CoordError {
    /// Whether a retry on a fresh session may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordError::ConnectionLoss | CoordError::SessionExpired)
    }
}

/// The injected coordination-service capability.
///
/// Mutating calls are synchronous and may block on a network round-trip;
/// callers must not hold locks the delivery channel also needs across them.
pub trait Coordination: Send + Sync {
    fn create(
        &self,
        path: &str,
        data: &str,
        acl: &[AclEntry],
        mode: CreateMode,
    ) -> Result<(), CoordError>;

    fn delete(&self, path: &str) -> Result<(), CoordError>;

    fn exists(&self, path: &str) -> Result<bool, CoordError>;

    fn get(&self, path: &str) -> Result<(String, NodeMeta), CoordError>;

    fn set(&self, path: &str, data: &str) -> Result<(), CoordError>;

    /// Child names in sorted order.
    fn get_children(&self, path: &str) -> Result<Vec<String>, CoordError>;

    fn get_acl(&self, path: &str) -> Result<Vec<AclEntry>, CoordError>;

    fn set_acl(&self, path: &str, acl: &[AclEntry]) -> Result<(), CoordError>;

    /// Arm a persistent watch. Watches survive disconnects but are dropped
    /// by the service on session expiry; recovery re-arms them.
    fn watch(&self, path: &str, kind: WatchKind) -> Result<WatchId, CoordError>;

    fn unwatch(&self, id: WatchId) -> Result<(), CoordError>;

    /// The single ordered event channel. Yields `Some` exactly once.
    fn take_events(&self) -> Option<Receiver<CoordEvent>>;

    /// Idempotent shutdown; ends event delivery.
    fn close(&self);
}
