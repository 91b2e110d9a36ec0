//! Node metadata returned alongside a node's payload.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// The subset of the remote node stat this client consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Session id owning this node if it is ephemeral, zero otherwise.
    pub ephemeral_owner: u64,
    pub version: u64,
    pub num_children: usize,
    #[serde(skip, default = "SystemTime::now")]
    pub created: SystemTime,
    #[serde(skip, default = "SystemTime::now")]
    pub modified: SystemTime,
}

impl NodeMeta {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

impl Default for NodeMeta {
    fn default() -> Self {
        let now = SystemTime::now();
        Self {
            ephemeral_owner: 0,
            version: 0,
            num_children: 0,
            created: now,
            modified: now,
        }
    }
}
