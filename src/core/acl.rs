//! Access-control entries for remote nodes.

use serde::{Deserialize, Serialize};

/// Permission bits, mirroring the coordination service's scheme.
pub mod perms {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const CREATE: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const ADMIN: u32 = 1 << 4;
    pub const ALL: u32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

/// One ACL entry: permission bits granted to an identity under a scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub perms: u32,
    pub scheme: String,
    pub id: String,
}

/// Grant `perms` to everyone.
pub fn world_permission(perms: u32) -> AclEntry {
    AclEntry {
        perms,
        scheme: "world".to_string(),
        id: "anyone".to_string(),
    }
}

/// World-writable ACL, for tooling and tests.
pub fn open_acl_unsafe() -> Vec<AclEntry> {
    vec![world_permission(perms::ALL)]
}

/// World-readable ACL, the default for registrations.
pub fn read_acl_unsafe() -> Vec<AclEntry> {
    vec![world_permission(perms::READ)]
}
