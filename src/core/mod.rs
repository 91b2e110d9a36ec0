//! Core domain types for grove.
//!
//! Module hierarchy follows type dependency order:
//! - path: absolute-path helpers (no I/O)
//! - value: property maps and the string payload codec
//! - links: symbolic/property link naming conventions
//! - acl: access-control entries
//! - meta: remote node metadata

pub mod acl;
pub mod links;
pub mod meta;
pub mod path;
pub mod value;

pub use acl::{open_acl_unsafe, perms, read_acl_unsafe, world_permission, AclEntry};
pub use links::{
    classify, parse_proplink, proplink_key, symlink_key, symlink_target, LinkKind, PropLinkTarget,
    PROPLINK_SUFFIX, SYMLINK_SUFFIX,
};
pub use meta::NodeMeta;
pub use value::{JsonPropertyCodec, PropertyCodec, PropertyMap, STRING_VALUE_KEY};
