//! Link naming conventions.
//!
//! The namespace itself has no link node type; links are ordinary
//! properties distinguished by a reserved key suffix. A symbolic link
//! (`name ->`) redirects a missing child lookup; a property link
//! (`name =>`) redirects a single property read. A literal child or
//! property always shadows a link of the same name.

use crate::core::value::PropertyMap;
use serde_json::Value;

/// Suffix marking a symbolic-link property.
pub const SYMLINK_SUFFIX: &str = " ->";

/// Suffix marking a property-link property.
pub const PROPLINK_SUFFIX: &str = " =>";

/// Classification of a property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Symbolic,
    Property,
}

/// Split a property key into its base name and link kind, if it is a link.
pub fn classify(key: &str) -> Option<(&str, LinkKind)> {
    if let Some(base) = key.strip_suffix(SYMLINK_SUFFIX) {
        Some((base, LinkKind::Symbolic))
    } else {
        key.strip_suffix(PROPLINK_SUFFIX)
            .map(|base| (base, LinkKind::Property))
    }
}

/// Property key for a symbolic link named `name`. An empty name produces
/// the whole-node link key used for subtree substitution.
pub fn symlink_key(name: &str) -> String {
    format!("{name}{SYMLINK_SUFFIX}")
}

/// Property key for a property link named `name`.
pub fn proplink_key(name: &str) -> String {
    format!("{name}{PROPLINK_SUFFIX}")
}

/// Look up the symbolic-link target for `name` on a property map, if the
/// link exists and carries a string target.
pub fn symlink_target<'a>(props: &'a PropertyMap, name: &str) -> Option<&'a str> {
    match props.get(&symlink_key(name)) {
        Some(Value::String(target)) => Some(target),
        _ => None,
    }
}

/// A property-link value: `"path"` or `"path propertyName"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropLinkTarget<'a> {
    pub path: &'a str,
    pub property: Option<&'a str>,
}

/// Parse a property-link value. The property name defaults to the link's
/// own base name when omitted; that defaulting happens at the call site.
pub fn parse_proplink(value: &str) -> Option<PropLinkTarget<'_>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.split_once(char::is_whitespace) {
        Some((path, prop)) => Some(PropLinkTarget {
            path,
            property: Some(prop.trim()).filter(|p| !p.is_empty()),
        }),
        None => Some(PropLinkTarget {
            path: value,
            property: None,
        }),
    }
}
