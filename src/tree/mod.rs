//! The declarative tree-definition model and its text codec.

pub mod codec;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::{proplink_key, symlink_key, LinkKind, PropertyMap};

pub use codec::{parse, render, ParseError};

/// A link carried by a definition node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: LinkKind,
    /// For symbolic links, a target path. For property links,
    /// `"path"` or `"path propertyName"`.
    pub target: String,
}

impl Link {
    pub fn symbolic(target: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Symbolic,
            target: target.into(),
        }
    }

    pub fn property(target: impl Into<String>) -> Self {
        Self {
            kind: LinkKind::Property,
            target: target.into(),
        }
    }

    /// The full property key for this link under base name `name`.
    pub fn property_key(&self, name: &str) -> String {
        match self.kind {
            LinkKind::Symbolic => symlink_key(name),
            LinkKind::Property => proplink_key(name),
        }
    }
}

/// A parsed (or exported) tree node: not authoritative, consumed by the
/// reconciler and by export tooling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeDefinition {
    pub name: String,
    /// Non-link properties; the reserved `type` key holds the type tag.
    pub properties: PropertyMap,
    /// Links keyed by base name (suffix stripped).
    pub links: BTreeMap<String, Link>,
    pub children: BTreeMap<String, TreeDefinition>,
}

impl TreeDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The reserved `type` tag, when present and a string.
    pub fn type_tag(&self) -> Option<&str> {
        match self.properties.get("type") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Flatten properties and links into the single property map stored on
    /// the remote node (links under their suffixed keys).
    pub fn property_map(&self) -> PropertyMap {
        let mut map = self.properties.clone();
        for (name, link) in &self.links {
            map.insert(link.property_key(name), Value::String(link.target.clone()));
        }
        map
    }

    /// Build a definition node from a remote property map, splitting link
    /// keys back out by their reserved suffixes.
    pub fn from_property_map(name: impl Into<String>, map: &PropertyMap) -> Self {
        let mut def = Self::named(name);
        for (key, value) in map {
            match crate::core::classify(key) {
                Some((base, kind)) => {
                    let target = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    def.links
                        .insert(base.to_string(), Link { kind, target });
                }
                None => {
                    def.properties.insert(key.clone(), value.clone());
                }
            }
        }
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_map_round_trip_splits_links() {
        let mut def = TreeDefinition::named("db");
        def.properties.insert("threads".into(), json!(4));
        def.links.insert("main".into(), Link::symbolic("/databases/main"));
        def.links
            .insert("port".into(), Link::property("/services/db port"));

        let map = def.property_map();
        assert_eq!(map.get("main ->"), Some(&json!("/databases/main")));
        assert_eq!(map.get("port =>"), Some(&json!("/services/db port")));

        let back = TreeDefinition::from_property_map("db", &map);
        assert_eq!(back.properties, def.properties);
        assert_eq!(back.links, def.links);
    }
}
