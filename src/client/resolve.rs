//! Virtual-path resolution through symbolic and property links.
//!
//! The namespace has no first-class links; they are properties named by
//! convention (see `core::links`). Resolution walks the requested path from
//! the root, descending literal children and falling back to links only
//! when a segment is missing, so a literal child always shadows a link of
//! the same name. Results are never cached here: the live tree can change
//! under us, and each view entry keeps only its own current `real_path`.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::capability::{Coordination, CoordError};
use crate::core::path::{join, normalize, segments};
use crate::core::{parse_proplink, symlink_target, PropertyCodec, PropertyMap};

/// Bound on link splices in one resolution. Exceeding it reports a
/// suspected cycle instead of looping forever.
pub const MAX_LINK_HOPS: usize = 16;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("path `{0}` is unresolvable")]
    PathUnresolvable(String),
    #[error("link cycle suspected resolving `{path}` (more than {hops} link hops)")]
    LinkCycleSuspected { path: String, hops: usize },
    #[error("no property `{key}` at `{path}`")]
    NoSuchProperty { path: String, key: String },
    #[error(transparent)]
    Coord(#[from] CoordError),
}

pub struct PathResolver {
    coord: Arc<dyn Coordination>,
    codec: Arc<dyn PropertyCodec>,
}

impl PathResolver {
    pub fn new(coord: Arc<dyn Coordination>, codec: Arc<dyn PropertyCodec>) -> Self {
        Self { coord, codec }
    }

    fn properties(&self, path: &str) -> Result<PropertyMap, CoordError> {
        let (data, _) = self.coord.get(path)?;
        Ok(self.codec.decode(&data, path))
    }

    /// Resolve a possibly-virtual path to the real path it denotes.
    pub fn resolve(&self, path: &str) -> Result<String, ResolveError> {
        let requested = path;
        let mut current = normalize("/", path);
        let mut hops = 0;

        'restart: loop {
            let segs: Vec<String> = segments(&current).map(str::to_string).collect();
            let mut node = "/".to_string();
            for (i, seg) in segs.iter().enumerate() {
                let candidate = join(&node, seg);
                if self.coord.exists(&candidate)? {
                    node = candidate;
                    continue;
                }
                // Missing child: the node may carry a link for it, or a
                // whole-node link substituting this entire subtree.
                let props = match self.properties(&node) {
                    Ok(props) => props,
                    Err(CoordError::NoNode(_)) => {
                        return Err(ResolveError::PathUnresolvable(requested.to_string()))
                    }
                    Err(err) => return Err(err.into()),
                };
                let spliced = if let Some(target) = symlink_target(&props, seg) {
                    rejoin(normalize(&node, target), &segs[i + 1..])
                } else if let Some(target) = symlink_target(&props, "") {
                    rejoin(normalize(&node, target), &segs[i..])
                } else {
                    return Err(ResolveError::PathUnresolvable(requested.to_string()));
                };
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(ResolveError::LinkCycleSuspected {
                        path: requested.to_string(),
                        hops: MAX_LINK_HOPS,
                    });
                }
                current = spliced;
                continue 'restart;
            }
            return Ok(node);
        }
    }

    /// Resolve one property on the node at `path`: a literal property wins;
    /// otherwise a property link with the same base name is followed for
    /// exactly one hop. The fetched value is returned literally even when
    /// it itself names a link.
    pub fn resolve_property(&self, path: &str, key: &str) -> Result<Value, ResolveError> {
        let real = self.resolve(path)?;
        let props = self.properties(&real)?;
        if let Some(value) = props.get(key) {
            return Ok(value.clone());
        }
        let link_value = props
            .get(&crate::core::proplink_key(key))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ResolveError::NoSuchProperty {
                path: real.clone(),
                key: key.to_string(),
            })?;
        let target = parse_proplink(link_value).ok_or_else(|| ResolveError::NoSuchProperty {
            path: real.clone(),
            key: key.to_string(),
        })?;
        let target_path = self.resolve(&normalize(&real, target.path))?;
        let target_key = target.property.unwrap_or(key);
        let target_props = self.properties(&target_path)?;
        target_props
            .get(target_key)
            .cloned()
            .ok_or_else(|| ResolveError::NoSuchProperty {
                path: target_path,
                key: target_key.to_string(),
            })
    }
}

fn rejoin(base: String, rest: &[String]) -> String {
    if rest.is_empty() {
        base
    } else if base == "/" {
        format!("/{}", rest.join("/"))
    } else {
        format!("{base}/{}", rest.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CreateMode;
    use crate::core::{open_acl_unsafe, symlink_key, JsonPropertyCodec};
    use crate::memory::MemoryCoordination;
    use serde_json::json;

    fn setup() -> (Arc<MemoryCoordination>, PathResolver) {
        let svc = Arc::new(MemoryCoordination::new());
        let resolver = PathResolver::new(
            svc.clone() as Arc<dyn Coordination>,
            Arc::new(JsonPropertyCodec),
        );
        (svc, resolver)
    }

    fn mknode(svc: &MemoryCoordination, path: &str, props: PropertyMap) {
        let data = JsonPropertyCodec.encode(&props);
        svc.create(path, &data, &open_acl_unsafe(), CreateMode::Persistent)
            .unwrap();
    }

    fn props(pairs: &[(&str, &str)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn literal_path_resolves_to_itself() {
        let (svc, resolver) = setup();
        mknode(&svc, "/a", PropertyMap::new());
        mknode(&svc, "/a/b", PropertyMap::new());
        assert_eq!(resolver.resolve("/a/b").unwrap(), "/a/b");
    }

    #[test]
    fn absolute_link_followed() {
        let (svc, resolver) = setup();
        mknode(&svc, "/databases", PropertyMap::new());
        mknode(&svc, "/databases/main", PropertyMap::new());
        mknode(&svc, "/app", props(&[(&symlink_key("db"), "/databases/main")]));
        assert_eq!(resolver.resolve("/app/db").unwrap(), "/databases/main");
    }

    #[test]
    fn relative_links_resolve_against_carrying_node() {
        let (svc, resolver) = setup();
        mknode(&svc, "/a", PropertyMap::new());
        mknode(&svc, "/a/c", PropertyMap::new());
        mknode(
            &svc,
            "/a/b",
            props(&[(&symlink_key("l"), "c"), (&symlink_key("l2"), "../c")]),
        );
        mknode(&svc, "/a/b/c", PropertyMap::new());
        assert_eq!(resolver.resolve("/a/b/l").unwrap(), "/a/b/c");
        assert_eq!(resolver.resolve("/a/b/l2").unwrap(), "/a/c");
    }

    #[test]
    fn literal_child_shadows_link() {
        let (svc, resolver) = setup();
        mknode(&svc, "/other", PropertyMap::new());
        mknode(&svc, "/other/x", PropertyMap::new());
        mknode(&svc, "/a", props(&[(&symlink_key("x"), "/other/x")]));
        mknode(&svc, "/a/x", PropertyMap::new());
        assert_eq!(resolver.resolve("/a/x").unwrap(), "/a/x");
    }

    #[test]
    fn whole_node_link_substitutes_subtree() {
        let (svc, resolver) = setup();
        mknode(&svc, "/real", PropertyMap::new());
        mknode(&svc, "/real/sub", PropertyMap::new());
        mknode(&svc, "/alias", props(&[(&symlink_key(""), "/real")]));
        // `/alias` itself exists; its missing children substitute through.
        assert_eq!(resolver.resolve("/alias/sub").unwrap(), "/real/sub");
    }

    #[test]
    fn links_resolve_through_further_links() {
        let (svc, resolver) = setup();
        mknode(&svc, "/c", PropertyMap::new());
        mknode(&svc, "/c/end", PropertyMap::new());
        mknode(&svc, "/b", props(&[(&symlink_key("hop"), "/c")]));
        mknode(&svc, "/a", props(&[(&symlink_key("start"), "/b/hop")]));
        assert_eq!(resolver.resolve("/a/start/end").unwrap(), "/c/end");
    }

    #[test]
    fn missing_segment_is_unresolvable() {
        let (svc, resolver) = setup();
        mknode(&svc, "/a", PropertyMap::new());
        let err = resolver.resolve("/a/missing").unwrap_err();
        assert!(matches!(err, ResolveError::PathUnresolvable(p) if p == "/a/missing"));
    }

    #[test]
    fn cyclic_links_bounded() {
        let (svc, resolver) = setup();
        mknode(&svc, "/a", props(&[(&symlink_key("x"), "/b/y")]));
        mknode(&svc, "/b", props(&[(&symlink_key("y"), "/a/x")]));
        let err = resolver.resolve("/a/x").unwrap_err();
        assert!(matches!(err, ResolveError::LinkCycleSuspected { .. }));
    }

    #[test]
    fn property_link_single_hop() {
        let (svc, resolver) = setup();
        mknode(&svc, "/db", props(&[("port", "5432")]));
        let mut p = PropertyMap::new();
        p.insert(crate::core::proplink_key("port"), json!("/db"));
        p.insert(crate::core::proplink_key("host"), json!("/db port"));
        mknode(&svc, "/app", p);
        // Default property name is the link's own base name.
        assert_eq!(resolver.resolve_property("/app", "port").unwrap(), json!("5432"));
        // Explicit property name.
        assert_eq!(resolver.resolve_property("/app", "host").unwrap(), json!("5432"));
    }

    #[test]
    fn literal_property_shadows_property_link() {
        let (svc, resolver) = setup();
        mknode(&svc, "/db", props(&[("port", "5432")]));
        let mut p = props(&[("port", "9999")]);
        p.insert(crate::core::proplink_key("port"), json!("/db"));
        mknode(&svc, "/app", p);
        assert_eq!(resolver.resolve_property("/app", "port").unwrap(), json!("9999"));
    }

    #[test]
    fn property_link_target_returned_literally() {
        let (svc, resolver) = setup();
        // The target property is itself a link-shaped string; it must not
        // be chased further.
        let mut db = PropertyMap::new();
        db.insert(crate::core::proplink_key("port"), json!("/elsewhere"));
        mknode(&svc, "/db", db);
        let mut app = PropertyMap::new();
        app.insert(crate::core::proplink_key("port"), json!("/db port =>"));
        mknode(&svc, "/app", app);
        assert_eq!(
            resolver.resolve_property("/app", "port").unwrap(),
            json!("/elsewhere")
        );
    }
}
