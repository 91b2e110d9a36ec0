//! Pure path helpers for the coordination namespace.
//!
//! Paths are absolute, `/`-separated, with no trailing slash except for the
//! root itself (`"/"`). No filesystem semantics beyond `.`/`..` segments,
//! which only appear in link targets and are normalized away before any
//! capability call.

/// Join a parent path and a child name.
pub fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Split a path into (parent, leaf). The root has no parent.
pub fn split(path: &str) -> Option<(&str, &str)> {
    if path == "/" {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

/// Segments of an absolute path, root excluded. Empty for `"/"`.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Resolve a possibly-relative target against a base node path, applying
/// `.`/`..` normalization. `..` above the root clamps at the root, matching
/// how the remote namespace treats its top.
pub fn normalize(base: &str, target: &str) -> String {
    let mut parts: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        segments(base).collect()
    };
    for seg in target.split('/').filter(|s| !s.is_empty()) {
        match seg {
            "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}
