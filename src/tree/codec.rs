//! The line-oriented, indentation-significant tree text format.
//!
//! ```text
//! /services : cluster
//!   threads = 4
//!   db -> /databases/main
//!   port => /services/db port
//!   /providers
//! ```
//!
//! A line whose first non-blank character is `#` is a comment. Rendering is
//! deterministic: properties sorted by key, then links sorted by key, then
//! children sorted by name, so exports diff and round-trip stably.

use serde_json::Value;
use thiserror::Error;

use crate::core::LinkKind;
use crate::tree::{Link, TreeDefinition};

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("line {line}: bad link format: `{text}`")]
    BadLink { line: usize, text: String },
    #[error("line {line}: unrecognized data: `{text}`")]
    Unrecognized { line: usize, text: String },
    #[error("line {line}: bad property value `{text}`: {reason}")]
    BadValue {
        line: usize,
        text: String,
        reason: String,
    },
    #[error("line {line}: can't indent under properties")]
    IndentUnderProperty { line: usize },
    #[error("line {line}: invalid indentation")]
    InvalidIndent { line: usize },
    #[error("line {line}: duplicate node `{name}`")]
    DuplicateNode { line: usize, name: String },
    #[error("line {line}: duplicate property `{name}`")]
    DuplicateProperty { line: usize, name: String },
    #[error("line {line}: properties must appear under a node")]
    PropertyAboveNodes { line: usize },
}

enum Item {
    Node {
        name: String,
        type_tag: Option<String>,
    },
    Property {
        name: String,
        value: Value,
    },
    Link {
        name: String,
        link: Link,
    },
}

/// Split at the first `op` whose left side is a single bare token, so the
/// compact forms (`key=1`, `db->/x`) parse the same as the spaced ones.
/// An operator buried inside a spaced expression (`note = "a => b"`) does
/// not split.
fn split_op<'a>(text: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let idx = text.find(op)?;
    let name = text[..idx].trim_end();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, text[idx + op.len()..].trim()))
}

fn classify_line(lineno: usize, text: &str) -> Result<Item, ParseError> {
    // `=>` first (`=` would claim it), then `=` before `->` so a property
    // expression containing an arrow stays a property.
    if let Some((name, target)) = split_op(text, "=>") {
        if target.is_empty() || name.starts_with('/') {
            return Err(ParseError::BadLink {
                line: lineno,
                text: text.to_string(),
            });
        }
        return Ok(Item::Link {
            name: name.to_string(),
            link: Link::property(target),
        });
    }
    if let Some((name, expr)) = split_op(text, "=") {
        let value = serde_json::from_str::<Value>(expr).map_err(|e| ParseError::BadValue {
            line: lineno,
            text: expr.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(Item::Property {
            name: name.to_string(),
            value,
        });
    }
    if let Some((name, target)) = split_op(text, "->") {
        if target.is_empty() || target.contains(char::is_whitespace) || name.starts_with('/') {
            return Err(ParseError::BadLink {
                line: lineno,
                text: text.to_string(),
            });
        }
        return Ok(Item::Link {
            name: name.to_string(),
            link: Link::symbolic(target),
        });
    }
    if let Some(body) = text.strip_prefix('/') {
        let (name, type_tag) = match body.split_once(':') {
            Some((name, ty)) => (name.trim_end(), Some(ty.trim())),
            None => (body, None),
        };
        let bad = name.is_empty()
            || name.contains(char::is_whitespace)
            || type_tag.is_some_and(str::is_empty);
        if bad {
            return Err(ParseError::Unrecognized {
                line: lineno,
                text: text.to_string(),
            });
        }
        return Ok(Item::Node {
            name: name.to_string(),
            type_tag: type_tag.map(str::to_string),
        });
    }
    if text.contains("->") {
        return Err(ParseError::BadLink {
            line: lineno,
            text: text.to_string(),
        });
    }
    Err(ParseError::Unrecognized {
        line: lineno,
        text: text.to_string(),
    })
}

#[derive(Default)]
struct Slot {
    node: TreeDefinition,
    children: Vec<usize>,
}

fn assemble(arena: &mut Vec<Slot>, idx: usize) -> TreeDefinition {
    let child_indexes = std::mem::take(&mut arena[idx].children);
    let mut node = std::mem::take(&mut arena[idx].node);
    for child_idx in child_indexes {
        let child = assemble(arena, child_idx);
        node.children.insert(child.name.clone(), child);
    }
    node
}

/// Parse a tree definition. The returned synthetic root is unnamed; its
/// children are the defined forest.
pub fn parse(text: &str) -> Result<TreeDefinition, ParseError> {
    // Slot 0 is the synthetic root. The stack mirrors the indentation
    // algorithm of the original format: each entry is (indent, slot index
    // for node lines, None for property lines), and the parent of the top
    // entry is always the entry below it.
    let mut arena: Vec<Slot> = vec![Slot::default()];
    let mut stack: Vec<(isize, Option<usize>)> = vec![(-1, Some(0))];

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }
        let content = line.trim_start();
        if content.starts_with('#') {
            continue;
        }
        let indent = (line.len() - content.len()) as isize;
        let item = classify_line(lineno, content)?;

        let top_indent = stack.last().expect("stack never empty").0;
        let pushed = if indent > top_indent {
            if stack.last().unwrap().1.is_none() {
                return Err(ParseError::IndentUnderProperty { line: lineno });
            }
            stack.push((indent, None));
            true
        } else {
            while indent < stack.last().unwrap().0 {
                stack.pop();
            }
            if indent > stack.last().unwrap().0 {
                return Err(ParseError::InvalidIndent { line: lineno });
            }
            false
        };

        let parent = stack[stack.len() - 2]
            .1
            .expect("parent entry is always a node");

        match item {
            Item::Node { name, type_tag } => {
                let duplicate = arena[parent]
                    .children
                    .iter()
                    .any(|&c| arena[c].node.name == name);
                if duplicate {
                    return Err(ParseError::DuplicateNode { line: lineno, name });
                }
                let mut node = TreeDefinition::named(name);
                if let Some(ty) = type_tag {
                    node.properties.insert("type".into(), Value::String(ty));
                }
                let node_idx = arena.len();
                arena.push(Slot {
                    node,
                    children: Vec::new(),
                });
                arena[parent].children.push(node_idx);
                let top = stack.len() - 1;
                stack[top] = (indent, Some(node_idx));
            }
            Item::Property { name, value } => {
                if parent == 0 {
                    return Err(ParseError::PropertyAboveNodes { line: lineno });
                }
                if arena[parent].node.properties.contains_key(&name) {
                    return Err(ParseError::DuplicateProperty { line: lineno, name });
                }
                arena[parent].node.properties.insert(name, value);
                if pushed {
                    let top = stack.len() - 1;
                    stack[top] = (indent, None);
                }
            }
            Item::Link { name, link } => {
                if parent == 0 {
                    return Err(ParseError::PropertyAboveNodes { line: lineno });
                }
                if arena[parent].node.links.contains_key(&name) {
                    return Err(ParseError::DuplicateProperty { line: lineno, name });
                }
                arena[parent].node.links.insert(name, link);
                if pushed {
                    let top = stack.len() - 1;
                    stack[top] = (indent, None);
                }
            }
        }
    }

    Ok(assemble(&mut arena, 0))
}

const INDENT: &str = "  ";

fn render_node(node: &TreeDefinition, depth: usize, out: &mut String) {
    let pad = INDENT.repeat(depth);
    let mut properties = node.properties.clone();
    let type_tag = match properties.remove("type") {
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
        None => None,
    };
    let body_depth;
    if node.name.is_empty() {
        body_depth = depth;
    } else {
        match &type_tag {
            Some(ty) => out.push_str(&format!("{pad}/{} : {ty}\n", node.name)),
            None => out.push_str(&format!("{pad}/{}\n", node.name)),
        }
        body_depth = depth + 1;
    }
    let body_pad = INDENT.repeat(body_depth);
    for (key, value) in &properties {
        out.push_str(&format!("{body_pad}{key} = {value}\n"));
    }
    for (name, link) in &node.links {
        let arrow = match link.kind {
            LinkKind::Symbolic => "->",
            LinkKind::Property => "=>",
        };
        out.push_str(&format!("{body_pad}{name} {arrow} {}\n", link.target));
    }
    for child in node.children.values() {
        render_node(child, body_depth, out);
    }
}

/// Render a definition to text. The synthetic root is omitted when unnamed;
/// a named root renders as the single top-level node.
pub fn render(root: &TreeDefinition) -> String {
    let mut out = String::new();
    render_node(root, 0, &mut out);
    out
}
