//! Reconciliation of a parsed tree definition against the live tree.
//!
//! The reconciler walks a definition depth-first against the live tree,
//! creating missing nodes, additively updating present ones, and (with
//! `trim`) deleting live children the definition no longer mentions.
//! Deletion is ephemeral-safe: a node with any ephemeral descendant is
//! left standing unless forced, and the caller gets a notice naming every
//! node that blocked. `dry_run` reports the exact same actions without
//! mutating anything.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::capability::{Coordination, CoordError, CreateMode};
use crate::client::recovery::RecoveryManager;
use crate::core::{open_acl_unsafe, AclEntry, PropertyCodec, PropertyMap};
use crate::tree::{ParseError, TreeDefinition};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolve(#[from] crate::client::resolve::ResolveError),
    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// Options for [`Reconciler::reconcile`].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Delete live nodes the definition no longer mentions (never the
    /// direct children of the reconciliation root).
    pub trim: bool,
    /// Report every action without performing any.
    pub dry_run: bool,
    /// ACL applied to created and updated nodes.
    pub acl: Vec<AclEntry>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            trim: false,
            dry_run: false,
            acl: open_acl_unsafe(),
        }
    }
}

/// Options for [`Reconciler::delete_recursive`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub dry_run: bool,
    /// Delete ephemeral nodes too.
    pub force: bool,
    /// Suppress notices when the only blockage is the root itself being
    /// ephemeral; used by trim so routine registration nodes stay quiet.
    pub ignore_if_ephemeral_root: bool,
}

/// Outcome of a reconcile or recursive delete: human-readable notices for
/// blocked or simulated actions, plus counters for what was (or would be)
/// done.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub notices: Vec<String>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ImportReport {
    /// True when the pass neither changed anything nor had anything to
    /// report: the live tree already agrees with the definition.
    pub fn is_clean(&self) -> bool {
        self.notices.is_empty() && self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

pub(crate) struct Reconciler {
    coord: Arc<dyn Coordination>,
    codec: Arc<dyn PropertyCodec>,
    recovery: Arc<RecoveryManager>,
}

fn join_under(base: &str, name: &str) -> String {
    format!("{base}/{name}")
}

impl Reconciler {
    pub(crate) fn new(
        coord: Arc<dyn Coordination>,
        codec: Arc<dyn PropertyCodec>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        Self {
            coord,
            codec,
            recovery,
        }
    }

    fn properties(&self, path: &str) -> Result<PropertyMap, CoordError> {
        let (data, _) = self.coord.get(path)?;
        Ok(self.codec.decode(&data, path))
    }

    /// Reconcile a parsed definition rooted at `at_path`. `root` is the
    /// synthetic parse root; its children are the defined forest.
    pub(crate) fn reconcile(
        &self,
        root: &TreeDefinition,
        at_path: &str,
        opts: &ImportOptions,
    ) -> Result<ImportReport, ImportError> {
        let at = at_path.trim_end_matches('/');
        let probe = if at.is_empty() { "/" } else { at };
        if !self.coord.exists(probe)? {
            return Err(CoordError::NoNode(probe.to_string()).into());
        }
        let mut report = ImportReport::default();
        self.reconcile_node(at, root, opts, true, &mut report)?;
        Ok(report)
    }

    fn reconcile_node(
        &self,
        path: &str,
        node: &TreeDefinition,
        opts: &ImportOptions,
        top: bool,
        report: &mut ImportReport,
    ) -> Result<(), ImportError> {
        // Direct children of the reconciliation root are never trimmed:
        // unrelated subsystems routinely share the same root.
        if !top {
            let probe = if path.is_empty() { "/" } else { path };
            for name in self.coord.get_children(probe)? {
                if node.children.contains_key(&name) {
                    continue;
                }
                let cpath = join_under(path, &name);
                if opts.trim {
                    let dopts = DeleteOptions {
                        dry_run: opts.dry_run,
                        force: false,
                        ignore_if_ephemeral_root: true,
                    };
                    let sub = self.delete_recursive(&cpath, &dopts)?;
                    report.notices.extend(sub.notices);
                    report.deleted += sub.deleted;
                } else {
                    report.notices.push(format!("extra path not trimmed: {cpath}"));
                }
            }
        }

        for (name, child) in &node.children {
            let cpath = join_under(path, name);
            let desired = child.property_map();
            if self.coord.exists(&cpath)? {
                self.update_node(&cpath, &desired, opts, report)?;
            } else if opts.dry_run {
                report.notices.push(format!("add {cpath}"));
                // Everything below is new too; the wet run would create it,
                // but the simulation stops at the subtree root.
                continue;
            } else {
                let data = self.codec.encode(&desired);
                self.coord
                    .create(&cpath, &data, &opts.acl, CreateMode::Persistent)?;
                report.created += 1;
            }
            self.reconcile_node(&cpath, child, opts, false, report)?;
        }
        Ok(())
    }

    /// Additive update: only keys the definition mentions are written;
    /// live properties it does not mention are left untouched.
    fn update_node(
        &self,
        path: &str,
        desired: &PropertyMap,
        opts: &ImportOptions,
        report: &mut ImportReport,
    ) -> Result<(), ImportError> {
        let current = self.properties(path)?;
        let changed: Vec<(&String, &Value)> = desired
            .iter()
            .filter(|(key, value)| current.get(*key) != Some(*value))
            .collect();
        let current_acl = self.coord.get_acl(path)?;
        let acl_differs = current_acl != opts.acl;

        if opts.dry_run {
            for (key, value) in &changed {
                let notice = match (crate::core::classify(key), current.get(*key)) {
                    (Some((base, _)), Some(old)) => {
                        format!("{path} {base} link change from {old} to {value}")
                    }
                    (Some(_), None) => format!("{path} add link {key} {value}"),
                    (None, Some(old)) => format!("{path} {key} change from {old} to {value}"),
                    (None, None) => format!("{path} add property {key} = {value}"),
                };
                report.notices.push(notice);
            }
            return Ok(());
        }

        if !changed.is_empty() {
            let mut merged = current;
            for (key, value) in &changed {
                merged.insert((*key).clone(), (*value).clone());
            }
            self.coord.set(path, &self.codec.encode(&merged))?;
        }
        if acl_differs {
            self.coord.set_acl(path, &opts.acl)?;
        }
        if !changed.is_empty() || acl_differs {
            report.updated += 1;
        }
        Ok(())
    }

    /// Depth-first deletion with ephemeral protection. Returns the notices
    /// and the count of (possibly simulated) deletions.
    pub(crate) fn delete_recursive(
        &self,
        path: &str,
        opts: &DeleteOptions,
    ) -> Result<ImportReport, CoordError> {
        let mut report = ImportReport::default();
        let root_ephemeral = self.is_ephemeral(path)?;
        self.delete_node(path, opts, &mut report)?;
        // The common trim case: the root alone is ephemeral-blocked, and
        // that is the entire story. Stay quiet about it when asked.
        if opts.ignore_if_ephemeral_root
            && root_ephemeral
            && !opts.force
            && report.deleted == 0
            && report.notices.len() == 1
        {
            report.notices.clear();
        }
        Ok(report)
    }

    fn is_ephemeral(&self, path: &str) -> Result<bool, CoordError> {
        let (_, meta) = self.coord.get(path)?;
        Ok(meta.is_ephemeral())
    }

    /// Returns true when the node was (or would be) deleted.
    fn delete_node(
        &self,
        path: &str,
        opts: &DeleteOptions,
        report: &mut ImportReport,
    ) -> Result<bool, CoordError> {
        let mut all_children_gone = true;
        for name in self.coord.get_children(path)? {
            let cpath = join_under(path, &name);
            all_children_gone &= self.delete_node(&cpath, opts, report)?;
        }

        if !all_children_gone {
            report
                .notices
                .push(format!("{path} not deleted due to ephemeral descendent."));
            return Ok(false);
        }

        if self.is_ephemeral(path)? && !opts.force {
            let notice = if opts.dry_run {
                format!("wouldn't delete {path} because it's ephemeral.")
            } else {
                format!("not deleting {path} because it's ephemeral.")
            };
            report.notices.push(notice);
            return Ok(false);
        }

        if opts.dry_run {
            report.notices.push(format!("would delete {path}."));
        } else {
            info!(path, "deleting");
            self.coord.delete(path)?;
            self.recovery.record_delete(path);
        }
        report.deleted += 1;
        Ok(true)
    }
}
