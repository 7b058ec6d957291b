//! Path resolution
//!
//! Walks an absolute path from a starting node, read-locking each node on the
//! way through the caller's transaction. Supports `*` / `**` wildcard children
//! and fault-back: when the target is missing, return the deepest existing
//! node (optionally the deepest one whose data satisfies a matcher).

use bitflags::bitflags;

use super::Node;
use crate::data::Perm;
use crate::error::{ArborError, Result};
use crate::txn::LockListTransaction;

bitflags! {
    /// Where wildcard children may stand in for a missing name
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WildcardBehavior: u32 {
        const ALLOW_IN_LEAF = 1;
        const ALLOW_IN_BRANCH = 2;
        const ALLOW_ANYWHERE = 3;
    }
}

impl WildcardBehavior {
    pub const NOT_ALLOWED: WildcardBehavior = WildcardBehavior::empty();
}

/// Predicate over node data used by fault-back resolution
pub trait DataMatcher {
    fn matches(&self, data: Option<&[u8]>) -> bool;
}

impl<F> DataMatcher for F
where
    F: Fn(Option<&[u8]>) -> bool,
{
    fn matches(&self, data: Option<&[u8]>) -> bool {
        self(data)
    }
}

/// Result of resolving a path down to its parent
#[derive(Debug, Default)]
pub struct PathParent {
    /// Deepest resolved parent (None when the path does not resolve)
    pub parent: Option<Node>,
    /// Name of the child under `parent` the path refers to
    pub last_child_name: Option<String>,
    /// Deepest node on the way whose data satisfied the matcher
    pub matched: Option<Node>,
    /// Depth of `parent`
    pub level: Option<usize>,
}

/// Result of resolving a full path
#[derive(Debug, Default)]
pub struct NodeLookup {
    pub node: Option<Node>,
    pub parent: Option<Node>,
    /// Depth of `node`
    pub level: Option<usize>,
}

/// Whether locking a node for `perm` needs a write lock
pub(crate) fn needs_write(perm: Perm) -> bool {
    !perm.is_empty() && perm != Perm::READ
}

fn check_absolute(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(ArborError::BadArguments(format!("path '{}' is not absolute", path)));
    }
    Ok(())
}

fn matches_data(node: &Node, matcher: Option<&dyn DataMatcher>) -> bool {
    matcher.is_some_and(|m| m.matches(node.data().as_deref()))
}

impl Node {
    /// Resolve everything but the last segment of `path`
    pub fn get_path_parent(
        &self,
        path: &str,
        txn: &mut dyn LockListTransaction,
        wildcards: WildcardBehavior,
        fault_back: bool,
        matcher: Option<&dyn DataMatcher>,
    ) -> Result<PathParent> {
        check_absolute(path)?;
        let mut level = self.level();
        txn.add_and_lock_ro(self, level)?;

        let pieces: Vec<&str> = path.split('/').collect();
        if path == "/" {
            return Ok(PathParent {
                parent: Some(self.clone()),
                last_child_name: None,
                matched: None,
                level: Some(level),
            });
        }

        let in_branch = wildcards.contains(WildcardBehavior::ALLOW_IN_BRANCH);
        let mut last_parent = self.clone();
        let mut double_star: Option<Node> = None;
        let mut matched = None;

        for name in &pieces[1..pieces.len() - 1] {
            let child = last_parent.try_get_child(name, in_branch)?;

            if let Some(c) = &child {
                if !wildcards.is_empty() && c.name() == "**" {
                    double_star = Some(c.clone());
                }
            }

            let Some(child) = child else {
                if let Some(ds) = &double_star {
                    // "**" swallows the remaining segments
                    let parent = ds.parent();
                    let level = parent.as_ref().map(Node::level);
                    return Ok(PathParent {
                        parent,
                        last_child_name: Some("**".to_string()),
                        matched,
                        level,
                    });
                }
                if fault_back {
                    return Ok(PathParent {
                        parent: Some(last_parent),
                        last_child_name: Some(name.to_string()),
                        matched,
                        level: Some(level),
                    });
                }
                return Ok(PathParent::default());
            };

            level += 1;
            txn.add_and_lock_ro(&child, level)?;
            last_parent = child;

            if fault_back && matches_data(&last_parent, matcher) {
                matched = Some(last_parent.clone());
            }
        }

        let mut last_child_name = pieces[pieces.len() - 1].to_string();
        if let Some(ds) = &double_star {
            if in_branch && last_parent.try_get_child(&last_child_name, true)?.is_none() {
                if let Some(parent) = ds.parent() {
                    level = parent.level();
                    last_parent = parent;
                    last_child_name = "**".to_string();
                }
            }
        }

        if fault_back && matches_data(&last_parent, matcher) {
            matched = Some(last_parent.clone());
        }

        Ok(PathParent {
            parent: Some(last_parent),
            last_child_name: Some(last_child_name),
            matched,
            level: Some(level),
        })
    }

    /// Resolve `path` to a node, locking it for `access_node` and its parent
    /// for `access_parent`
    ///
    /// A write permission on the parent upgrades its lock before the child
    /// lookup. Fault-back with a matcher is read-only.
    #[allow(clippy::too_many_arguments)]
    pub fn get_node(
        &self,
        path: &str,
        txn: &mut dyn LockListTransaction,
        wildcards: WildcardBehavior,
        access_node: Perm,
        access_parent: Perm,
        fault_back: bool,
        matcher: Option<&dyn DataMatcher>,
    ) -> Result<NodeLookup> {
        let lookup = self.just_get_node(path, txn, wildcards, access_parent, fault_back, matcher)?;

        let Some(node) = &lookup.node else {
            return Ok(lookup);
        };
        let level = lookup.level.unwrap_or_else(|| node.level());

        if access_node == Perm::READ {
            txn.add_and_lock_ro(node, level)?;
        } else if needs_write(access_node) {
            txn.add_and_lock_rw(node, access_node, level, false)?;
        }

        Ok(NodeLookup {
            parent: node.parent(),
            node: lookup.node,
            level: Some(level),
        })
    }

    fn just_get_node(
        &self,
        path: &str,
        txn: &mut dyn LockListTransaction,
        wildcards: WildcardBehavior,
        access_parent: Perm,
        fault_back: bool,
        matcher: Option<&dyn DataMatcher>,
    ) -> Result<NodeLookup> {
        check_absolute(path)?;
        if path == "/" {
            let level = self.level();
            return Ok(NodeLookup {
                node: Some(self.clone()),
                parent: self.parent(),
                level: Some(level),
            });
        }

        let matching = fault_back && matcher.is_some();
        if matching && needs_write(access_parent) {
            return Err(ArborError::BadArguments(
                "fault-back with a data matcher is not allowed for write access".to_string(),
            ));
        }

        let pp = self.get_path_parent(path, txn, wildcards, fault_back, matcher)?;
        let fallback = |matched: Option<Node>| {
            let level = matched.as_ref().map(Node::level);
            NodeLookup {
                parent: matched.as_ref().and_then(Node::parent),
                node: matched,
                level,
            }
        };

        let (Some(parent), Some(name)) = (pp.parent, pp.last_child_name) else {
            return Ok(if matching { fallback(pp.matched) } else { NodeLookup::default() });
        };
        let parent_level = pp.level.unwrap_or_else(|| parent.level());

        if needs_write(access_parent) {
            txn.add_and_lock_rw(&parent, access_parent, parent_level, false)?;
        }

        let child = parent.try_get_child(&name, wildcards.contains(WildcardBehavior::ALLOW_IN_LEAF))?;
        let Some(child) = child else {
            return Ok(if matching { fallback(pp.matched) } else { NodeLookup::default() });
        };

        if matching {
            txn.add_and_lock_ro(&child, parent_level + 1)?;
            if !matches_data(&child, matcher) {
                return Ok(fallback(pp.matched));
            }
        }

        Ok(NodeLookup {
            node: Some(child),
            parent: Some(parent),
            level: Some(parent_level + 1),
        })
    }

    /// Resolve `path` without taking any tree locks
    ///
    /// Used to collect the lock set for batched locking; the result must be
    /// re-validated once the locks are held. Nodes deleted concurrently may
    /// be returned detached.
    pub fn find_unlocked(&self, path: &str) -> Result<Option<Node>> {
        check_absolute(path)?;
        let mut cur = self.clone();
        for name in path.split('/').filter(|p| !p.is_empty()) {
            match cur.peek_child(name) {
                Some(child) => cur = child,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }
}

/// Matches nodes whose data starts with a given prefix
#[derive(Debug, Clone)]
pub struct DataPrefix(pub bytes::Bytes);

impl DataMatcher for DataPrefix {
    fn matches(&self, data: Option<&[u8]>) -> bool {
        data.is_some_and(|d| d.starts_with(&self.0))
    }
}
