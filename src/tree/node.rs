//! Tree nodes
//!
//! `Node` is a cloneable handle on a record. Whether a node is *minimal*
//! (no children, no watchers) or *complete* is a property of the record's
//! body, so promoting or demoting a node never invalidates other handles.
//!
//! All tree-structure operations require the caller to hold the right
//! hierarchical locks (see `lock`); the record's own short-held locks only
//! keep memory consistent.

use std::sync::Arc;

use bytes::Bytes;

use super::children::names_after;
use super::ChildrenMap;
use crate::config::ChildrenThresholds;
use crate::data::{
    AclList, ChangeKind, Perm, Scheme, Stat, WatchedEvent, WatchedEventType, Watcher, WatcherKind,
    WatcherSet,
};
use crate::error::{ArborError, Result};
use crate::lock::{HeldLocks, LockMode, LockPool, LockSlot};
use crate::persist::PersistedData;
use crate::session::SessionAuth;
use crate::txn::{CommitAction, LockListTransaction, UndoOp};

/// Variant of a node, stored on its record
pub(crate) enum NodeBody {
    Minimal,
    Complete {
        children: ChildrenMap,
        watchers: Option<WatcherSet>,
    },
}

impl NodeBody {
    /// Complete the body if needed and expose its parts
    fn promote(&mut self) -> (&mut ChildrenMap, &mut Option<WatcherSet>) {
        if matches!(self, NodeBody::Minimal) {
            *self = NodeBody::Complete {
                children: ChildrenMap::new(),
                watchers: None,
            };
        }
        match self {
            NodeBody::Complete { children, watchers } => (children, watchers),
            NodeBody::Minimal => unreachable!("promoted above"),
        }
    }

    /// Drop back to minimal when nothing needs the complete form
    fn revisit(&mut self) {
        if let NodeBody::Complete { children, watchers } = self {
            if children.is_empty() && watchers.is_none() {
                *self = NodeBody::Minimal;
            }
        }
    }
}

/// Handle on one tree node
#[derive(Clone)]
pub struct Node {
    persisted: Arc<PersistedData>,
}

impl Node {
    /// Wrap a record; the body keeps whatever variant the record has
    pub fn new(persisted: Arc<PersistedData>) -> Self {
        Self { persisted }
    }

    /// Wrap a freshly loaded record, completing it when it will get children
    pub fn create_node(persisted: Arc<PersistedData>) -> Self {
        if persisted.children_count() > 0 {
            persisted.body.lock().promote();
        }
        Self { persisted }
    }

    // -------------------------------------------------------------------------
    // Record Accessors
    // -------------------------------------------------------------------------

    pub fn persisted(&self) -> &Arc<PersistedData> {
        &self.persisted
    }

    pub fn id(&self) -> u64 {
        self.persisted.id()
    }

    pub fn name(&self) -> String {
        self.persisted.name()
    }

    pub fn is_ephemeral(&self) -> bool {
        self.persisted.is_ephemeral()
    }

    pub fn is_root(&self) -> bool {
        self.persisted.parent().is_none() && self.persisted.name() == "/"
    }

    pub fn parent(&self) -> Option<Node> {
        self.persisted.parent().map(Node::new)
    }

    pub fn stat(&self) -> Stat {
        self.persisted.stat()
    }

    pub fn data(&self) -> Option<Bytes> {
        self.persisted.data()
    }

    pub fn set_data(&self, data: Option<Bytes>) {
        self.persisted.set_data(data);
    }

    pub fn acl(&self) -> Option<AclList> {
        self.persisted.acl()
    }

    pub fn set_acl(&self, acl: Option<AclList>) {
        self.persisted.set_acl(acl);
    }

    pub fn is_version(&self, version: i32) -> bool {
        self.persisted.stat().is_version(version)
    }

    pub fn is_child_version(&self, version: i32) -> bool {
        self.persisted.stat().is_child_version(version)
    }

    pub fn is_acl_version(&self, version: i32) -> bool {
        self.persisted.stat().is_acl_version(version)
    }

    /// Lock pool hash; stable for the life of the record
    pub fn hash_code(&self) -> u64 {
        self.persisted.id() & 0x7fff_ffff
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.persisted.body.lock(), NodeBody::Complete { .. })
    }

    pub fn same_as(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.persisted, &other.persisted)
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self) -> Vec<Node> {
        let mut out = Vec::new();
        let mut cur = self.persisted.parent();
        while let Some(p) = cur {
            cur = p.parent();
            out.push(Node::new(p));
        }
        out
    }

    /// Depth below the root (root is 0)
    pub fn level(&self) -> usize {
        let mut level = 0;
        let mut cur = self.persisted.parent();
        while let Some(p) = cur {
            level += 1;
            cur = p.parent();
        }
        level
    }

    /// Absolute path, built by walking parent links
    pub fn build_path(&self) -> String {
        let mut names = vec![self.name()];
        let mut cur = self.persisted.parent();
        while let Some(p) = cur {
            names.push(p.name());
            cur = p.parent();
        }
        names.pop();

        if names.is_empty() {
            return "/".to_string();
        }

        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        path
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.persisted.is_detached() {
            return Err(ArborError::InvalidState(format!(
                "node {} (id {}) is detached",
                self.name(),
                self.id()
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Children
    // -------------------------------------------------------------------------

    pub fn children_count(&self) -> usize {
        match &*self.persisted.body.lock() {
            NodeBody::Minimal => 0,
            NodeBody::Complete { children, .. } => children.len(),
        }
    }

    pub fn children(&self) -> Vec<Node> {
        match &*self.persisted.body.lock() {
            NodeBody::Minimal => Vec::new(),
            NodeBody::Complete { children, .. } => children.nodes(),
        }
    }

    pub fn child_names(&self) -> Vec<String> {
        match &*self.persisted.body.lock() {
            NodeBody::Minimal => Vec::new(),
            NodeBody::Complete { children, .. } => children.names(),
        }
    }

    pub fn children_repr(&self) -> Option<super::ChildrenRepr> {
        match &*self.persisted.body.lock() {
            NodeBody::Minimal => None,
            NodeBody::Complete { children, .. } => Some(children.repr()),
        }
    }

    /// Look up a direct child
    ///
    /// With `allow_wildcards`, a missing name falls back to a `*` child,
    /// then to a `**` child.
    pub fn try_get_child(&self, name: &str, allow_wildcards: bool) -> Result<Option<Node>> {
        self.ensure_attached()?;

        let body = self.persisted.body.lock();
        let NodeBody::Complete { children, .. } = &*body else {
            return Ok(None);
        };

        let found = children.get(name);
        if found.is_some() || !allow_wildcards {
            return Ok(found);
        }
        Ok(children.get("*").or_else(|| children.get("**")))
    }

    /// Direct child lookup that tolerates a detached node
    pub(crate) fn peek_child(&self, name: &str) -> Option<Node> {
        match &*self.persisted.body.lock() {
            NodeBody::Minimal => None,
            NodeBody::Complete { children, .. } => children.get(name),
        }
    }

    pub fn add_child(&self, child: &Node, thresholds: &ChildrenThresholds) -> Result<()> {
        self.ensure_attached()?;
        {
            let mut body = self.persisted.body.lock();
            let (children, _) = body.promote();
            children.insert(child.name(), child.clone())?;
            children.rescale(thresholds);
        }
        self.link(child);
        Ok(())
    }

    /// Bulk add used when loading a subtree
    pub fn add_children(&self, new_children: &[Node], thresholds: &ChildrenThresholds) -> Result<()> {
        self.ensure_attached()?;
        {
            let mut body = self.persisted.body.lock();
            let (children, _) = body.promote();
            for child in new_children {
                children.insert(child.name(), child.clone())?;
            }
            children.rescale(thresholds);
        }
        for child in new_children {
            self.link(child);
        }
        Ok(())
    }

    fn link(&self, child: &Node) {
        if child.is_ephemeral() {
            child.persisted.set_parent(Some(&self.persisted));
        } else {
            self.persisted.add_child(&child.persisted);
        }
    }

    pub fn remove_child(&self, name: &str, thresholds: &ChildrenThresholds) -> Result<Node> {
        self.ensure_attached()?;

        let removed = {
            let mut body = self.persisted.body.lock();
            let removed = match &mut *body {
                NodeBody::Minimal => None,
                NodeBody::Complete { children, .. } => {
                    let removed = children.remove(name);
                    children.rescale(thresholds);
                    removed
                }
            };
            body.revisit();
            removed
        };

        let Some(child) = removed else {
            tracing::error!(parent = %self.name(), child = name, "remove of unknown child");
            return Err(ArborError::Invariant(format!(
                "{} has no child named {}",
                self.name(),
                name
            )));
        };

        if !child.is_ephemeral() {
            self.persisted.remove_child(&child.persisted)?;
        }
        Ok(child)
    }

    /// Page through child names
    ///
    /// `condition` is empty (all names, ordinal order) or `">:<top>:<start>"`:
    /// at most `top` names strictly greater than `start`.
    pub fn retrieve_children(&self, condition: Option<&str>, max_children: usize) -> Result<Vec<String>> {
        let (top, start) = match condition.filter(|c| !c.is_empty()) {
            None => (usize::MAX, None),
            Some(c) => {
                let (top, start) = parse_retrieval_condition(c, max_children)?;
                (top, Some(start))
            }
        };

        // Guarded children are scanned without the body lock
        let guarded = {
            let body = self.persisted.body.lock();
            match &*body {
                NodeBody::Minimal => return Ok(Vec::new()),
                NodeBody::Complete { children, .. } => match children.guarded() {
                    Some(shared) => shared,
                    None => return Ok(children.sorted_names_after(start, top)),
                },
            }
        };

        let map = guarded.lock();
        Ok(names_after(&map, start, top))
    }

    // -------------------------------------------------------------------------
    // Watchers
    // -------------------------------------------------------------------------

    pub fn add_watcher(&self, watcher: Arc<dyn Watcher>) -> Result<()> {
        self.ensure_attached()?;
        let mut body = self.persisted.body.lock();
        let (_, watchers) = body.promote();
        watchers.get_or_insert_with(Vec::new).push(watcher);
        Ok(())
    }

    pub fn remove_watcher(&self, watcher: &Arc<dyn Watcher>) -> Result<bool> {
        self.ensure_attached()?;
        let mut body = self.persisted.body.lock();
        let removed = match &mut *body {
            NodeBody::Minimal => false,
            NodeBody::Complete { watchers, .. } => {
                let Some(set) = watchers.as_mut() else {
                    return Ok(false);
                };
                let before = set.len();
                set.retain(|w| !Arc::ptr_eq(w, watcher));
                let removed = set.len() != before;
                if set.is_empty() {
                    *watchers = None;
                }
                removed
            }
        };
        body.revisit();
        Ok(removed)
    }

    /// Replace the watcher collection wholesale
    pub fn reset_watchers(&self, new_watchers: Option<WatcherSet>) {
        let mut body = self.persisted.body.lock();
        let new_watchers = new_watchers.filter(|w| !w.is_empty());
        if new_watchers.is_some() || matches!(*body, NodeBody::Complete { .. }) {
            let (_, watchers) = body.promote();
            *watchers = new_watchers;
        }
        body.revisit();
    }

    pub fn watchers(&self) -> Option<WatcherSet> {
        match &*self.persisted.body.lock() {
            NodeBody::Minimal => None,
            NodeBody::Complete { watchers, .. } => watchers.clone(),
        }
    }

    pub fn has_watchers(&self) -> bool {
        self.watchers().is_some()
    }

    pub fn watcher_list(&self) -> Vec<String> {
        self.watchers()
            .map(|set| set.iter().map(|w| w.describe()).collect())
            .unwrap_or_default()
    }

    /// Notify watchers of a change now
    pub fn trigger_watchers(&self, change: ChangeKind, path: &str) {
        if let Some((watchers, event)) = self.take_watchers(change, path) {
            fire_watchers(&watchers, &event);
        }
    }

    /// Notify watchers of a change when `txn` commits
    ///
    /// Multi-use watchers stay registered, one-use watchers are removed now.
    /// The original watcher set is restored if the transaction aborts.
    pub fn schedule_trigger_watchers(
        &self,
        change: ChangeKind,
        path: &str,
        txn: &mut dyn LockListTransaction,
    ) -> Result<()> {
        let Some((original, event)) = self.take_watchers(change, path) else {
            return Ok(());
        };

        txn.run_on_commit(CommitAction::FireWatchers {
            watchers: original.clone(),
            event,
        })?;
        txn.run_on_abort(UndoOp::RestoreWatchers {
            node: self.clone(),
            watchers: Some(original),
        })
    }

    /// Detach the current watcher set, keeping multi-use watchers registered
    fn take_watchers(&self, change: ChangeKind, path: &str) -> Option<(WatcherSet, WatchedEvent)> {
        let event_type = WatchedEventType::from_change(change)?;

        let original = {
            let mut body = self.persisted.body.lock();
            let NodeBody::Complete { watchers, .. } = &mut *body else {
                return None;
            };
            let original = watchers.take()?;
            let remaining: WatcherSet = original
                .iter()
                .filter(|w| !w.kind().contains(WatcherKind::ONE_USE))
                .cloned()
                .collect();
            if !remaining.is_empty() {
                *watchers = Some(remaining);
            }
            body.revisit();
            original
        };

        let (data, stat) = match event_type {
            WatchedEventType::NodeCreated | WatchedEventType::NodeDataChanged => {
                (self.data(), Some(self.stat()))
            }
            WatchedEventType::NodeChildrenChanged => (None, Some(self.stat())),
            WatchedEventType::NodeDeleted => (None, None),
        };

        let event = WatchedEvent {
            event_type,
            path: path.to_string(),
            data,
            stat,
        };
        Some((original, event))
    }

    // -------------------------------------------------------------------------
    // Access Control
    // -------------------------------------------------------------------------

    /// Check `perm` against the node ACL
    pub fn acl_allows(&self, auth: &SessionAuth, perm: Perm) -> Result<()> {
        if auth.is_super_session {
            return Ok(());
        }
        let Some(acl) = self.persisted.acl() else {
            return Ok(());
        };
        if acl.is_empty() {
            return Ok(());
        }

        let identity = auth.client_identity.as_deref().unwrap_or("");
        let digest = auth.client_digest.as_deref().unwrap_or("");

        for entry in acl.iter().filter(|a| a.perms.intersects(perm)) {
            let granted = match entry.id.scheme {
                Scheme::World => true,
                Scheme::Authenticated => !identity.is_empty() || !digest.is_empty(),
                Scheme::Host => identity == entry.id.identifier,
                Scheme::Ip => auth.client_ip.as_deref() == Some(entry.id.identifier.as_str()),
                Scheme::Digest => digest
                    .strip_prefix("digest:")
                    .is_some_and(|d| d == entry.id.identifier),
            };
            if granted {
                return Ok(());
            }
        }

        Err(ArborError::access_denied(
            self.build_path(),
            format!("{:?} not granted to {}", perm, auth),
        ))
    }

    // -------------------------------------------------------------------------
    // Hierarchical Locks
    // -------------------------------------------------------------------------

    /// Lock object guarding this node at `level` (None when lock-free)
    pub fn lock_slot(&self, pool: &LockPool, level: usize, mode: LockMode) -> Option<LockSlot> {
        pool.find_lock(level, self.hash_code(), mode)
    }

    /// Read-lock this node; `Ok(false)` when no new lock was taken
    pub fn acquire_lock_ro(&self, pool: &LockPool, level: usize, held: &mut HeldLocks) -> Result<bool> {
        self.acquire_lock(pool, level, LockMode::Read, held)
    }

    /// Write-lock this node, upgrading a held read lock
    pub fn acquire_lock_rw(&self, pool: &LockPool, level: usize, held: &mut HeldLocks) -> Result<bool> {
        self.acquire_lock(pool, level, LockMode::Write, held)
    }

    fn acquire_lock(
        &self,
        pool: &LockPool,
        level: usize,
        mode: LockMode,
        held: &mut HeldLocks,
    ) -> Result<bool> {
        let Some(slot) = self.lock_slot(pool, level, mode) else {
            return Ok(false);
        };
        held.acquire(pool, slot, mode, level, false, || self.name())
    }
}

/// Deliver `event` to each watcher, with payload only for those asking for it
pub(crate) fn fire_watchers(watchers: &WatcherSet, event: &WatchedEvent) {
    let bare = event.without_data();
    for watcher in watchers {
        if watcher.kind().contains(WatcherKind::INCLUDE_DATA) {
            watcher.process(event);
        } else {
            watcher.process(&bare);
        }
    }
}

fn parse_retrieval_condition(condition: &str, max_children: usize) -> Result<(usize, &str)> {
    let bad = || ArborError::BadArguments(format!("retrieval condition '{}'", condition));

    let rest = condition.strip_prefix(">:").ok_or_else(bad)?;
    let (top, start) = rest.split_once(':').ok_or_else(bad)?;
    let top: i64 = top.parse().map_err(|_| bad())?;
    if top < 0 || top as u64 > max_children as u64 {
        return Err(bad());
    }
    Ok((top as usize, start))
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}
