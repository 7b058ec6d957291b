//! Engine Module
//!
//! The data tree that coordinates all components.
//!
//! ## Responsibilities
//! - Own the root node, the record factories and the lock pool
//! - Run each request inside one transaction and complete it exactly once
//! - Implement the request handlers on top of path resolution and staging
//!
//! ## Concurrency Model: Hierarchical Reader/Writer Locks
//!
//! - **Reads** resolve the path read-locking every node from the root down,
//!   then read the target. Lock-free sessions skip tree locks entirely.
//! - **Writes** resolve the same way, then write-lock the node(s) they
//!   mutate. A write lock on a node excludes its whole subtree.
//! - **Move** touches two branches; its lock set is collected up front and
//!   acquired in global order, then the tree is re-validated.
//!
//! A failed handler marks the transaction for abort; the undo log restores
//! the in-memory tree before locks are released.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::config::Config;
use crate::data::{convert_time, Acl, ChangeKind, Perm, Stat, Watcher};
use crate::error::{ArborError, Result};
use crate::instrumentation::{Instrumentation, TracingInstrumentation};
use crate::lock::LockPool;
use crate::persist::{
    ChangeListFactory, IdProvider, InMemoryFactory, PersistedDataFactory, ReplicationTask,
};
use crate::request::{GetDataOptions, Request, Response};
use crate::session::{OperationOverrides, SessionAuth};
use crate::tree::{DataMatcher, DataPrefix, Node, WildcardBehavior};
use crate::txn::{
    LockDownSet, LockListForRo, LockListForRw, LockListTransaction, TxnContext, Undelete, UndoOp,
    XidProvider,
};

/// Upper bound on `top` in a children retrieval condition
pub const MAX_CHILDREN_PER_REQUEST: usize = 10_000;

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Pin the transaction id/time (replayed requests)
    pub overrides: Option<OperationOverrides>,

    /// Session may only modify ephemeral nodes
    pub only_on_ephemeral: bool,

    /// Block until the change list is replicated
    pub synchronous: bool,
}

/// Outcome of `execute_with`
#[derive(Debug)]
pub struct Executed {
    pub response: Response,
    pub replication: ReplicationTask,
}

/// The in-memory data tree
pub struct DataTree {
    ctx: Arc<TxnContext>,
    root: Node,
    durable: Arc<dyn PersistedDataFactory>,
    ephemeral: Arc<dyn PersistedDataFactory>,
}

impl DataTree {
    /// Create an empty tree (only `/`) with tracing instrumentation
    pub fn open(config: Config, changes: Arc<dyn ChangeListFactory>) -> Result<Self> {
        Self::open_with(config, changes, Arc::new(TracingInstrumentation))
    }

    /// Create an empty tree reporting to `instrumentation`
    pub fn open_with(
        config: Config,
        changes: Arc<dyn ChangeListFactory>,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Result<Self> {
        // Step 1: Reject inconsistent settings up front
        config.validate()?;

        // Step 2: Build the lock pool
        let pool = Arc::new(LockPool::new(&config.lock, Arc::clone(&instrumentation))?);

        // Step 3: Factories share one id space
        let ids = Arc::new(IdProvider::new());
        let durable: Arc<dyn PersistedDataFactory> =
            Arc::new(InMemoryFactory::durable(Arc::clone(&ids)));
        let ephemeral: Arc<dyn PersistedDataFactory> = Arc::new(InMemoryFactory::ephemeral(ids));

        // Step 4: Root node
        let root_record = durable.create_new("/");
        root_record.set_stat(Stat::created(0, convert_time(SystemTime::now())));
        let root = Node::create_node(root_record);

        tracing::info!(
            strategy = ?config.lock.strategy,
            readers_unlocked = config.lock.readers_unlocked,
            "data tree opened"
        );

        let ctx = Arc::new(TxnContext {
            config: Arc::new(config),
            pool,
            lockdown: Arc::new(LockDownSet::new()),
            changes,
            instrumentation,
            xids: XidProvider::default(),
        });

        Ok(Self {
            ctx,
            root,
            durable,
            ephemeral,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn context(&self) -> &Arc<TxnContext> {
        &self.ctx
    }

    pub fn lock_pool(&self) -> &Arc<LockPool> {
        &self.ctx.pool
    }

    pub fn lockdown(&self) -> &LockDownSet {
        &self.ctx.lockdown
    }

    pub fn durable_factory(&self) -> &Arc<dyn PersistedDataFactory> {
        &self.durable
    }

    pub fn ephemeral_factory(&self) -> &Arc<dyn PersistedDataFactory> {
        &self.ephemeral
    }

    /// Live nodes, root included
    pub fn node_count(&self) -> u64 {
        self.durable.total_nodes() + self.ephemeral.total_nodes()
    }

    fn factory_for(&self, node: &Node) -> &Arc<dyn PersistedDataFactory> {
        if node.is_ephemeral() {
            &self.ephemeral
        } else {
            &self.durable
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub fn begin(&self, auth: SessionAuth) -> LockListForRw {
        self.begin_with(auth, None, false)
    }

    pub fn begin_with(
        &self,
        auth: SessionAuth,
        overrides: Option<&OperationOverrides>,
        only_on_ephemeral: bool,
    ) -> LockListForRw {
        LockListForRw::new(Arc::clone(&self.ctx), auth, overrides, only_on_ephemeral)
    }

    pub fn begin_read(&self, auth: SessionAuth) -> LockListForRo {
        LockListForRo::new(auth)
    }

    /// Run one request in its own transaction
    pub fn execute(&self, request: &Request, auth: &SessionAuth) -> Result<Response> {
        self.execute_with(request, auth, &ExecuteOptions::default())
            .map(|executed| executed.response)
    }

    pub fn execute_with(
        &self,
        request: &Request,
        auth: &SessionAuth,
        options: &ExecuteOptions,
    ) -> Result<Executed> {
        if request.is_read_only() && auth.is_lock_free_session {
            let mut txn = self.begin_read(auth.clone());
            let response = self.execute_in(request, &mut txn)?;
            return Ok(Executed {
                response,
                replication: ReplicationTask::finished(),
            });
        }

        let mut txn = self.begin_with(
            auth.clone(),
            options.overrides.as_ref(),
            options.only_on_ephemeral,
        );
        txn.set_finish_synchronous(options.synchronous);

        let result = self.execute_in(request, &mut txn);
        if let Err(e) = &result {
            tracing::debug!(tx_id = txn.tx_id(), request = ?request.request_type(), error = %e, "request failed, aborting");
            txn.mark_for_abort();
        }

        let completion = txn.complete();
        let response = result?;
        let completion = completion?;

        Ok(Executed {
            response,
            replication: completion.replication,
        })
    }

    /// Run a request inside a caller-owned transaction (not completed here)
    ///
    /// A `Move` batches its locks in (level, slot) order. That order is only
    /// global while the transaction holds nothing else, so a move has to be
    /// the first request run in a transaction; `Multi` enforces this.
    pub fn execute_in(
        &self,
        request: &Request,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        match request {
            Request::Create {
                path,
                data,
                acl,
                ephemeral,
            } => self.create(path, data.clone(), acl.clone(), *ephemeral, txn),
            Request::Delete {
                path,
                version,
                recursive,
            } => self.delete(path, *version, *recursive, txn),
            Request::SetData {
                path,
                data,
                version,
            } => self.set_data(path, data.clone(), *version, txn),
            Request::SetAcl {
                path,
                acl,
                aversion,
            } => self.set_acl(path, acl.clone(), *aversion, txn),
            Request::Move {
                path,
                new_parent,
                version,
            } => self.move_node(path, new_parent, *version, txn),
            Request::GetData {
                path,
                watcher,
                options,
            } => self.get_data(path, watcher.as_ref(), options, txn),
            Request::GetChildren {
                path,
                retrieval_condition,
            } => self.get_children(path, retrieval_condition.as_deref(), txn),
            Request::Exists { path } => self.exists(path, txn),
            Request::Multi(requests) => {
                let mut responses = Vec::with_capacity(requests.len());
                for (i, request) in requests.iter().enumerate() {
                    if matches!(request, Request::Multi(_)) {
                        return Err(ArborError::BadArguments("nested multi".to_string()));
                    }
                    if i > 0 && matches!(request, Request::Move { .. }) {
                        return Err(ArborError::BadArguments(
                            "move must be the first request of a multi".to_string(),
                        ));
                    }
                    responses.push(self.execute_in(request, txn)?);
                }
                Ok(Response::Multi(responses))
            }
        }
    }

    // =========================================================================
    // Write Handlers
    // =========================================================================

    fn create(
        &self,
        path: &str,
        data: Option<Bytes>,
        acl: Option<Vec<Acl>>,
        ephemeral: bool,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        let (parent_path, name) = split_path(path)?;
        let thresholds = &self.ctx.config.children;

        // Step 1: Resolve and write-lock the parent
        let pp = self
            .root
            .get_path_parent(path, txn, WildcardBehavior::NOT_ALLOWED, false, None)?;
        let (Some(parent), Some(_)) = (pp.parent, pp.last_child_name) else {
            return Err(ArborError::NoNode(parent_path.to_string()));
        };
        let level = pp.level.unwrap_or_else(|| parent.level());
        txn.add_and_lock_rw(&parent, Perm::CREATE, level, ephemeral)?;

        if parent.try_get_child(name, false)?.is_some() {
            return Err(ArborError::NodeExists(path.to_string()));
        }
        if parent.is_ephemeral() {
            return Err(ArborError::BadArguments(format!(
                "ephemeral node {} cannot have children",
                parent_path
            )));
        }

        // Step 2: Build the record, staged before anything can fail
        let prev_parent_stat = snap(txn, &parent)?;
        let factory = if ephemeral {
            &self.ephemeral
        } else {
            &self.durable
        };
        let record = factory.create_new(name);
        record.set_stat(Stat::created(txn.tx_id(), txn.tx_time()));
        record.set_data(data);
        record.set_acl(acl.map(Arc::new));
        record.set_parent(Some(parent.persisted()));
        let child = Node::create_node(record);
        let (tx_id, tx_time) = (txn.tx_id(), txn.tx_time());
        txn.append_create(factory, &child, tx_time)?;

        // Step 3: Lock and link the child
        txn.add_and_lock_rw(&child, Perm::NONE, level + 1, ephemeral)?;
        parent.add_child(&child, thresholds)?;
        parent
            .persisted()
            .update_stat(|s| s.touch_children(tx_id, 1, ephemeral));
        txn.append_add_child(&parent, &child, tx_time, Some(prev_parent_stat))?;

        // Step 4: Notify
        child.schedule_trigger_watchers(ChangeKind::NodeCreated, path, txn)?;
        parent.schedule_trigger_watchers(ChangeKind::ChildrenAdded, parent_path, txn)?;

        Ok(Response::Created {
            path: path.to_string(),
            stat: child.stat(),
        })
    }

    fn delete(
        &self,
        path: &str,
        version: i32,
        recursive: bool,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        let (parent_path, _) = split_path(path)?;
        let thresholds = &self.ctx.config.children;

        let lookup = self.root.get_node(
            path,
            txn,
            WildcardBehavior::NOT_ALLOWED,
            Perm::NONE,
            Perm::DELETE,
            false,
            None,
        )?;
        let (Some(node), Some(parent)) = (lookup.node, lookup.parent) else {
            return Err(ArborError::NoNode(path.to_string()));
        };
        let level = lookup.level.unwrap_or_else(|| node.level());
        txn.add_and_lock_rw(&node, Perm::NONE, level, node.is_ephemeral())?;

        if !node.is_version(version) {
            return Err(ArborError::BadVersion(path.to_string()));
        }
        let child_count = node.children_count();
        if child_count > 0 && !recursive {
            return Err(ArborError::NotEmpty(path.to_string()));
        }

        let name = node.name();
        let ephemeral = node.is_ephemeral();
        let prev_child_stat = snap(txn, &node)?;
        let prev_parent_stat = snap(txn, &parent)?;
        let tx_id = txn.tx_id();
        let tx_time = txn.tx_time();

        if child_count > 0 {
            // The write lock on `node` covers the whole subtree
            let subtree: Vec<(Node, String)> = collect_subtree(&node)
                .into_iter()
                .map(|n| {
                    let p = n.build_path();
                    (n, p)
                })
                .collect();

            let mut undelete = Undelete::new();
            for (n, _) in &subtree {
                undelete.push(self.factory_for(n), n);
            }
            undelete.push(self.factory_for(&node), &node);
            txn.append_remove_node_and_all_children(&node, tx_time, Some(undelete))?;

            for (n, p) in &subtree {
                n.schedule_trigger_watchers(ChangeKind::NodeDeleted, p, txn)?;
                self.factory_for(n).delete(n.persisted());
            }

            parent.remove_child(&name, thresholds)?;
            parent
                .persisted()
                .update_stat(|s| s.touch_children(tx_id, -1, ephemeral));
            self.factory_for(&node).delete(node.persisted());

            txn.run_on_abort(UndoOp::RelinkChild {
                parent: parent.clone(),
                child: node.clone(),
                prev_child_stat,
                prev_parent_stat,
                undelete: Undelete::new(),
            })?;
        } else {
            let undelete = Undelete::single(self.factory_for(&node), &node);
            parent.remove_child(&name, thresholds)?;
            parent
                .persisted()
                .update_stat(|s| s.touch_children(tx_id, -1, ephemeral));
            self.factory_for(&node).delete(node.persisted());

            txn.append_remove(
                &parent,
                &node,
                tx_time,
                Some(prev_child_stat),
                Some(prev_parent_stat),
                undelete,
            )?;
        }

        node.schedule_trigger_watchers(ChangeKind::NodeDeleted, path, txn)?;
        parent.schedule_trigger_watchers(ChangeKind::ChildrenRemoved, parent_path, txn)?;

        Ok(Response::Deleted)
    }

    fn set_data(
        &self,
        path: &str,
        data: Option<Bytes>,
        version: i32,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        let lookup = self.root.get_node(
            path,
            txn,
            WildcardBehavior::NOT_ALLOWED,
            Perm::WRITE,
            Perm::NONE,
            false,
            None,
        )?;
        let node = lookup
            .node
            .ok_or_else(|| ArborError::NoNode(path.to_string()))?;

        if !node.is_version(version) {
            return Err(ArborError::BadVersion(path.to_string()));
        }

        let prev_stat = snap(txn, &node)?;
        let prev_data = node.data();
        let (tx_id, tx_time) = (txn.tx_id(), txn.tx_time());
        let len = data.as_ref().map_or(0, Bytes::len);

        node.set_data(data);
        let stat = node
            .persisted()
            .update_stat(|s| s.touch_data(tx_id, tx_time, len));
        txn.append_set_data(&node, tx_time, prev_data, Some(prev_stat))?;

        node.schedule_trigger_watchers(ChangeKind::DataChanged, path, txn)?;
        Ok(Response::Stat(stat))
    }

    fn set_acl(
        &self,
        path: &str,
        acl: Option<Vec<Acl>>,
        aversion: i32,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        let lookup = self.root.get_node(
            path,
            txn,
            WildcardBehavior::NOT_ALLOWED,
            Perm::ADMIN,
            Perm::NONE,
            false,
            None,
        )?;
        let node = lookup
            .node
            .ok_or_else(|| ArborError::NoNode(path.to_string()))?;

        if !node.is_acl_version(aversion) {
            return Err(ArborError::BadVersion(path.to_string()));
        }

        let prev_stat = snap(txn, &node)?;
        let prev_acl = node.acl();

        let tx_time = txn.tx_time();

        node.set_acl(acl.map(Arc::new));
        let stat = node.persisted().update_stat(|s| s.touch_acl());
        txn.append_set_acl(&node, tx_time, prev_acl, Some(prev_stat))?;

        node.schedule_trigger_watchers(ChangeKind::AclChanged, path, txn)?;
        Ok(Response::Stat(stat))
    }

    fn move_node(
        &self,
        path: &str,
        new_parent_path: &str,
        version: i32,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        let (src_parent_path, name) = split_path(path)?;
        if new_parent_path == path || new_parent_path.starts_with(&format!("{}/", path)) {
            return Err(ArborError::BadArguments(format!(
                "cannot move {} under itself",
                path
            )));
        }
        let new_path = join_path(new_parent_path, name);
        let thresholds = &self.ctx.config.children;

        // Step 1: Find the nodes without locks
        let src = self
            .root
            .find_unlocked(path)?
            .ok_or_else(|| ArborError::NoNode(path.to_string()))?;
        let src_parent = src
            .parent()
            .ok_or_else(|| ArborError::NoNode(src_parent_path.to_string()))?;
        let dst_parent = self
            .root
            .find_unlocked(new_parent_path)?
            .ok_or_else(|| ArborError::NoNode(new_parent_path.to_string()))?;

        // Step 2: Collect the lock set and acquire it in order
        for ancestor in src_parent.ancestors().iter().chain(dst_parent.ancestors().iter()) {
            txn.add_lock_ro(ancestor, ancestor.level())?;
        }
        let src_level = src.level();
        txn.add_lock_rw(&src_parent, Perm::DELETE, src_level - 1, false)?;
        txn.add_lock_rw(&src, Perm::NONE, src_level, src.is_ephemeral())?;
        txn.add_lock_rw(&dst_parent, Perm::CREATE, dst_parent.level(), src.is_ephemeral())?;
        txn.lock_all(&AtomicBool::new(false))?;

        // Step 3: The tree may have changed before the locks were held
        let unchanged = !src.persisted().is_detached()
            && !dst_parent.persisted().is_detached()
            && src.parent().is_some_and(|p| p.same_as(&src_parent))
            && src.build_path() == path
            && dst_parent.build_path() == new_parent_path;
        if !unchanged {
            return Err(ArborError::Retriable(format!(
                "tree changed while locking for move of {}",
                path
            )));
        }

        if !src.is_version(version) {
            return Err(ArborError::BadVersion(path.to_string()));
        }
        if dst_parent.try_get_child(name, false)?.is_some() {
            return Err(ArborError::NodeExists(new_path));
        }
        if dst_parent.is_ephemeral() {
            return Err(ArborError::BadArguments(format!(
                "ephemeral node {} cannot have children",
                new_parent_path
            )));
        }

        // Step 4: Re-parent
        let prev_child_stat = snap(txn, &src)?;
        let prev_src_stat = snap(txn, &src_parent)?;
        let prev_dst_stat = snap(txn, &dst_parent)?;
        let ephemeral = src.is_ephemeral();
        let (tx_id, tx_time) = (txn.tx_id(), txn.tx_time());

        src_parent.remove_child(name, thresholds)?;
        dst_parent.add_child(&src, thresholds)?;
        src_parent
            .persisted()
            .update_stat(|s| s.touch_children(tx_id, -1, ephemeral));
        dst_parent
            .persisted()
            .update_stat(|s| s.touch_children(tx_id, 1, ephemeral));
        txn.append_move(
            &src_parent,
            &dst_parent,
            &src,
            tx_time,
            Some(prev_child_stat),
            Some(prev_src_stat),
            Some(prev_dst_stat),
        )?;

        src_parent.schedule_trigger_watchers(
            ChangeKind::ChildrenRemoved,
            src_parent_path,
            txn,
        )?;
        dst_parent.schedule_trigger_watchers(
            ChangeKind::ChildrenAdded,
            new_parent_path,
            txn,
        )?;

        Ok(Response::Moved {
            path: new_path,
            stat: src.stat(),
        })
    }

    // =========================================================================
    // Read Handlers
    // =========================================================================

    fn get_data(
        &self,
        path: &str,
        watcher: Option<&Arc<dyn Watcher>>,
        options: &GetDataOptions,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        let prefix = options.fault_back_prefix.clone().map(DataPrefix);
        let matcher = prefix.as_ref().map(|p| p as &dyn DataMatcher);

        let lookup = self.root.get_node(
            path,
            txn,
            options.wildcards,
            Perm::READ,
            Perm::NONE,
            matcher.is_some(),
            matcher,
        )?;
        let node = lookup
            .node
            .ok_or_else(|| ArborError::NoNode(path.to_string()))?;

        if let Some(watcher) = watcher {
            node.add_watcher(Arc::clone(watcher))?;
        }

        Ok(Response::Data {
            path: node.build_path(),
            data: node.data(),
            stat: node.stat(),
        })
    }

    fn get_children(
        &self,
        path: &str,
        condition: Option<&str>,
        txn: &mut dyn LockListTransaction,
    ) -> Result<Response> {
        let lookup = self.root.get_node(
            path,
            txn,
            WildcardBehavior::NOT_ALLOWED,
            Perm::READ,
            Perm::NONE,
            false,
            None,
        )?;
        let node = lookup
            .node
            .ok_or_else(|| ArborError::NoNode(path.to_string()))?;

        let names = node.retrieve_children(condition, MAX_CHILDREN_PER_REQUEST)?;
        Ok(Response::Children(names))
    }

    fn exists(&self, path: &str, txn: &mut dyn LockListTransaction) -> Result<Response> {
        let lookup = self.root.get_node(
            path,
            txn,
            WildcardBehavior::NOT_ALLOWED,
            Perm::READ,
            Perm::NONE,
            false,
            None,
        )?;
        Ok(Response::Exists(lookup.node.map(|n| n.stat())))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn snap(txn: &dyn LockListTransaction, node: &Node) -> Result<Stat> {
    txn.snap_stat_if_needed(node.persisted()).ok_or_else(|| {
        ArborError::InvalidState("transaction is marked for abort".to_string())
    })
}

/// Split an absolute path into (parent path, last name)
fn split_path(path: &str) -> Result<(&str, &str)> {
    let bad = || ArborError::BadArguments(format!("invalid path '{}'", path));

    if !path.starts_with('/') || path == "/" || path[1..].split('/').any(str::is_empty) {
        return Err(bad());
    }
    let idx = path.rfind('/').ok_or_else(bad)?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Ok((parent, &path[idx + 1..]))
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// All descendants of `node`, children after their own descendants
fn collect_subtree(node: &Node) -> Vec<Node> {
    let mut out = Vec::new();
    for child in node.children() {
        out.extend(collect_subtree(&child));
        out.push(child);
    }
    out
}
