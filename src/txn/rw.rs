//! Read/write lock list
//!
//! The transaction used by every mutating request. Locks are acquired either
//! directly while the path is resolved (`add_and_lock_*`) or collected and
//! taken in one ordered pass (`add_lock_*` + `lock_all`). All locks are
//! released when the transaction completes, whether it commits or aborts.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use super::{
    CommitAction, Completion, LockListTransaction, TxnContext, Undelete, UndoOp,
};
use crate::data::{convert_time, AclList, Perm, Stat};
use crate::error::{ArborError, Result};
use crate::lock::{HeldLocks, LayeredLockCollection, LockMode};
use crate::persist::{ChangeList, PersistedData, PersistedDataFactory, ReplicationTask};
use crate::session::{OperationOverrides, SessionAuth};
use crate::tree::{needs_write, Node};

/// Lifecycle of a read/write transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Initialized,
    Completed,
    Disposed,
}

pub struct LockListForRw {
    ctx: Arc<TxnContext>,
    auth: SessionAuth,
    tx_id: i64,
    tx_time: i64,

    // -------------------------------------------------------------------------
    // Locks
    // -------------------------------------------------------------------------
    held: HeldLocks,
    collection: LayeredLockCollection,

    // -------------------------------------------------------------------------
    // Staged Work
    // -------------------------------------------------------------------------
    changelist: Option<Box<dyn ChangeList>>,
    on_abort: Vec<UndoOp>,
    on_commit: Vec<CommitAction>,

    marked_for_abort: bool,
    only_on_ephemeral: bool,
    finish_synchronous: bool,
    state: TxState,
}

impl LockListForRw {
    /// Start a transaction; `overrides` pins the tx id/time (replayed requests)
    pub fn new(
        ctx: Arc<TxnContext>,
        auth: SessionAuth,
        overrides: Option<&OperationOverrides>,
        only_on_ephemeral: bool,
    ) -> Self {
        let tx_id = match overrides.and_then(|o| o.tx_id) {
            Some(xid) => {
                ctx.xids.observe(xid);
                xid
            }
            None => ctx.xids.next_unique_id(),
        };
        let tx_time = overrides
            .and_then(|o| o.tx_time)
            .unwrap_or_else(|| convert_time(SystemTime::now()));
        let collection = LayeredLockCollection::new(Arc::clone(&ctx.pool));

        tracing::trace!(tx_id, session = %auth, "transaction started");

        Self {
            ctx,
            auth,
            tx_id,
            tx_time,
            held: HeldLocks::new(),
            collection,
            changelist: None,
            on_abort: Vec::new(),
            on_commit: Vec::new(),
            marked_for_abort: false,
            only_on_ephemeral,
            finish_synchronous: false,
            state: TxState::Initialized,
        }
    }

    pub fn auth(&self) -> &SessionAuth {
        &self.auth
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn held_locks(&self) -> &HeldLocks {
        &self.held
    }

    /// Undo steps recorded so far
    pub fn undo_len(&self) -> usize {
        self.on_abort.len()
    }

    pub fn only_on_ephemeral(&self) -> bool {
        self.only_on_ephemeral
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Initialized {
            return Err(ArborError::InvalidOperation(format!(
                "transaction {} is {:?}",
                self.tx_id, self.state
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Access Checks
    // -------------------------------------------------------------------------

    fn check_lockdown(&self, node: &Node, rw: bool) -> Result<()> {
        if self.auth.is_super_session || self.ctx.lockdown.is_empty() {
            return Ok(());
        }
        let path = node.build_path();
        if self.ctx.lockdown.contains(&path) {
            self.ctx.instrumentation.on_lockdown_access(&path, rw);
            return Err(ArborError::access_denied(path, "lockdown"));
        }
        Ok(())
    }

    fn check_read(&self, node: &Node) -> Result<()> {
        node.acl_allows(&self.auth, Perm::READ)?;
        self.check_lockdown(node, false)
    }

    fn check_write(&self, node: &Node, perm: Perm, is_child_ephemeral: bool) -> Result<()> {
        if !perm.is_empty() {
            node.acl_allows(&self.auth, perm)?;
        }

        if self.only_on_ephemeral
            && !(node.is_ephemeral() || (perm == Perm::CREATE && is_child_ephemeral))
        {
            return Err(ArborError::access_denied(
                node.build_path(),
                "only ephemerals can be modified by this session",
            ));
        }

        self.check_lockdown(node, true)
    }

    // -------------------------------------------------------------------------
    // Lock Validation
    // -------------------------------------------------------------------------

    fn check_locks(
        &self,
        parent: Option<&Node>,
        perm_parent: Perm,
        child: Option<&Node>,
        perm_child: Perm,
    ) -> Result<()> {
        if !self.ctx.config.validate_lock_list {
            return Ok(());
        }
        if let Some(parent) = parent {
            self.require_lock(parent, perm_parent)?;
        }
        if let Some(child) = child {
            self.require_lock(child, perm_child)?;
            for ancestor in child.ancestors() {
                self.require_lock(&ancestor, Perm::READ)?;
            }
        }
        Ok(())
    }

    fn require_lock(&self, node: &Node, perm: Perm) -> Result<()> {
        if perm.is_empty() {
            return Ok(());
        }
        let mode = if needs_write(perm) {
            LockMode::Write
        } else {
            LockMode::Read
        };
        let pool = &self.ctx.pool;
        let Some(slot) = node.lock_slot(pool, node.level(), mode) else {
            return Ok(());
        };
        if self.held.holds(slot.id(), mode) {
            return Ok(());
        }

        // A write lock on an ancestor covers the whole subtree
        let covered = node.ancestors().iter().any(|a| {
            a.lock_slot(pool, a.level(), LockMode::Write)
                .is_some_and(|s| self.held.holds(s.id(), LockMode::Write))
        });
        if covered {
            return Ok(());
        }

        Err(ArborError::Invariant(format!(
            "{:?} lock on {} ({}) not held by transaction {}",
            mode,
            node.build_path(),
            slot.id(),
            self.tx_id
        )))
    }

    // -------------------------------------------------------------------------
    // Staging Helpers
    // -------------------------------------------------------------------------

    fn stage(&mut self, tx_time: i64, f: impl FnOnce(&mut dyn ChangeList)) {
        let changes = &self.ctx.changes;
        let list = self.changelist.get_or_insert_with(|| changes.create());
        f(list.as_mut());
        list.set_time(tx_time);
    }

    /// No-op once the transaction is marked for abort
    fn push_undo(&mut self, op: UndoOp) {
        if self.marked_for_abort {
            tracing::trace!(tx_id = self.tx_id, "transaction marked for abort, undo step dropped");
            return;
        }
        self.on_abort.push(op);
    }

    fn required<T>(value: Option<T>, what: &str) -> Result<T> {
        value.ok_or_else(|| ArborError::BadArguments(format!("{} is required", what)))
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    fn run_abort(&mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.on_abort);
        self.on_commit.clear();
        let thresholds = self.ctx.config.children;

        let mut first_error = None;
        for op in ops.into_iter().rev() {
            let name = op.name();
            let mut validate = |p: Option<&Node>, pp: Perm, c: Option<&Node>, pc: Perm| {
                self.check_locks(p, pp, c, pc)
            };
            if let Err(e) = op.apply(&thresholds, &mut validate) {
                tracing::error!(tx_id = self.tx_id, step = name, error = %e, "undo step failed");
                first_error.get_or_insert(e);
            }
        }

        if let Some(mut list) = self.changelist.take() {
            list.abort();
        }

        tracing::debug!(tx_id = self.tx_id, "transaction aborted");
        first_error.map_or(Ok(()), Err)
    }

    fn run_commit(&mut self) -> Result<ReplicationTask> {
        self.on_abort.clear();

        let Some(mut list) = self.changelist.take() else {
            return Ok(ReplicationTask::finished());
        };
        if list.is_empty() || self.only_on_ephemeral {
            return Ok(ReplicationTask::finished());
        }

        let result = if self.finish_synchronous {
            list.commit_sync(self.tx_id)
        } else {
            list.commit(self.tx_id)
        };

        match result {
            Ok(task) => {
                self.ctx.instrumentation.on_tx_committed();
                tracing::debug!(tx_id = self.tx_id, "transaction committed");
                Ok(task)
            }
            Err(e) => {
                tracing::error!(tx_id = self.tx_id, error = %e, "Commit failed");
                Err(match e {
                    ArborError::CommitFailed(_) => e,
                    other => ArborError::CommitFailed(other.to_string()),
                })
            }
        }
    }

    fn release_locks(&mut self) {
        self.collection.release();
        self.held.release_all();
    }
}

impl LockListTransaction for LockListForRw {
    fn tx_id(&self) -> i64 {
        self.tx_id
    }

    fn tx_time(&self) -> i64 {
        self.tx_time
    }

    fn finish_synchronous(&self) -> bool {
        self.finish_synchronous
    }

    fn set_finish_synchronous(&mut self, synchronous: bool) {
        self.finish_synchronous = synchronous;
    }

    fn add_and_lock_ro(&mut self, node: &Node, level: usize) -> Result<bool> {
        self.ensure_active()?;
        self.check_read(node)?;
        if self.auth.is_lock_free_session {
            return Ok(false);
        }
        node.acquire_lock_ro(&self.ctx.pool, level, &mut self.held)
    }

    fn add_and_lock_rw(
        &mut self,
        node: &Node,
        perm: Perm,
        level: usize,
        is_child_ephemeral: bool,
    ) -> Result<bool> {
        self.ensure_active()?;
        self.check_write(node, perm, is_child_ephemeral)?;
        node.acquire_lock_rw(&self.ctx.pool, level, &mut self.held)
    }

    fn add_lock_ro(&mut self, node: &Node, level: usize) -> Result<bool> {
        self.ensure_active()?;
        self.check_read(node)?;
        if self.auth.is_lock_free_session {
            return Ok(false);
        }
        self.collection.add_lock(node, level, false)?;
        Ok(true)
    }

    fn add_lock_rw(
        &mut self,
        node: &Node,
        perm: Perm,
        level: usize,
        is_child_ephemeral: bool,
    ) -> Result<bool> {
        self.ensure_active()?;
        self.check_write(node, perm, is_child_ephemeral)?;
        self.collection.add_lock(node, level, true)?;
        Ok(true)
    }

    fn lock_all(&mut self, cancelled: &AtomicBool) -> Result<()> {
        self.ensure_active()?;
        let fresh = LayeredLockCollection::new(Arc::clone(&self.ctx.pool));
        let mut collection = std::mem::replace(&mut self.collection, fresh);
        collection.acquire_into(cancelled, &mut self.held)
    }

    fn mark_for_abort(&mut self) {
        self.marked_for_abort = true;
    }

    fn is_marked_for_abort(&self) -> bool {
        self.marked_for_abort
    }

    fn complete(&mut self) -> Result<Completion> {
        if self.state != TxState::Initialized {
            return Ok(Completion::finished());
        }

        let (outcome, deferred) = if self.marked_for_abort {
            (self.run_abort().map(|_| ReplicationTask::finished()), Vec::new())
        } else {
            let deferred = std::mem::take(&mut self.on_commit);
            (self.run_commit(), deferred)
        };

        self.release_locks();
        self.state = TxState::Completed;

        // Listeners run outside every tree lock and may re-enter the tree
        for action in deferred {
            action.run();
        }

        let replication = outcome?;
        if self.finish_synchronous {
            replication.wait()?;
            return Ok(Completion::finished());
        }

        Ok(Completion {
            must_dispose: true,
            replication,
        })
    }

    fn snap_stat_if_needed(&self, data: &PersistedData) -> Option<Stat> {
        if self.marked_for_abort {
            None
        } else {
            Some(data.stat())
        }
    }

    fn validate_lock_list(
        &mut self,
        parent: Option<&Node>,
        perm_parent: Perm,
        child: Option<&Node>,
        perm_child: Perm,
    ) -> Result<()> {
        self.check_locks(parent, perm_parent, child, perm_child)
    }

    fn append_create(
        &mut self,
        factory: &Arc<dyn PersistedDataFactory>,
        data: &Node,
        tx_time: i64,
    ) -> Result<()> {
        self.ensure_active()?;
        self.stage(tx_time, |list| data.persisted().append_create(list));
        self.push_undo(UndoOp::DeleteCreated {
            factory: Arc::clone(factory),
            node: data.clone(),
        });
        Ok(())
    }

    fn append_add_child(
        &mut self,
        parent: &Node,
        child: &Node,
        tx_time: i64,
        prev_parent_stat: Option<Stat>,
    ) -> Result<()> {
        self.ensure_active()?;
        let prev_parent_stat = Self::required(prev_parent_stat, "prev_parent_stat")?;

        self.stage(tx_time, |list| {
            parent.persisted().append_add_child(list, child.persisted())
        });
        self.push_undo(UndoOp::UnlinkChild {
            parent: parent.clone(),
            child_name: child.name(),
            prev_parent_stat,
        });
        Ok(())
    }

    fn append_remove(
        &mut self,
        parent: &Node,
        child: &Node,
        tx_time: i64,
        prev_child_stat: Option<Stat>,
        prev_parent_stat: Option<Stat>,
        undelete: Undelete,
    ) -> Result<()> {
        self.ensure_active()?;
        let prev_child_stat = Self::required(prev_child_stat, "prev_child_stat")?;
        let prev_parent_stat = Self::required(prev_parent_stat, "prev_parent_stat")?;

        self.stage(tx_time, |list| {
            parent.persisted().append_remove_child(list, child.persisted());
            child
                .persisted()
                .append_remove(list, Some(parent.persisted()), false);
        });
        self.push_undo(UndoOp::RelinkChild {
            parent: parent.clone(),
            child: child.clone(),
            prev_child_stat,
            prev_parent_stat,
            undelete,
        });
        Ok(())
    }

    fn append_remove_node_and_all_children(
        &mut self,
        child: &Node,
        tx_time: i64,
        undelete: Option<Undelete>,
    ) -> Result<()> {
        self.ensure_active()?;
        let parent = child.persisted().parent();
        self.stage(tx_time, |list| {
            child.persisted().append_remove(list, parent.as_deref(), true)
        });
        if let Some(undelete) = undelete {
            self.push_undo(UndoOp::Undelete(undelete));
        }
        Ok(())
    }

    fn append_move(
        &mut self,
        src_parent: &Node,
        dst_parent: &Node,
        child: &Node,
        tx_time: i64,
        prev_child_stat: Option<Stat>,
        prev_src_stat: Option<Stat>,
        prev_dst_stat: Option<Stat>,
    ) -> Result<()> {
        self.ensure_active()?;
        let prev_child_stat = Self::required(prev_child_stat, "prev_child_stat")?;
        let prev_src_stat = Self::required(prev_src_stat, "prev_src_stat")?;
        let prev_dst_stat = Self::required(prev_dst_stat, "prev_dst_stat")?;

        self.stage(tx_time, |list| {
            src_parent
                .persisted()
                .append_remove_child(list, child.persisted());
            dst_parent
                .persisted()
                .append_add_child(list, child.persisted());
        });
        self.push_undo(UndoOp::MoveBack {
            src_parent: src_parent.clone(),
            dst_parent: dst_parent.clone(),
            child: child.clone(),
            prev_child_stat,
            prev_src_stat,
            prev_dst_stat,
        });
        Ok(())
    }

    fn append_set_acl(
        &mut self,
        data: &Node,
        tx_time: i64,
        prev_acl: Option<AclList>,
        prev_stat: Option<Stat>,
    ) -> Result<()> {
        self.ensure_active()?;
        let stat = Self::required(prev_stat, "prev_stat")?;

        self.stage(tx_time, |list| data.persisted().append_set_acl(list));
        self.push_undo(UndoOp::RestoreAcl {
            node: data.clone(),
            acl: prev_acl,
            stat,
        });
        Ok(())
    }

    fn append_set_data(
        &mut self,
        data: &Node,
        tx_time: i64,
        prev_data: Option<Bytes>,
        prev_stat: Option<Stat>,
    ) -> Result<()> {
        self.ensure_active()?;
        let stat = Self::required(prev_stat, "prev_stat")?;

        self.stage(tx_time, |list| data.persisted().append_set_data(list));
        self.push_undo(UndoOp::RestoreData {
            node: data.clone(),
            data: prev_data,
            stat,
        });
        Ok(())
    }

    fn append_poison(&mut self, data: &Node, spec: &str, tx_time: i64) -> Result<()> {
        self.ensure_active()?;
        self.stage(tx_time, |list| data.persisted().append_poison(spec, list));
        Ok(())
    }

    fn run_on_commit(&mut self, action: CommitAction) -> Result<()> {
        self.ensure_active()?;
        if self.marked_for_abort {
            return Err(ArborError::InvalidOperation(
                "transaction is marked for abort".to_string(),
            ));
        }
        self.on_commit.push(action);
        Ok(())
    }

    fn run_on_abort(&mut self, op: UndoOp) -> Result<()> {
        self.ensure_active()?;
        if self.marked_for_abort {
            return Err(ArborError::InvalidOperation(
                "transaction is marked for abort".to_string(),
            ));
        }
        self.push_undo(op);
        Ok(())
    }
}

impl Drop for LockListForRw {
    fn drop(&mut self) {
        if self.state == TxState::Initialized {
            if !self.on_abort.is_empty() {
                tracing::warn!(
                    tx_id = self.tx_id,
                    undo_steps = self.on_abort.len(),
                    "transaction dropped without completion, aborting"
                );
            }
            self.marked_for_abort = true;
            if let Err(e) = self.complete() {
                tracing::error!(tx_id = self.tx_id, error = %e, "abort on drop failed");
            }
        }
        self.state = TxState::Disposed;
    }
}

impl std::fmt::Debug for LockListForRw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockListForRw")
            .field("tx_id", &self.tx_id)
            .field("state", &self.state)
            .field("locks", &self.held.len())
            .field("undo", &self.on_abort.len())
            .field("marked_for_abort", &self.marked_for_abort)
            .finish()
    }
}
