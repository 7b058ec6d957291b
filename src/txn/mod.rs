//! Transaction Module
//!
//! Lock lists: the per-operation transaction context.
//!
//! ## Responsibilities
//! - Check ACL, ephemeral-only and lockdown rules before locking a node
//! - Acquire hierarchical locks directly or as a batch
//! - Stage changes into a change list and record an undo log
//! - Complete exactly once: commit (fire watchers, hand off the change list)
//!   or abort (undo in reverse order), then release every lock
//!
//! ## Variants
//! - `LockListForRw`: full read/write transaction
//! - `LockListForRo`: lock-free reads, ACL checks only

mod lockdown;
mod ro;
mod rw;
mod undo;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

pub use lockdown::LockDownSet;
pub use ro::LockListForRo;
pub use rw::{LockListForRw, TxState};
pub use undo::{CommitAction, Undelete, UndoOp};

use crate::config::Config;
use crate::data::{AclList, Perm, Stat};
use crate::error::Result;
use crate::instrumentation::Instrumentation;
use crate::lock::LockPool;
use crate::persist::{ChangeListFactory, PersistedData, PersistedDataFactory, ReplicationTask};
use crate::tree::Node;

/// Source of transaction ids
#[derive(Debug, Default)]
pub struct XidProvider {
    last: AtomicI64,
}

impl XidProvider {
    pub fn new(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    pub fn next_unique_id(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Move forward to at least `xid` (ids supplied by a replicated log)
    pub fn observe(&self, xid: i64) {
        self.last.fetch_max(xid, Ordering::SeqCst);
    }
}

/// Shared collaborators of every transaction on one tree
pub struct TxnContext {
    pub config: Arc<Config>,
    pub pool: Arc<LockPool>,
    pub lockdown: Arc<LockDownSet>,
    pub changes: Arc<dyn ChangeListFactory>,
    pub instrumentation: Arc<dyn Instrumentation>,
    pub xids: XidProvider,
}

/// Outcome of `complete`
#[derive(Debug)]
pub struct Completion {
    /// The caller must dispose the transaction (always true once completed)
    pub must_dispose: bool,
    /// Replication of the committed changes
    pub replication: ReplicationTask,
}

impl Completion {
    pub(crate) fn finished() -> Self {
        Self {
            must_dispose: true,
            replication: ReplicationTask::finished(),
        }
    }
}

/// Per-operation transaction context
///
/// Prev-state parameters (`prev_*`) are snapshots taken with
/// `snap_stat_if_needed` before the mutation; they are required and a
/// missing one is a `BadArguments` error.
pub trait LockListTransaction {
    fn tx_id(&self) -> i64;

    fn tx_time(&self) -> i64;

    fn finish_synchronous(&self) -> bool;

    fn set_finish_synchronous(&mut self, synchronous: bool);

    // -------------------------------------------------------------------------
    // Locking
    // -------------------------------------------------------------------------

    /// Check READ access, then read-lock `node`; true if a new lock was taken
    fn add_and_lock_ro(&mut self, node: &Node, level: usize) -> Result<bool>;

    /// Check `perm` access, then write-lock `node`
    ///
    /// `Perm::NONE` locks without an ACL check.
    fn add_and_lock_rw(
        &mut self,
        node: &Node,
        perm: Perm,
        level: usize,
        is_child_ephemeral: bool,
    ) -> Result<bool>;

    /// Like `add_and_lock_ro`, deferring acquisition to `lock_all`
    fn add_lock_ro(&mut self, node: &Node, level: usize) -> Result<bool>;

    /// Like `add_and_lock_rw`, deferring acquisition to `lock_all`
    fn add_lock_rw(
        &mut self,
        node: &Node,
        perm: Perm,
        level: usize,
        is_child_ephemeral: bool,
    ) -> Result<bool>;

    /// Acquire every deferred lock in global order
    fn lock_all(&mut self, cancelled: &AtomicBool) -> Result<()>;

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn mark_for_abort(&mut self);

    fn is_marked_for_abort(&self) -> bool;

    /// Commit or abort, then release all locks; later calls are no-ops
    fn complete(&mut self) -> Result<Completion>;

    /// Snapshot of `data`'s stat, unless the transaction will abort anyway
    fn snap_stat_if_needed(&self, data: &PersistedData) -> Option<Stat>;

    /// Assert the locks an undo step relies on are held
    fn validate_lock_list(
        &mut self,
        parent: Option<&Node>,
        perm_parent: Perm,
        child: Option<&Node>,
        perm_child: Perm,
    ) -> Result<()>;

    // -------------------------------------------------------------------------
    // Change Staging
    // -------------------------------------------------------------------------

    fn append_create(
        &mut self,
        factory: &Arc<dyn PersistedDataFactory>,
        data: &Node,
        tx_time: i64,
    ) -> Result<()>;

    fn append_add_child(
        &mut self,
        parent: &Node,
        child: &Node,
        tx_time: i64,
        prev_parent_stat: Option<Stat>,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn append_remove(
        &mut self,
        parent: &Node,
        child: &Node,
        tx_time: i64,
        prev_child_stat: Option<Stat>,
        prev_parent_stat: Option<Stat>,
        undelete: Undelete,
    ) -> Result<()>;

    fn append_remove_node_and_all_children(
        &mut self,
        child: &Node,
        tx_time: i64,
        undelete: Option<Undelete>,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn append_move(
        &mut self,
        src_parent: &Node,
        dst_parent: &Node,
        child: &Node,
        tx_time: i64,
        prev_child_stat: Option<Stat>,
        prev_src_stat: Option<Stat>,
        prev_dst_stat: Option<Stat>,
    ) -> Result<()>;

    fn append_set_acl(
        &mut self,
        data: &Node,
        tx_time: i64,
        prev_acl: Option<AclList>,
        prev_stat: Option<Stat>,
    ) -> Result<()>;

    fn append_set_data(
        &mut self,
        data: &Node,
        tx_time: i64,
        prev_data: Option<Bytes>,
        prev_stat: Option<Stat>,
    ) -> Result<()>;

    fn append_poison(&mut self, data: &Node, spec: &str, tx_time: i64) -> Result<()>;

    // -------------------------------------------------------------------------
    // Hooks
    // -------------------------------------------------------------------------

    /// Run `action` after a successful commit (FIFO)
    fn run_on_commit(&mut self, action: CommitAction) -> Result<()>;

    /// Run `op` if the transaction aborts (LIFO)
    fn run_on_abort(&mut self, op: UndoOp) -> Result<()>;
}
