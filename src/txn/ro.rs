//! Read-only lock list
//!
//! Used for reads from lock-free sessions: access is still checked, but no
//! tree lock is ever taken, so reads may observe concurrent writes.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;

use super::{CommitAction, Completion, LockListTransaction, Undelete, UndoOp};
use crate::data::{AclList, Perm, Stat};
use crate::error::{ArborError, Result};
use crate::persist::{PersistedData, PersistedDataFactory};
use crate::session::SessionAuth;
use crate::tree::Node;

const READ_ONLY: &str = "mutation through a read-only transaction";

#[derive(Debug)]
pub struct LockListForRo {
    auth: SessionAuth,
    marked_for_abort: bool,
}

impl LockListForRo {
    pub fn new(auth: SessionAuth) -> Self {
        Self {
            auth,
            marked_for_abort: false,
        }
    }

    pub fn auth(&self) -> &SessionAuth {
        &self.auth
    }
}

impl LockListTransaction for LockListForRo {
    fn tx_id(&self) -> i64 {
        0
    }

    fn tx_time(&self) -> i64 {
        0
    }

    fn finish_synchronous(&self) -> bool {
        true
    }

    fn set_finish_synchronous(&mut self, _synchronous: bool) {}

    fn add_and_lock_ro(&mut self, node: &Node, _level: usize) -> Result<bool> {
        node.acl_allows(&self.auth, Perm::READ)?;
        Ok(false)
    }

    fn add_and_lock_rw(
        &mut self,
        _node: &Node,
        _perm: Perm,
        _level: usize,
        _is_child_ephemeral: bool,
    ) -> Result<bool> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn add_lock_ro(&mut self, node: &Node, _level: usize) -> Result<bool> {
        node.acl_allows(&self.auth, Perm::READ)?;
        Ok(false)
    }

    fn add_lock_rw(
        &mut self,
        _node: &Node,
        _perm: Perm,
        _level: usize,
        _is_child_ephemeral: bool,
    ) -> Result<bool> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn lock_all(&mut self, _cancelled: &AtomicBool) -> Result<()> {
        Ok(())
    }

    fn mark_for_abort(&mut self) {
        self.marked_for_abort = true;
    }

    fn is_marked_for_abort(&self) -> bool {
        self.marked_for_abort
    }

    fn complete(&mut self) -> Result<Completion> {
        Ok(Completion::finished())
    }

    fn snap_stat_if_needed(&self, _data: &PersistedData) -> Option<Stat> {
        None
    }

    fn validate_lock_list(
        &mut self,
        _parent: Option<&Node>,
        _perm_parent: Perm,
        _child: Option<&Node>,
        _perm_child: Perm,
    ) -> Result<()> {
        Ok(())
    }

    fn append_create(
        &mut self,
        _factory: &Arc<dyn PersistedDataFactory>,
        _data: &Node,
        _tx_time: i64,
    ) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn append_add_child(
        &mut self,
        _parent: &Node,
        _child: &Node,
        _tx_time: i64,
        _prev_parent_stat: Option<Stat>,
    ) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn append_remove(
        &mut self,
        _parent: &Node,
        _child: &Node,
        _tx_time: i64,
        _prev_child_stat: Option<Stat>,
        _prev_parent_stat: Option<Stat>,
        _undelete: Undelete,
    ) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn append_remove_node_and_all_children(
        &mut self,
        _child: &Node,
        _tx_time: i64,
        _undelete: Option<Undelete>,
    ) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn append_move(
        &mut self,
        _src_parent: &Node,
        _dst_parent: &Node,
        _child: &Node,
        _tx_time: i64,
        _prev_child_stat: Option<Stat>,
        _prev_src_stat: Option<Stat>,
        _prev_dst_stat: Option<Stat>,
    ) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn append_set_acl(
        &mut self,
        _data: &Node,
        _tx_time: i64,
        _prev_acl: Option<AclList>,
        _prev_stat: Option<Stat>,
    ) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn append_set_data(
        &mut self,
        _data: &Node,
        _tx_time: i64,
        _prev_data: Option<Bytes>,
        _prev_stat: Option<Stat>,
    ) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn append_poison(&mut self, _data: &Node, _spec: &str, _tx_time: i64) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn run_on_commit(&mut self, _action: CommitAction) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }

    fn run_on_abort(&mut self, _op: UndoOp) -> Result<()> {
        Err(ArborError::NotSupported(READ_ONLY))
    }
}
