//! Undo log and commit actions
//!
//! Each mutation records the inverse step needed to roll it back. Steps run
//! in reverse order on abort; commit actions run in order after commit.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::ChildrenThresholds;
use crate::data::{AclList, Perm, Stat, WatchedEvent, WatcherSet};
use crate::error::Result;
use crate::persist::{PersistedData, PersistedDataFactory};
use crate::tree::{fire_watchers, Node};

/// Lock check run before an undo step touches the tree
pub(crate) type LockValidator<'a> =
    dyn FnMut(Option<&Node>, Perm, Option<&Node>, Perm) -> Result<()> + 'a;

// =============================================================================
// Undelete
// =============================================================================

struct UndeleteEntry {
    factory: Arc<dyn PersistedDataFactory>,
    node: Node,
    parent: Option<Arc<PersistedData>>,
}

/// Records to put back into their factories on abort
///
/// Parent links are captured when an entry is added, before the delete
/// clears them.
#[derive(Default)]
pub struct Undelete {
    entries: Vec<UndeleteEntry>,
}

impl Undelete {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(factory: &Arc<dyn PersistedDataFactory>, node: &Node) -> Self {
        let mut undelete = Self::new();
        undelete.push(factory, node);
        undelete
    }

    pub fn push(&mut self, factory: &Arc<dyn PersistedDataFactory>, node: &Node) {
        self.entries.push(UndeleteEntry {
            factory: Arc::clone(factory),
            node: node.clone(),
            parent: node.persisted().parent(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn apply(self) {
        for entry in self.entries {
            entry.factory.record_undelete(entry.node.persisted());
            if let Some(parent) = &entry.parent {
                entry.node.persisted().set_parent(Some(parent));
            }
        }
    }
}

// =============================================================================
// Undo Operations
// =============================================================================

/// Inverse of one in-memory mutation
pub enum UndoOp {
    /// Drop a record created by this transaction
    DeleteCreated {
        factory: Arc<dyn PersistedDataFactory>,
        node: Node,
    },

    /// Unlink a child added by this transaction
    UnlinkChild {
        parent: Node,
        child_name: String,
        prev_parent_stat: Stat,
    },

    /// Undelete and relink a removed child
    RelinkChild {
        parent: Node,
        child: Node,
        prev_child_stat: Stat,
        prev_parent_stat: Stat,
        undelete: Undelete,
    },

    /// Undelete records without relinking
    Undelete(Undelete),

    /// Move a child back to its source parent
    MoveBack {
        src_parent: Node,
        dst_parent: Node,
        child: Node,
        prev_child_stat: Stat,
        prev_src_stat: Stat,
        prev_dst_stat: Stat,
    },

    RestoreAcl {
        node: Node,
        acl: Option<AclList>,
        stat: Stat,
    },

    RestoreData {
        node: Node,
        data: Option<Bytes>,
        stat: Stat,
    },

    /// Put back the watchers a deferred notification consumed
    RestoreWatchers {
        node: Node,
        watchers: Option<WatcherSet>,
    },
}

impl UndoOp {
    pub fn name(&self) -> &'static str {
        match self {
            UndoOp::DeleteCreated { .. } => "DeleteCreated",
            UndoOp::UnlinkChild { .. } => "UnlinkChild",
            UndoOp::RelinkChild { .. } => "RelinkChild",
            UndoOp::Undelete(_) => "Undelete",
            UndoOp::MoveBack { .. } => "MoveBack",
            UndoOp::RestoreAcl { .. } => "RestoreAcl",
            UndoOp::RestoreData { .. } => "RestoreData",
            UndoOp::RestoreWatchers { .. } => "RestoreWatchers",
        }
    }

    pub(crate) fn apply(
        self,
        thresholds: &ChildrenThresholds,
        validate: &mut LockValidator<'_>,
    ) -> Result<()> {
        match self {
            UndoOp::DeleteCreated { factory, node } => {
                factory.delete(node.persisted());
            }

            UndoOp::UnlinkChild {
                parent,
                child_name,
                prev_parent_stat,
            } => {
                validate(Some(&parent), Perm::WRITE, None, Perm::NONE)?;
                parent.remove_child(&child_name, thresholds)?;
                parent.persisted().set_stat(prev_parent_stat);
            }

            UndoOp::RelinkChild {
                parent,
                child,
                prev_child_stat,
                prev_parent_stat,
                undelete,
            } => {
                validate(Some(&parent), Perm::WRITE, None, Perm::NONE)?;
                undelete.apply();
                parent.add_child(&child, thresholds)?;
                child.persisted().set_stat(prev_child_stat);
                parent.persisted().set_stat(prev_parent_stat);
            }

            UndoOp::Undelete(undelete) => undelete.apply(),

            UndoOp::MoveBack {
                src_parent,
                dst_parent,
                child,
                prev_child_stat,
                prev_src_stat,
                prev_dst_stat,
            } => {
                validate(Some(&dst_parent), Perm::WRITE, Some(&child), Perm::WRITE)?;
                validate(Some(&src_parent), Perm::WRITE, None, Perm::NONE)?;
                dst_parent.remove_child(&child.name(), thresholds)?;
                src_parent.add_child(&child, thresholds)?;
                child.persisted().set_stat(prev_child_stat);
                src_parent.persisted().set_stat(prev_src_stat);
                dst_parent.persisted().set_stat(prev_dst_stat);
            }

            UndoOp::RestoreAcl { node, acl, stat } => {
                validate(None, Perm::NONE, Some(&node), Perm::WRITE)?;
                node.set_acl(acl);
                node.persisted().set_stat(stat);
            }

            UndoOp::RestoreData { node, data, stat } => {
                validate(None, Perm::NONE, Some(&node), Perm::WRITE)?;
                node.set_data(data);
                node.persisted().set_stat(stat);
            }

            UndoOp::RestoreWatchers { node, watchers } => node.reset_watchers(watchers),
        }
        Ok(())
    }
}

impl fmt::Debug for UndoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Commit Actions
// =============================================================================

/// Deferred side effect of a committed transaction
pub enum CommitAction {
    FireWatchers {
        watchers: WatcherSet,
        event: WatchedEvent,
    },
}

impl CommitAction {
    pub(crate) fn run(self) {
        match self {
            CommitAction::FireWatchers { watchers, event } => fire_watchers(&watchers, &event),
        }
    }
}

impl fmt::Debug for CommitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitAction::FireWatchers { watchers, event } => f
                .debug_struct("FireWatchers")
                .field("watchers", &watchers.len())
                .field("event", &event.event_type)
                .field("path", &event.path)
                .finish(),
        }
    }
}
