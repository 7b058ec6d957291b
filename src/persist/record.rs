//! Node records
//!
//! A `PersistedData` is the identity of a node. The tree's `Node` handle is a
//! thin wrapper around `Arc<PersistedData>`, so there is exactly one live node
//! object per record.
//!
//! Two short-held locks live here, both distinct from the hierarchical tree
//! locks:
//! - `record`: name, parent link, stat, ACL and data
//! - `body`: the node variant (minimal/complete) with children and watchers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{ChangeList, ChangeOp};
use crate::data::{AclList, Stat};
use crate::error::{ArborError, Result};
use crate::tree::NodeBody;

/// Mutable record fields
struct Record {
    name: String,
    parent: Option<Weak<PersistedData>>,
    stat: Stat,
    acl: Option<AclList>,
    data: Option<Bytes>,
    /// Number of durable children linked to this record
    persisted_children: usize,
}

/// One node's durable identity and contents
pub struct PersistedData {
    id: u64,
    ephemeral: bool,
    record: RwLock<Record>,
    pub(crate) body: Mutex<NodeBody>,
    detached: AtomicBool,
}

impl PersistedData {
    pub(crate) fn new(id: u64, name: impl Into<String>, ephemeral: bool) -> Self {
        Self {
            id,
            ephemeral,
            record: RwLock::new(Record {
                name: name.into(),
                parent: None,
                stat: Stat::default(),
                acl: None,
                data: None,
                persisted_children: 0,
            }),
            body: Mutex::new(NodeBody::Minimal),
            detached: AtomicBool::new(false),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn name(&self) -> String {
        self.record.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.record.write().name = name.into();
    }

    pub fn parent(&self) -> Option<Arc<PersistedData>> {
        self.record.read().parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_parent(&self, parent: Option<&Arc<PersistedData>>) {
        self.record.write().parent = parent.map(Arc::downgrade);
    }

    pub fn stat(&self) -> Stat {
        self.record.read().stat.clone()
    }

    pub fn set_stat(&self, stat: Stat) {
        self.record.write().stat = stat;
    }

    /// Mutate the stat in place and return the new value
    pub fn update_stat(&self, f: impl FnOnce(&mut Stat)) -> Stat {
        let mut record = self.record.write();
        f(&mut record.stat);
        record.stat.clone()
    }

    pub fn acl(&self) -> Option<AclList> {
        self.record.read().acl.clone()
    }

    pub fn set_acl(&self, acl: Option<AclList>) {
        self.record.write().acl = acl;
    }

    pub fn data(&self) -> Option<Bytes> {
        self.record.read().data.clone()
    }

    /// Replace the payload; `data_length` follows
    pub fn set_data(&self, data: Option<Bytes>) {
        let mut record = self.record.write();
        record.stat.data_length = data.as_ref().map_or(0, |d| d.len() as i32);
        record.data = data;
    }

    pub fn data_len(&self) -> usize {
        self.record.read().data.as_ref().map_or(0, Bytes::len)
    }

    /// Durable children linked to this record
    pub fn children_count(&self) -> usize {
        self.record.read().persisted_children
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub(crate) fn attach(&self) {
        self.detached.store(false, Ordering::Release);
    }

    // -------------------------------------------------------------------------
    // Durable Linkage
    // -------------------------------------------------------------------------

    /// Link `child` under this record, unlinking it from any previous parent
    pub fn add_child(self: &Arc<Self>, child: &Arc<PersistedData>) {
        if let Some(previous) = child.parent() {
            if !Arc::ptr_eq(&previous, self) {
                previous.unlink_count();
            }
        }

        child.set_parent(Some(self));
        self.record.write().persisted_children += 1;
    }

    /// Unlink `child` from this record
    pub fn remove_child(self: &Arc<Self>, child: &Arc<PersistedData>) -> Result<()> {
        match child.parent() {
            None => Ok(()),
            Some(parent) if Arc::ptr_eq(&parent, self) => {
                child.set_parent(None);
                self.unlink_count();
                Ok(())
            }
            Some(parent) => Err(ArborError::Invariant(format!(
                "{} is not a child of {} (parent is {})",
                child.name(),
                self.name(),
                parent.name()
            ))),
        }
    }

    fn unlink_count(&self) {
        let mut record = self.record.write();
        record.persisted_children = record.persisted_children.saturating_sub(1);
    }

    // -------------------------------------------------------------------------
    // Change Staging
    // -------------------------------------------------------------------------

    fn stage(&self, changes: &mut dyn ChangeList, op: impl FnOnce(&Self) -> ChangeOp) {
        if !self.ephemeral {
            changes.append(op(self));
        }
    }

    pub fn append_create(&self, changes: &mut dyn ChangeList) {
        self.stage(changes, |r| {
            let record = r.record.read();
            ChangeOp::Create {
                id: r.id,
                name: record.name.clone(),
                stat: record.stat.clone(),
                acl: record.acl.as_ref().map(|a| a.to_vec()),
                data: record.data.clone(),
            }
        });
    }

    pub fn append_add_child(&self, changes: &mut dyn ChangeList, child: &PersistedData) {
        if child.is_ephemeral() {
            return;
        }
        self.stage(changes, |r| ChangeOp::AddChild {
            parent: r.id,
            child: child.id(),
        });
    }

    pub fn append_remove_child(&self, changes: &mut dyn ChangeList, child: &PersistedData) {
        if child.is_ephemeral() {
            return;
        }
        self.stage(changes, |r| ChangeOp::RemoveChild {
            parent: r.id,
            child: child.id(),
        });
    }

    pub fn append_remove(
        &self,
        changes: &mut dyn ChangeList,
        parent: Option<&PersistedData>,
        recursive: bool,
    ) {
        self.stage(changes, |r| ChangeOp::Remove {
            parent: parent.map(PersistedData::id),
            id: r.id,
            recursive,
        });
    }

    pub fn append_set_acl(&self, changes: &mut dyn ChangeList) {
        self.stage(changes, |r| {
            let record = r.record.read();
            ChangeOp::SetAcl {
                id: r.id,
                acl: record.acl.as_ref().map(|a| a.to_vec()),
                stat: record.stat.clone(),
            }
        });
    }

    pub fn append_set_data(&self, changes: &mut dyn ChangeList) {
        self.stage(changes, |r| {
            let record = r.record.read();
            ChangeOp::SetData {
                id: r.id,
                data: record.data.clone(),
                stat: record.stat.clone(),
            }
        });
    }

    pub fn append_poison(&self, spec: &str, changes: &mut dyn ChangeList) {
        self.stage(changes, |r| ChangeOp::Poison {
            id: r.id,
            spec: spec.to_string(),
        });
    }
}

impl std::fmt::Debug for PersistedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedData")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}
