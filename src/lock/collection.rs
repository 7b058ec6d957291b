//! Batched lock acquisition
//!
//! A `LayeredLockCollection` gathers the locks an operation will need, then
//! acquires all of them in one pass:
//!
//! ```text
//!   AddingLock --acquire--> Locked --release--> Released
//! ```
//!
//! Before acquiring, locks made redundant by a write lock on an ancestor are
//! dropped (a write lock on a node excludes its whole subtree). Remaining
//! requests are taken level by level, visited in (name, id) order inside a
//! level. Requests mapping to the same slot within a level are merged to the
//! strongest mode, so a slot is never read-locked and then upgraded. Merged
//! slots are taken in index order, since unrelated nodes can share a slot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{HeldLocks, LockMode, LockPool, LockSlot, SlotId};
use crate::error::{ArborError, Result};
use crate::tree::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStage {
    AddingLock,
    Locked,
    Released,
}

struct Request {
    node: Node,
    mode: LockMode,
}

pub struct LayeredLockCollection {
    pool: Arc<LockPool>,
    levels: Vec<BTreeMap<(String, u64), Request>>,
    locked: HeldLocks,
    stage: LockStage,
}

impl LayeredLockCollection {
    pub fn new(pool: Arc<LockPool>) -> Self {
        let buckets = pool.level_count().max(1);
        Self {
            pool,
            levels: (0..buckets).map(|_| BTreeMap::new()).collect(),
            locked: HeldLocks::new(),
            stage: LockStage::AddingLock,
        }
    }

    pub fn stage(&self) -> LockStage {
        self.stage
    }

    /// Queue a lock on `node` at tree `level`
    pub fn add_lock(&mut self, node: &Node, level: usize, write_required: bool) -> Result<()> {
        if self.stage != LockStage::AddingLock {
            return Err(ArborError::InvalidState(format!(
                "cannot add locks in stage {:?}",
                self.stage
            )));
        }

        let mode = if write_required {
            LockMode::Write
        } else {
            LockMode::Read
        };
        let bucket = self.pool.bucket(level);
        let request = self.levels[bucket]
            .entry((node.name(), node.id()))
            .or_insert_with(|| Request {
                node: node.clone(),
                mode,
            });
        request.mode = request.mode.max(mode);
        Ok(())
    }

    /// Queued requests (after redundancy elimination, once acquired)
    pub fn pending_count(&self) -> usize {
        self.levels.iter().map(BTreeMap::len).sum()
    }

    /// Locks currently held by this collection
    pub fn locked_count(&self) -> usize {
        self.locked.len()
    }

    pub fn holds(&self, slot: SlotId) -> Option<LockMode> {
        self.locked.mode(slot)
    }

    /// Acquire every queued lock, keeping the tokens in this collection
    pub fn acquire(&mut self, cancelled: &AtomicBool) -> Result<()> {
        let mut locked = std::mem::take(&mut self.locked);
        let result = self.acquire_with(cancelled, &mut locked);
        self.locked = locked;
        result
    }

    /// Acquire every queued lock into a transaction's held set
    ///
    /// Slots `held` already covers are skipped; the tokens belong to `held`.
    pub fn acquire_into(&mut self, cancelled: &AtomicBool, held: &mut HeldLocks) -> Result<()> {
        self.acquire_with(cancelled, held)
    }

    fn acquire_with(&mut self, cancelled: &AtomicBool, held: &mut HeldLocks) -> Result<()> {
        if self.stage != LockStage::AddingLock {
            return Err(ArborError::InvalidState(format!(
                "cannot acquire locks in stage {:?}",
                self.stage
            )));
        }
        self.stage = LockStage::Locked;
        self.remove_redundant_locks();

        for (bucket, requests) in self.levels.iter().enumerate() {
            let mut plan: Vec<(LockSlot, LockMode, String)> = Vec::new();
            let mut by_slot: HashMap<SlotId, usize> = HashMap::new();

            for ((name, _), request) in requests {
                let Some(slot) = request.node.lock_slot(&self.pool, bucket, request.mode) else {
                    continue;
                };
                match by_slot.get(&slot.id()) {
                    Some(&i) => plan[i].1 = plan[i].1.max(request.mode),
                    None => {
                        by_slot.insert(slot.id(), plan.len());
                        plan.push((slot, request.mode, name.clone()));
                    }
                }
            }

            plan.sort_by_key(|(slot, _, _)| slot.id());
            for (slot, mode, name) in plan {
                if cancelled.load(Ordering::Acquire) {
                    return Err(ArborError::Retriable("lock acquisition cancelled".to_string()));
                }
                held.acquire(&self.pool, slot, mode, bucket, true, || name)?;
            }
        }

        tracing::debug!(locks = held.len(), "lock collection acquired: {}", self);
        Ok(())
    }

    /// Drop requests covered by a write request on an ancestor
    fn remove_redundant_locks(&mut self) {
        let writers: HashSet<u64> = self
            .levels
            .iter()
            .flat_map(BTreeMap::values)
            .filter(|r| r.mode == LockMode::Write)
            .map(|r| r.node.id())
            .collect();
        if writers.is_empty() {
            return;
        }

        for requests in &mut self.levels {
            requests.retain(|_, r| !r.node.ancestors().iter().any(|a| writers.contains(&a.id())));
        }
    }

    /// Release held locks, most recent first; safe to call again
    pub fn release(&mut self) {
        if self.stage == LockStage::Released {
            return;
        }
        self.locked.release_all();
        self.stage = LockStage::Released;
    }
}

impl Drop for LayeredLockCollection {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Display for LayeredLockCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}", self.stage)?;
        for (bucket, requests) in self.levels.iter().enumerate() {
            for ((name, id), request) in requests {
                let mode = match request.mode {
                    LockMode::Read => 'R',
                    LockMode::Write => 'W',
                };
                write!(f, " L{}:{}({})={}", bucket, name, id, mode)?;
            }
        }
        write!(f, "]")
    }
}
