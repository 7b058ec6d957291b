//! Held lock tracking
//!
//! Records the strongest mode held per slot and keeps tokens on a LIFO
//! stack. Re-requesting a slot at an equal or weaker mode is a no-op; a read
//! held slot requested for write is upgraded by releasing the read and then
//! taking the write. The caller always holds the ancestors read-locked while
//! it does so, which keeps the node from being unlinked in between.

use std::collections::HashMap;

use super::{LockMode, LockPool, LockSlot, LockToken, SlotId};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct HeldLocks {
    modes: HashMap<SlotId, LockMode>,
    tokens: Vec<LockToken>,
}

impl HeldLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self, slot: SlotId) -> Option<LockMode> {
        self.modes.get(&slot).copied()
    }

    /// Held at `mode` or stronger
    pub fn holds(&self, slot: SlotId, mode: LockMode) -> bool {
        self.mode(slot).is_some_and(|held| held >= mode)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn write_count(&self) -> usize {
        self.modes.values().filter(|m| **m == LockMode::Write).count()
    }

    /// Take `slot` in `mode`; `Ok(false)` if it was already held strongly enough
    pub fn acquire(
        &mut self,
        pool: &LockPool,
        slot: LockSlot,
        mode: LockMode,
        level: usize,
        batched: bool,
        name: impl FnOnce() -> String,
    ) -> Result<bool> {
        let id = slot.id();
        match self.mode(id) {
            Some(held) if held >= mode => return Ok(false),
            Some(_) => self.release_slot(id),
            None => {}
        }

        let token = pool.acquire(&slot, mode, level, batched, name)?;
        self.modes.insert(id, mode);
        self.tokens.push(token);
        Ok(true)
    }

    fn release_slot(&mut self, id: SlotId) {
        if let Some(pos) = self.tokens.iter().rposition(|t| t.slot() == id) {
            drop(self.tokens.remove(pos));
        }
        self.modes.remove(&id);
    }

    /// Release everything, most recent first
    pub fn release_all(&mut self) {
        while let Some(token) = self.tokens.pop() {
            drop(token);
        }
        self.modes.clear();
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        self.release_all();
    }
}
