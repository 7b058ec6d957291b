//! Lock pool
//!
//! Multi-level pool of reader/writer locks. Level `l` holds
//! `sizes_per_level[l]` locks; levels past the end share the last pool. A
//! node at level `l` with hash `h` maps to `pool[l][h % len]`, so many nodes
//! share a lock and unrelated nodes can collide. Collisions are harmless as
//! long as the lock order holds.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::config::{LockConfig, LockStrategyKind};
use crate::error::{ArborError, Result};
use crate::instrumentation::Instrumentation;

type LockObject = Arc<RwLock<()>>;

/// Position of a lock object in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub level: usize,
    pub index: usize,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}#{}", self.level, self.index)
    }
}

/// Read is weaker than Write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    Read,
    Write,
}

/// A lock object together with its position
#[derive(Clone)]
pub struct LockSlot {
    id: SlotId,
    lock: LockObject,
}

impl LockSlot {
    pub fn id(&self) -> SlotId {
        self.id
    }
}

impl fmt::Debug for LockSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockSlot({})", self.id)
    }
}

enum Guard {
    Read(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Write(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Proof of one held acquisition; dropping it releases the lock exactly once
pub struct LockToken {
    slot: SlotId,
    _guard: Guard,
}

impl LockToken {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn mode(&self) -> LockMode {
        match self._guard {
            Guard::Read(_) => LockMode::Read,
            Guard::Write(_) => LockMode::Write,
        }
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({}, {:?})", self.slot, self.mode())
    }
}

/// Provider of tree locks
pub struct LockPool {
    strategy: LockStrategyKind,
    readers_unlocked: bool,
    levels: Vec<Vec<LockObject>>,
    max_wait: Duration,
    instrumentation: Arc<dyn Instrumentation>,
}

impl LockPool {
    pub fn new(config: &LockConfig, instrumentation: Arc<dyn Instrumentation>) -> Result<Self> {
        let levels = match config.strategy {
            LockStrategyKind::MultiLevel => {
                if config.sizes_per_level.is_empty() || config.sizes_per_level.contains(&0) {
                    return Err(ArborError::Config(
                        "lock sizes per level must be > 0".to_string(),
                    ));
                }
                config
                    .sizes_per_level
                    .iter()
                    .map(|&n| (0..n).map(|_| Arc::new(RwLock::new(()))).collect())
                    .collect()
            }
            LockStrategyKind::Single => vec![vec![Arc::new(RwLock::new(()))]],
            LockStrategyKind::External => Vec::new(),
        };

        tracing::debug!(
            strategy = ?config.strategy,
            readers_unlocked = config.readers_unlocked,
            levels = levels.len(),
            "lock pool created"
        );

        Ok(Self {
            strategy: config.strategy,
            readers_unlocked: config.readers_unlocked,
            levels,
            max_wait: config.max_acquire_wait,
            instrumentation,
        })
    }

    pub fn strategy(&self) -> LockStrategyKind {
        self.strategy
    }

    pub fn readers_unlocked(&self) -> bool {
        self.readers_unlocked
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Pool bucket used for a tree level
    pub fn bucket(&self, level: usize) -> usize {
        level.min(self.levels.len().saturating_sub(1))
    }

    pub fn instrumentation(&self) -> &Arc<dyn Instrumentation> {
        &self.instrumentation
    }

    /// Lock object for a node at `level` with `hash`; None means lock-free
    pub fn find_lock(&self, level: usize, hash: u64, mode: LockMode) -> Option<LockSlot> {
        if self.readers_unlocked && mode == LockMode::Read {
            return None;
        }

        let bucket = self.bucket(level);
        let pool = self.levels.get(bucket)?;
        let index = ((hash & 0x7fff_ffff) % pool.len() as u64) as usize;

        Some(LockSlot {
            id: SlotId {
                level: bucket,
                index,
            },
            lock: Arc::clone(&pool[index]),
        })
    }

    /// Block (up to `max_wait`) for `slot` in `mode`
    pub fn acquire(
        &self,
        slot: &LockSlot,
        mode: LockMode,
        level: usize,
        batched: bool,
        name: impl FnOnce() -> String,
    ) -> Result<LockToken> {
        let start = Instant::now();
        let guard = match mode {
            LockMode::Read => slot.lock.try_read_arc_for(self.max_wait).map(Guard::Read),
            LockMode::Write => slot.lock.try_write_arc_for(self.max_wait).map(Guard::Write),
        };
        let elapsed = start.elapsed();

        self.instrumentation
            .on_acquire_lock(batched, guard.is_some(), level, elapsed);

        match guard {
            Some(guard) => Ok(LockToken {
                slot: slot.id,
                _guard: guard,
            }),
            None => Err(ArborError::LockTimeout {
                level,
                name: name(),
                waited_ms: elapsed.as_millis(),
            }),
        }
    }
}

impl fmt::Debug for LockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockPool")
            .field("strategy", &self.strategy)
            .field("readers_unlocked", &self.readers_unlocked)
            .field(
                "sizes",
                &self.levels.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}
