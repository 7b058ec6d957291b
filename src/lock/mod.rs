//! Lock Module
//!
//! Hierarchical reader/writer locking for the tree.
//!
//! ## Responsibilities
//! - Map a (tree level, node hash) pair to a lock object (`LockPool`)
//! - Track which lock slots a transaction holds (`HeldLocks`)
//! - Collect a lock set up front and acquire it in a global order
//!   (`LayeredLockCollection`)
//!
//! ## Lock Order
//! Path resolution always locks ancestors before descendants, and tree depth
//! selects the pool level, so locks are taken in ascending level order. The
//! batched collection additionally orders by slot index within a level so two
//! transactions locking overlapping sets cannot deadlock. Every wait is
//! bounded by `max_acquire_wait`; a timeout is a retriable error.

mod collection;
mod held;
mod pool;

pub use collection::{LayeredLockCollection, LockStage};
pub use held::HeldLocks;
pub use pool::{LockMode, LockPool, LockSlot, LockToken, SlotId};
