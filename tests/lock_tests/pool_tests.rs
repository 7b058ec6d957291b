//! Tests for LockPool and HeldLocks
//!
//! These tests verify:
//! - (level, hash) to slot mapping, including levels past the last pool
//! - Single, external and readers-unlocked strategies
//! - Bounded waits surface as retriable timeouts
//! - Held lock bookkeeping: no-op re-requests, upgrades, release

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arbor::config::{LockConfig, LockStrategyKind};
use arbor::instrumentation::CountingInstrumentation;
use arbor::lock::{HeldLocks, LockMode, LockPool, SlotId};
use arbor::ArborError;

// =============================================================================
// Helper Functions
// =============================================================================

fn pool_with(config: LockConfig) -> (Arc<LockPool>, Arc<CountingInstrumentation>) {
    let counters = Arc::new(CountingInstrumentation::new());
    let pool = LockPool::new(&config, Arc::clone(&counters) as _).unwrap();
    (Arc::new(pool), counters)
}

fn small_pool() -> (Arc<LockPool>, Arc<CountingInstrumentation>) {
    pool_with(LockConfig {
        sizes_per_level: vec![1, 4, 8],
        max_acquire_wait: Duration::from_millis(50),
        ..Default::default()
    })
}

fn slot_id(level: usize, index: usize) -> SlotId {
    SlotId { level, index }
}

// =============================================================================
// Slot Mapping Tests
// =============================================================================

#[test]
fn test_slot_mapping_per_level() {
    let (pool, _) = small_pool();

    assert_eq!(pool.level_count(), 3);
    assert_eq!(pool.find_lock(0, 12345, LockMode::Read).unwrap().id(), slot_id(0, 0));
    assert_eq!(pool.find_lock(1, 6, LockMode::Read).unwrap().id(), slot_id(1, 2));
    assert_eq!(pool.find_lock(2, 19, LockMode::Write).unwrap().id(), slot_id(2, 3));
}

#[test]
fn test_deep_levels_share_last_pool() {
    let (pool, _) = small_pool();

    assert_eq!(pool.bucket(7), 2);
    assert_eq!(pool.find_lock(7, 19, LockMode::Read).unwrap().id(), slot_id(2, 3));
}

#[test]
fn test_hash_high_bit_is_masked() {
    let (pool, _) = small_pool();

    let slot = pool.find_lock(1, 0x8000_0000 + 5, LockMode::Read).unwrap();

    assert_eq!(slot.id(), slot_id(1, 1));
}

#[test]
fn test_single_strategy_uses_one_lock() {
    let (pool, _) = pool_with(LockConfig {
        strategy: LockStrategyKind::Single,
        ..Default::default()
    });

    assert_eq!(pool.level_count(), 1);
    for (level, hash) in [(0, 1), (3, 77), (9, 123_456)] {
        assert_eq!(
            pool.find_lock(level, hash, LockMode::Write).unwrap().id(),
            slot_id(0, 0)
        );
    }
}

#[test]
fn test_external_strategy_never_locks() {
    let (pool, _) = pool_with(LockConfig {
        strategy: LockStrategyKind::External,
        ..Default::default()
    });

    assert!(pool.find_lock(0, 1, LockMode::Read).is_none());
    assert!(pool.find_lock(2, 1, LockMode::Write).is_none());
}

#[test]
fn test_readers_unlocked_skips_read_locks_only() {
    let (pool, _) = pool_with(LockConfig {
        readers_unlocked: true,
        ..Default::default()
    });

    assert!(pool.find_lock(1, 3, LockMode::Read).is_none());
    assert!(pool.find_lock(1, 3, LockMode::Write).is_some());
}

#[test]
fn test_zero_sized_level_rejected() {
    let counters = Arc::new(CountingInstrumentation::new());
    let config = LockConfig {
        sizes_per_level: vec![1, 0],
        ..Default::default()
    };

    let result = LockPool::new(&config, counters);

    assert!(matches!(result, Err(ArborError::Config(_))));
}

// =============================================================================
// Acquisition Tests
// =============================================================================

#[test]
fn test_readers_share_a_slot() {
    let (pool, counters) = small_pool();
    let slot = pool.find_lock(1, 1, LockMode::Read).unwrap();

    let first = pool.acquire(&slot, LockMode::Read, 1, false, || "a".into()).unwrap();
    let second = pool.acquire(&slot, LockMode::Read, 1, false, || "b".into()).unwrap();

    assert_eq!(first.mode(), LockMode::Read);
    assert_eq!(second.slot(), slot.id());
    assert_eq!(counters.acquired(), 2);
    assert_eq!(counters.batched_acquired(), 0);
}

#[test]
fn test_timeout_is_retriable() {
    let (pool, counters) = small_pool();
    let slot = pool.find_lock(1, 1, LockMode::Write).unwrap();
    let _writer = pool.acquire(&slot, LockMode::Write, 1, false, || "w".into()).unwrap();

    let err = pool
        .acquire(&slot, LockMode::Read, 1, false, || "blocked".into())
        .unwrap_err();

    assert!(err.is_retriable());
    match err {
        ArborError::LockTimeout { level, name, .. } => {
            assert_eq!(level, 1);
            assert_eq!(name, "blocked");
        }
        other => panic!("expected LockTimeout, got {:?}", other),
    }
    assert_eq!(counters.failed(), 1);
}

#[test]
fn test_dropping_token_releases() {
    let (pool, _) = small_pool();
    let slot = pool.find_lock(2, 5, LockMode::Write).unwrap();

    let token = pool.acquire(&slot, LockMode::Write, 2, false, String::new).unwrap();
    drop(token);

    assert!(pool.acquire(&slot, LockMode::Write, 2, false, String::new).is_ok());
}

#[test]
fn test_writer_waits_for_reader() {
    let (pool, _) = pool_with(LockConfig {
        sizes_per_level: vec![1],
        max_acquire_wait: Duration::from_secs(5),
        ..Default::default()
    });
    let slot = pool.find_lock(0, 0, LockMode::Read).unwrap();
    let reader = pool.acquire(&slot, LockMode::Read, 0, false, String::new).unwrap();

    let handle = {
        let pool = Arc::clone(&pool);
        let slot = slot.clone();
        thread::spawn(move || {
            pool.acquire(&slot, LockMode::Write, 0, false, String::new)
                .map(|t| t.mode())
        })
    };

    thread::sleep(Duration::from_millis(20));
    drop(reader);

    assert_eq!(handle.join().unwrap().unwrap(), LockMode::Write);
}

// =============================================================================
// Held Locks Tests
// =============================================================================

#[test]
fn test_held_same_or_weaker_mode_is_noop() {
    let (pool, _) = small_pool();
    let mut held = HeldLocks::new();
    let slot = pool.find_lock(1, 2, LockMode::Read).unwrap();

    assert!(held.acquire(&pool, slot.clone(), LockMode::Write, 1, false, String::new).unwrap());
    assert!(!held.acquire(&pool, slot.clone(), LockMode::Write, 1, false, String::new).unwrap());
    assert!(!held.acquire(&pool, slot.clone(), LockMode::Read, 1, false, String::new).unwrap());

    assert_eq!(held.len(), 1);
    assert_eq!(held.mode(slot.id()), Some(LockMode::Write));
}

#[test]
fn test_held_read_upgrades_to_write() {
    let (pool, _) = small_pool();
    let mut held = HeldLocks::new();
    let slot = pool.find_lock(1, 2, LockMode::Read).unwrap();

    held.acquire(&pool, slot.clone(), LockMode::Read, 1, false, String::new).unwrap();
    assert!(held.holds(slot.id(), LockMode::Read));
    assert!(!held.holds(slot.id(), LockMode::Write));

    assert!(held.acquire(&pool, slot.clone(), LockMode::Write, 1, false, String::new).unwrap());

    assert_eq!(held.len(), 1);
    assert_eq!(held.write_count(), 1);
    assert!(held.holds(slot.id(), LockMode::Read));
}

#[test]
fn test_release_all_frees_slots() {
    let (pool, _) = small_pool();
    let mut held = HeldLocks::new();
    for hash in 0..4 {
        let slot = pool.find_lock(1, hash, LockMode::Write).unwrap();
        held.acquire(&pool, slot, LockMode::Write, 1, false, String::new).unwrap();
    }
    assert_eq!(held.len(), 4);

    held.release_all();
    assert!(held.is_empty());

    let mut other = HeldLocks::new();
    for hash in 0..4 {
        let slot = pool.find_lock(1, hash, LockMode::Write).unwrap();
        assert!(other.acquire(&pool, slot, LockMode::Write, 1, false, String::new).unwrap());
    }
}

#[test]
fn test_dropping_held_locks_releases() {
    let (pool, _) = small_pool();
    let slot = pool.find_lock(2, 9, LockMode::Write).unwrap();
    {
        let mut held = HeldLocks::new();
        held.acquire(&pool, slot.clone(), LockMode::Write, 2, false, String::new).unwrap();
    }

    assert!(pool.acquire(&slot, LockMode::Write, 2, false, String::new).is_ok());
}

#[test]
fn test_mode_ordering() {
    assert!(LockMode::Read < LockMode::Write);
    assert_eq!(LockMode::Read.max(LockMode::Write), LockMode::Write);
}
