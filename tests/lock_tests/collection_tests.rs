//! Tests for LayeredLockCollection
//!
//! These tests verify:
//! - The AddingLock -> Locked -> Released stage machine
//! - Redundant locks under a write-locked ancestor are never taken
//! - Requests sharing a slot merge to the strongest mode
//! - Release is LIFO and idempotent, and happens on drop
//! - Cooperative cancellation
//! - Overlapping lock sets across threads never deadlock

#[path = "../common/mod.rs"]
mod common;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbor::config::LockConfig;
use arbor::instrumentation::CountingInstrumentation;
use arbor::lock::{HeldLocks, LayeredLockCollection, LockMode, LockPool, LockStage, SlotId};
use arbor::{ArborError, Node};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::Fixture;

// =============================================================================
// Helper Functions
// =============================================================================

fn pool_with(sizes: Vec<usize>) -> (Arc<LockPool>, Arc<CountingInstrumentation>) {
    let counters = Arc::new(CountingInstrumentation::new());
    let config = LockConfig {
        sizes_per_level: sizes,
        max_acquire_wait: Duration::from_secs(5),
        ..Default::default()
    };
    let pool = LockPool::new(&config, Arc::clone(&counters) as _).unwrap();
    (Arc::new(pool), counters)
}

fn not_cancelled() -> AtomicBool {
    AtomicBool::new(false)
}

/// /a/b/c and /x
fn sample_tree(fixture: &Fixture) -> (Node, Node, Node, Node) {
    let a = fixture.add(&fixture.root, "a");
    let b = fixture.add(&a, "b");
    let c = fixture.add(&b, "c");
    let x = fixture.add(&fixture.root, "x");
    (a, b, c, x)
}

// =============================================================================
// Stage Machine Tests
// =============================================================================

#[test]
fn test_stage_machine() {
    let fixture = Fixture::new();
    let (a, _, _, x) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 100, 100, 100]);
    let mut collection = LayeredLockCollection::new(pool);
    assert_eq!(collection.stage(), LockStage::AddingLock);

    collection.add_lock(&a, 1, false).unwrap();
    collection.acquire(&not_cancelled()).unwrap();
    assert_eq!(collection.stage(), LockStage::Locked);

    assert!(matches!(
        collection.add_lock(&x, 1, false),
        Err(ArborError::InvalidState(_))
    ));
    assert!(matches!(
        collection.acquire(&not_cancelled()),
        Err(ArborError::InvalidState(_))
    ));

    collection.release();
    assert_eq!(collection.stage(), LockStage::Released);
    collection.release();
    assert_eq!(collection.locked_count(), 0);
}

#[test]
fn test_display_lists_requests() {
    let fixture = Fixture::new();
    let (a, b, _, _) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 100, 100]);
    let mut collection = LayeredLockCollection::new(pool);

    collection.add_lock(&a, 1, true).unwrap();
    collection.add_lock(&b, 2, false).unwrap();
    let shown = collection.to_string();

    assert!(shown.starts_with("[AddingLock"));
    assert!(shown.contains(&format!("L1:a({})=W", a.id())));
    assert!(shown.contains(&format!("L2:b({})=R", b.id())));
}

// =============================================================================
// Redundancy Elimination Tests
// =============================================================================

#[test]
fn test_write_on_ancestor_elides_descendants() {
    let fixture = Fixture::new();
    let (a, b, c, x) = sample_tree(&fixture);
    let (pool, counters) = pool_with(vec![1, 1000, 1000, 1000]);
    let mut collection = LayeredLockCollection::new(pool);

    collection.add_lock(&a, 1, true).unwrap();
    collection.add_lock(&b, 2, false).unwrap();
    collection.add_lock(&c, 3, true).unwrap();
    collection.add_lock(&x, 1, false).unwrap();
    assert_eq!(collection.pending_count(), 4);

    collection.acquire(&not_cancelled()).unwrap();

    assert_eq!(collection.pending_count(), 2);
    assert_eq!(collection.locked_count(), 2);
    assert_eq!(counters.batched_acquired(), 2);
}

#[test]
fn test_read_only_set_keeps_everything() {
    let fixture = Fixture::new();
    let (a, b, c, _) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 1000, 1000, 1000]);
    let mut collection = LayeredLockCollection::new(pool);

    for (node, level) in [(&a, 1), (&b, 2), (&c, 3)] {
        collection.add_lock(node, level, false).unwrap();
    }
    collection.acquire(&not_cancelled()).unwrap();

    assert_eq!(collection.locked_count(), 3);
}

#[test]
fn test_repeated_request_keeps_strongest_mode() {
    let fixture = Fixture::new();
    let (a, _, _, _) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 1000]);
    let slot = a.lock_slot(&pool, 1, LockMode::Write).unwrap().id();
    let mut collection = LayeredLockCollection::new(Arc::clone(&pool));

    collection.add_lock(&a, 1, true).unwrap();
    collection.add_lock(&a, 1, false).unwrap();
    assert_eq!(collection.pending_count(), 1);

    collection.acquire(&not_cancelled()).unwrap();
    assert_eq!(collection.holds(slot), Some(LockMode::Write));
}

#[test]
fn test_shared_slot_merges_to_strongest() {
    let fixture = Fixture::new();
    let (a, _, _, x) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 1]);
    let mut collection = LayeredLockCollection::new(pool);

    collection.add_lock(&a, 1, false).unwrap();
    collection.add_lock(&x, 1, true).unwrap();
    collection.acquire(&not_cancelled()).unwrap();

    assert_eq!(collection.locked_count(), 1);
    assert_eq!(
        collection.holds(SlotId { level: 1, index: 0 }),
        Some(LockMode::Write)
    );
}

// =============================================================================
// Release Tests
// =============================================================================

#[test]
fn test_release_frees_locks_for_others() {
    let fixture = Fixture::new();
    let (a, _, _, x) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 100]);

    let mut first = LayeredLockCollection::new(Arc::clone(&pool));
    first.add_lock(&a, 1, true).unwrap();
    first.add_lock(&x, 1, true).unwrap();
    first.acquire(&not_cancelled()).unwrap();
    first.release();

    let mut second = LayeredLockCollection::new(Arc::clone(&pool));
    second.add_lock(&a, 1, true).unwrap();
    second.add_lock(&x, 1, true).unwrap();
    second.acquire(&not_cancelled()).unwrap();
    assert!(second.locked_count() >= 1);
}

#[test]
fn test_drop_releases_locks() {
    let fixture = Fixture::new();
    let (a, _, _, _) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 100]);
    {
        let mut collection = LayeredLockCollection::new(Arc::clone(&pool));
        collection.add_lock(&a, 1, true).unwrap();
        collection.acquire(&not_cancelled()).unwrap();
    }

    let slot = a.lock_slot(&pool, 1, LockMode::Write).unwrap();
    assert!(pool.acquire(&slot, LockMode::Write, 1, false, String::new).is_ok());
}

#[test]
fn test_acquire_into_skips_held_slots() {
    let fixture = Fixture::new();
    let (a, _, _, x) = sample_tree(&fixture);
    let (pool, _) = pool_with(vec![1, 1000]);
    let mut held = HeldLocks::new();
    let slot = a.lock_slot(&pool, 1, LockMode::Write).unwrap();
    held.acquire(&pool, slot, LockMode::Write, 1, false, String::new).unwrap();

    let mut collection = LayeredLockCollection::new(Arc::clone(&pool));
    collection.add_lock(&a, 1, false).unwrap();
    collection.add_lock(&x, 1, false).unwrap();
    collection.acquire_into(&not_cancelled(), &mut held).unwrap();

    assert_eq!(held.len(), 2);
    assert_eq!(held.write_count(), 1);
    assert_eq!(collection.locked_count(), 0);
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[test]
fn test_cancelled_acquire_is_retriable() {
    let fixture = Fixture::new();
    let (a, _, _, _) = sample_tree(&fixture);
    let (pool, counters) = pool_with(vec![1, 100]);
    let mut collection = LayeredLockCollection::new(pool);
    collection.add_lock(&a, 1, true).unwrap();

    let err = collection.acquire(&AtomicBool::new(true)).unwrap_err();

    assert!(err.is_retriable());
    assert_eq!(counters.acquired(), 0);
    collection.release();
    assert_eq!(collection.stage(), LockStage::Released);
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The locks actually held are exactly the deduplicated slots of the
    /// requests that have no write-requesting ancestor
    #[test]
    fn prop_held_locks_match_elimination_oracle(
        parents in prop::collection::vec(any::<usize>(), 1..24),
        requests in prop::collection::vec((any::<usize>(), any::<bool>()), 1..16),
    ) {
        let fixture = Fixture::new();
        let mut nodes = vec![fixture.root.clone()];
        for (i, p) in parents.iter().enumerate() {
            let parent = nodes[p % nodes.len()].clone();
            nodes.push(fixture.add(&parent, &format!("n{}", i)));
        }

        let (pool, _) = pool_with(vec![1, 3, 5]);
        let mut collection = LayeredLockCollection::new(Arc::clone(&pool));
        let mut modes: HashMap<u64, (Node, LockMode)> = HashMap::new();
        for (idx, write) in &requests {
            let node = &nodes[idx % nodes.len()];
            collection.add_lock(node, node.level(), *write).unwrap();
            let mode = if *write { LockMode::Write } else { LockMode::Read };
            modes
                .entry(node.id())
                .and_modify(|e| e.1 = e.1.max(mode))
                .or_insert((node.clone(), mode));
        }
        collection.acquire(&not_cancelled()).unwrap();

        let writers: HashSet<u64> = modes
            .values()
            .filter(|(_, m)| *m == LockMode::Write)
            .map(|(n, _)| n.id())
            .collect();
        let mut expected: HashMap<SlotId, LockMode> = HashMap::new();
        for (node, mode) in modes.values() {
            if node.ancestors().iter().any(|a| writers.contains(&a.id())) {
                continue;
            }
            let slot = pool.find_lock(node.level(), node.hash_code(), *mode).unwrap().id();
            let entry = expected.entry(slot).or_insert(*mode);
            *entry = (*entry).max(*mode);
        }

        prop_assert_eq!(collection.locked_count(), expected.len());
        for (slot, mode) in &expected {
            prop_assert_eq!(collection.holds(*slot), Some(*mode));
        }
    }
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_overlapping_sets_do_not_deadlock() {
    let fixture = Fixture::new();
    let mut nodes = Vec::new();
    for i in 0..3 {
        let top = fixture.add(&fixture.root, &format!("t{}", i));
        for j in 0..3 {
            nodes.push(fixture.add(&top, &format!("c{}", j)));
        }
        nodes.push(top);
    }
    // Tiny pools force unrelated nodes onto shared slots
    let (pool, counters) = pool_with(vec![1, 2, 2]);
    let failures = AtomicUsize::new(0);

    crossbeam::thread::scope(|s| {
        for t in 0..4u64 {
            let nodes = &nodes;
            let pool = &pool;
            let failures = &failures;
            s.spawn(move |_| {
                let mut rng = StdRng::seed_from_u64(t + 1);
                for _ in 0..300 {
                    let mut collection = LayeredLockCollection::new(Arc::clone(pool));
                    for _ in 0..1 + rng.gen_range(0..4) {
                        let node = &nodes[rng.gen_range(0..nodes.len())];
                        let write = rng.gen_range(0..3) == 0;
                        collection.add_lock(node, node.level(), write).unwrap();
                    }
                    if collection.acquire(&AtomicBool::new(false)).is_err() {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                    collection.release();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(counters.failed(), 0);
}
