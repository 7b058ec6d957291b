//! Tests for ChildrenMap
//!
//! These tests verify:
//! - Tier transitions at the default thresholds
//! - Hysteresis when shrinking
//! - Lookups, removals and listings on every tier
//! - Ordered paging with `sorted_names_after`
//! - Promotion/demotion of nodes as children come and go

#[path = "../common/mod.rs"]
mod common;

use arbor::config::ChildrenThresholds;
use arbor::tree::{ChildrenMap, ChildrenRepr};
use arbor::Node;

use common::Fixture;

// =============================================================================
// Helper Functions
// =============================================================================

fn small_thresholds() -> ChildrenThresholds {
    ChildrenThresholds {
        min_dictionary: 2,
        max_dictionary: 4,
        min_sorted: 6,
        max_sorted: 8,
    }
}

fn named(fixture: &Fixture, name: &str) -> Node {
    Node::create_node(fixture.factory.create_new(name))
}

fn fill(fixture: &Fixture, map: &mut ChildrenMap, count: usize, t: &ChildrenThresholds) {
    for i in 0..count {
        let name = format!("c{:05}", i);
        map.insert(name.clone(), named(fixture, &name)).unwrap();
        map.rescale(t);
    }
}

// =============================================================================
// Upscale Tests
// =============================================================================

#[test]
fn test_new_map_is_array() {
    let map = ChildrenMap::new();

    assert_eq!(map.repr(), ChildrenRepr::Array);
    assert!(map.is_empty());
}

#[test]
fn test_default_thresholds_upscale() {
    let fixture = Fixture::new();
    let t = ChildrenThresholds::default();
    let mut map = ChildrenMap::new();

    fill(&fixture, &mut map, 16, &t);
    assert_eq!(map.repr(), ChildrenRepr::Array);

    map.insert("x17".into(), named(&fixture, "x17")).unwrap();
    map.rescale(&t);
    assert_eq!(map.repr(), ChildrenRepr::Hash);

    for i in 0..112 {
        let name = format!("y{:03}", i);
        map.insert(name.clone(), named(&fixture, &name)).unwrap();
        map.rescale(&t);
    }
    assert_eq!(map.len(), 129);
    assert_eq!(map.repr(), ChildrenRepr::Sorted);
}

#[test]
fn test_small_thresholds_reach_guarded() {
    let fixture = Fixture::new();
    let t = small_thresholds();
    let mut map = ChildrenMap::new();

    let mut seen = Vec::new();
    for i in 0..9 {
        let name = format!("n{}", i);
        map.insert(name.clone(), named(&fixture, &name)).unwrap();
        map.rescale(&t);
        seen.push(map.repr());
    }

    assert_eq!(
        seen,
        vec![
            ChildrenRepr::Array,
            ChildrenRepr::Array,
            ChildrenRepr::Hash,
            ChildrenRepr::Hash,
            ChildrenRepr::Sorted,
            ChildrenRepr::Sorted,
            ChildrenRepr::Sorted,
            ChildrenRepr::Sorted,
            ChildrenRepr::Guarded,
        ]
    );
}

// =============================================================================
// Downscale Tests
// =============================================================================

#[test]
fn test_downscale_with_hysteresis() {
    let fixture = Fixture::new();
    let t = small_thresholds();
    let mut map = ChildrenMap::new();
    fill(&fixture, &mut map, 9, &t);
    assert_eq!(map.repr(), ChildrenRepr::Guarded);

    let mut seen = Vec::new();
    for i in (0..9).rev() {
        assert!(map.remove(&format!("c{:05}", i)).is_some());
        map.rescale(&t);
        seen.push((map.len(), map.repr()));
    }

    assert_eq!(
        seen,
        vec![
            (8, ChildrenRepr::Guarded),
            (7, ChildrenRepr::Guarded),
            (6, ChildrenRepr::Guarded),
            (5, ChildrenRepr::Sorted),
            (4, ChildrenRepr::Sorted),
            (3, ChildrenRepr::Hash),
            (2, ChildrenRepr::Hash),
            (1, ChildrenRepr::Array),
            (0, ChildrenRepr::Array),
        ]
    );
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_lookup_on_every_tier() {
    let fixture = Fixture::new();
    let t = small_thresholds();
    let mut map = ChildrenMap::new();

    for (count, repr) in [
        (1, ChildrenRepr::Array),
        (3, ChildrenRepr::Hash),
        (5, ChildrenRepr::Sorted),
        (9, ChildrenRepr::Guarded),
    ] {
        while map.len() < count {
            let name = format!("c{:05}", map.len());
            map.insert(name.clone(), named(&fixture, &name)).unwrap();
            map.rescale(&t);
        }
        assert_eq!(map.repr(), repr);

        for i in 0..count {
            let name = format!("c{:05}", i);
            let child = map.get(&name).expect("child present");
            assert_eq!(child.name(), name);
        }
        assert!(map.get("missing").is_none());
        assert!(!map.contains("missing"));
        assert_eq!(map.names().len(), count);
        assert_eq!(map.nodes().len(), count);
    }
}

#[test]
fn test_duplicate_insert_rejected() {
    let fixture = Fixture::new();
    let mut map = ChildrenMap::new();

    map.insert("a".into(), named(&fixture, "a")).unwrap();
    let result = map.insert("a".into(), named(&fixture, "a"));

    assert!(result.is_err());
    assert_eq!(map.len(), 1);
}

#[test]
fn test_remove_missing_returns_none() {
    let mut map = ChildrenMap::new();
    assert!(map.remove("nothing").is_none());
}

// =============================================================================
// Ordered Paging Tests
// =============================================================================

#[test]
fn test_sorted_names_after_on_array() {
    let fixture = Fixture::new();
    let mut map = ChildrenMap::new();
    for name in ["d", "b", "a", "c"] {
        map.insert(name.into(), named(&fixture, name)).unwrap();
    }

    assert_eq!(map.sorted_names_after(None, 10), vec!["a", "b", "c", "d"]);
    assert_eq!(map.sorted_names_after(Some("b"), 10), vec!["c", "d"]);
    assert_eq!(map.sorted_names_after(Some("a"), 2), vec!["b", "c"]);
    assert!(map.sorted_names_after(Some("d"), 10).is_empty());
}

#[test]
fn test_sorted_names_after_on_guarded() {
    let fixture = Fixture::new();
    let t = small_thresholds();
    let mut map = ChildrenMap::new();
    fill(&fixture, &mut map, 12, &t);
    assert_eq!(map.repr(), ChildrenRepr::Guarded);

    let page = map.sorted_names_after(Some("c00003"), 3);

    assert_eq!(page, vec!["c00004", "c00005", "c00006"]);
}

#[test]
fn test_paging_visits_every_name_once() {
    let fixture = Fixture::new();
    let t = small_thresholds();
    let mut map = ChildrenMap::new();
    fill(&fixture, &mut map, 20, &t);

    let mut collected = Vec::new();
    let mut start: Option<String> = None;
    loop {
        let page = map.sorted_names_after(start.as_deref(), 3);
        if page.is_empty() {
            break;
        }
        start = page.last().cloned();
        collected.extend(page);
    }

    let mut expected = map.names();
    expected.sort();
    assert_eq!(collected, expected);
}

// =============================================================================
// Node Integration Tests
// =============================================================================

#[test]
fn test_node_promotes_and_demotes() {
    let fixture = Fixture::new();
    let t = small_thresholds();
    let parent = fixture.add(&fixture.root, "p");
    assert!(!parent.is_complete());
    assert_eq!(parent.children_repr(), None);

    let children: Vec<Node> = (0..9).map(|i| named(&fixture, &format!("k{}", i))).collect();
    parent.add_children(&children, &t).unwrap();
    assert!(parent.is_complete());
    assert_eq!(parent.children_repr(), Some(ChildrenRepr::Guarded));
    assert_eq!(parent.children_count(), 9);
    assert_eq!(parent.persisted().children_count(), 9);

    for i in 0..9 {
        parent.remove_child(&format!("k{}", i), &t).unwrap();
    }
    assert!(!parent.is_complete());
    assert_eq!(parent.children_count(), 0);
}

#[test]
fn test_node_wildcard_fallback_order() {
    let fixture = Fixture::new();
    let parent = fixture.add(&fixture.root, "p");
    fixture.add(&parent, "**");

    let found = parent.try_get_child("anything", true).unwrap().unwrap();
    assert_eq!(found.name(), "**");

    fixture.add(&parent, "*");
    let found = parent.try_get_child("anything", true).unwrap().unwrap();
    assert_eq!(found.name(), "*");

    assert!(parent.try_get_child("anything", false).unwrap().is_none());
}

#[test]
fn test_remove_unknown_child_is_error() {
    let fixture = Fixture::new();
    let parent = fixture.add(&fixture.root, "p");
    fixture.add(&parent, "a");

    let result = parent.remove_child("b", &ChildrenThresholds::default());

    assert!(result.is_err());
    assert_eq!(parent.children_count(), 1);
}
