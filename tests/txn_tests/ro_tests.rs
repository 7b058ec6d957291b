//! Tests for LockListForRo
//!
//! These tests verify:
//! - Lock-free sessions read without touching tree locks
//! - Lock-free reads are still ACL checked
//! - Every mutation is rejected as unsupported

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::AtomicBool;

use arbor::config::Config;
use arbor::data::{Acl, Perm, Scheme};
use arbor::{ArborError, LockListTransaction, Request, Response, SessionAuth};

use common::{anon, children_of, mkdirs, open_tree, open_tree_with};

// =============================================================================
// Helper Functions
// =============================================================================

fn lock_free() -> SessionAuth {
    anon().lock_free(true)
}

fn has_child(tree: &arbor::DataTree, parent: &str, name: &str) -> bool {
    children_of(tree, parent).iter().any(|c| c == name)
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_lock_free_read_takes_no_locks() {
    let (tree, _, counters) = open_tree_with(Config::default());
    mkdirs(&tree, "/a/b");
    let before = counters.acquired();

    let response = tree.execute(&Request::get_data("/a/b"), &lock_free()).unwrap();

    assert!(matches!(response, Response::Data { ref path, .. } if path == "/a/b"));
    assert_eq!(counters.acquired(), before);
}

#[test]
fn test_lock_free_read_passes_writer() {
    let config = Config::builder().max_acquire_wait_ms(50).build();
    let (tree, _, _) = open_tree_with(config);
    mkdirs(&tree, "/a");

    let mut writer = tree.begin(anon());
    tree.execute_in(&Request::set_data("/a", "pending", -1), &mut writer)
        .unwrap();

    // A locking read has to wait for the writer
    let err = tree.execute(&Request::get_data("/a"), &anon()).unwrap_err();
    assert!(err.is_retriable());

    // A lock-free read goes through and sees the uncommitted value
    match tree.execute(&Request::get_data("/a"), &lock_free()).unwrap() {
        Response::Data { data, .. } => assert_eq!(data.as_deref(), Some(&b"pending"[..])),
        other => panic!("unexpected response {:?}", other),
    }

    writer.complete().unwrap();
}

#[test]
fn test_lock_free_read_checks_acl() {
    let tree = open_tree();
    mkdirs(&tree, "/secret/inner");
    tree.execute(
        &Request::SetAcl {
            path: "/secret".into(),
            acl: Some(vec![Acl::new(Perm::ALL, Scheme::Host, "admin")]),
            aversion: -1,
        },
        &anon(),
    )
    .unwrap();

    let err = tree
        .execute(&Request::get_children("/secret/inner"), &lock_free())
        .unwrap_err();
    assert!(err.is_access_denied());

    let admin = lock_free().with_identity("admin");
    assert!(tree.execute(&Request::exists("/secret/inner"), &admin).is_ok());
}

#[test]
fn test_read_only_multi_runs_lock_free() {
    let (tree, _, counters) = open_tree_with(Config::default());
    mkdirs(&tree, "/a/b");
    let before = counters.acquired();

    let response = tree
        .execute(
            &Request::Multi(vec![Request::exists("/a"), Request::get_children("/a")]),
            &lock_free(),
        )
        .unwrap();

    match response {
        Response::Multi(responses) => {
            assert!(matches!(responses[0], Response::Exists(Some(_))));
            assert_eq!(responses[1], Response::Children(vec!["b".to_string()]));
        }
        other => panic!("unexpected response {:?}", other),
    }
    assert_eq!(counters.acquired(), before);
}

// =============================================================================
// Mutation Rejection Tests
// =============================================================================

#[test]
fn test_mutations_not_supported() {
    let tree = open_tree();
    mkdirs(&tree, "/a");
    let a = tree.root().find_unlocked("/a").unwrap().unwrap();
    let mut txn = tree.begin_read(anon());

    let result = tree.execute_in(&Request::create("/a/b", ""), &mut txn);
    assert!(matches!(result, Err(ArborError::NotSupported(_))));

    assert!(matches!(
        txn.add_lock_rw(&a, Perm::WRITE, 1, false),
        Err(ArborError::NotSupported(_))
    ));
    assert!(matches!(
        txn.append_poison(&a, "boom", 0),
        Err(ArborError::NotSupported(_))
    ));
    assert!(!has_child(&tree, "/a", "b"));
}

#[test]
fn test_lifecycle_is_trivial() {
    let tree = open_tree();
    mkdirs(&tree, "/a");
    let a = tree.root().find_unlocked("/a").unwrap().unwrap();
    let mut txn = tree.begin_read(anon());

    assert_eq!(txn.tx_id(), 0);
    assert!(txn.finish_synchronous());
    assert!(!txn.add_lock_ro(&a, 1).unwrap());
    txn.lock_all(&AtomicBool::new(false)).unwrap();
    assert!(txn.snap_stat_if_needed(a.persisted()).is_none());
    assert!(txn
        .validate_lock_list(None, Perm::NONE, Some(&a), Perm::WRITE)
        .is_ok());

    txn.mark_for_abort();
    assert!(txn.is_marked_for_abort());
    assert!(txn.complete().unwrap().replication.is_finished());
}
