//! Tests for Config
//!
//! These tests verify:
//! - Lock strategy settings strings parse with the unlocked-readers flag
//! - Malformed settings fall back to the defaults
//! - Cross-field validation rejects inconsistent configurations

use std::sync::Arc;

use arbor::config::{
    ChildrenThresholds, Config, LockConfig, LockStrategyKind, LockStrategyOption,
    DEFAULT_LOCK_SIZES,
};
use arbor::persist::MemoryReplicator;
use arbor::{ArborError, DataTree};

// =============================================================================
// Settings Parsing Tests
// =============================================================================

#[test]
fn test_parse_lock_strategy() {
    let option: LockStrategyOption = "MultiLevelRWLocks".parse().unwrap();
    assert_eq!(option.kind, LockStrategyKind::MultiLevel);
    assert!(!option.readers_unlocked);

    let option: LockStrategyOption = "SingleRWLock|ReaderGoUnlocked".parse().unwrap();
    assert_eq!(option.kind, LockStrategyKind::Single);
    assert!(option.readers_unlocked);

    let option: LockStrategyOption = " LocksByBackend ".parse().unwrap();
    assert_eq!(option.kind, LockStrategyKind::External);
}

#[test]
fn test_parse_lock_strategy_errors() {
    assert!(matches!(
        "Spinlocks".parse::<LockStrategyOption>(),
        Err(ArborError::Config(_))
    ));
    assert!(matches!(
        "ReaderGoUnlocked".parse::<LockStrategyOption>(),
        Err(ArborError::Config(_))
    ));
}

#[test]
fn test_parse_sizes() {
    assert_eq!(LockConfig::parse_sizes("1, 8,64").unwrap(), vec![1, 8, 64]);
    assert!(LockConfig::parse_sizes("1,0,4").is_err());
    assert!(LockConfig::parse_sizes("1,x").is_err());
    assert!(LockConfig::parse_sizes("").is_err());
}

#[test]
fn test_from_settings_falls_back() {
    let config = LockConfig::from_settings(Some("Bogus"), Some("1,,2"));
    assert_eq!(config.strategy, LockStrategyKind::MultiLevel);
    assert_eq!(config.sizes_per_level, DEFAULT_LOCK_SIZES.to_vec());

    let config = LockConfig::from_settings(Some("SingleRWLock"), Some("1,4"));
    assert_eq!(config.strategy, LockStrategyKind::Single);
    assert_eq!(config.sizes_per_level, vec![1, 4]);
    assert_eq!(config.level_count(), 1);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.lock.level_count(), DEFAULT_LOCK_SIZES.len());
    assert!(!config.validate_lock_list);
}

#[test]
fn test_thresholds_out_of_order_rejected() {
    let config = Config::builder()
        .children_thresholds(ChildrenThresholds {
            min_dictionary: 32,
            max_dictionary: 16,
            min_sorted: 64,
            max_sorted: 128,
        })
        .build();
    assert!(matches!(config.validate(), Err(ArborError::Config(_))));

    let opened = DataTree::open(config, Arc::new(MemoryReplicator::new()));
    assert!(matches!(opened, Err(ArborError::Config(_))));
}

#[test]
fn test_zero_lock_size_rejected() {
    let config = Config::builder().lock_sizes_per_level(vec![1, 0]).build();
    assert!(matches!(config.validate(), Err(ArborError::Config(_))));

    // Only the multi-level strategy reads the ladder
    let config = Config::builder()
        .lock_strategy(LockStrategyKind::Single)
        .lock_sizes_per_level(vec![1, 0])
        .build();
    assert!(config.validate().is_ok());
}
