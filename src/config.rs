//! Configuration for Arbor
//!
//! Centralized configuration with sensible defaults. Built once at startup
//! and shared (`Arc<Config>`) with the lock pool, node operations and
//! transactions; nothing reads ambient global state.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ArborError, Result};

/// Default lock pool sizes per tree depth (deeper levels get wider pools)
pub const DEFAULT_LOCK_SIZES: [usize; 6] = [1, 50, 2500, 10_000, 100_000, 500_000];

/// Main configuration for an Arbor tree
#[derive(Debug, Clone, Default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Lock Configuration
    // -------------------------------------------------------------------------
    /// Lock strategy and pool layout
    pub lock: LockConfig,

    // -------------------------------------------------------------------------
    // Children Storage Configuration
    // -------------------------------------------------------------------------
    /// Size thresholds driving the children-map representation
    pub children: ChildrenThresholds,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// Re-check held locks before every undo step (audit only, slow)
    pub validate_lock_list: bool,
}

/// How tree locks are provided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategyKind {
    /// One pool of reader/writer locks per tree level, selected by node hash
    MultiLevel,

    /// A single reader/writer lock for the whole tree
    Single,

    /// Locks are managed outside the tree; every acquisition is a no-op
    External,
}

/// Parsed form of the `LockStrategy` setting
///
/// Accepts `MultiLevelRWLocks`, `SingleRWLock` or `LocksByBackend`, each
/// optionally combined with `ReaderGoUnlocked` (`"MultiLevelRWLocks|ReaderGoUnlocked"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStrategyOption {
    pub kind: LockStrategyKind,
    pub readers_unlocked: bool,
}

impl FromStr for LockStrategyOption {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        let mut kind = None;
        let mut readers_unlocked = false;

        for part in s.split(|c| c == '|' || c == ',').map(str::trim) {
            match part {
                "" => {}
                "MultiLevelRWLocks" => kind = Some(LockStrategyKind::MultiLevel),
                "SingleRWLock" => kind = Some(LockStrategyKind::Single),
                "LocksByBackend" => kind = Some(LockStrategyKind::External),
                "ReaderGoUnlocked" => readers_unlocked = true,
                other => {
                    return Err(ArborError::Config(format!("unknown lock strategy '{}'", other)))
                }
            }
        }

        let kind = kind.ok_or_else(|| ArborError::Config(format!("no lock strategy in '{}'", s)))?;
        Ok(Self { kind, readers_unlocked })
    }
}

/// Lock pool configuration
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Which lock provider to use
    pub strategy: LockStrategyKind,

    /// Reads skip locking entirely (possible stale reads)
    pub readers_unlocked: bool,

    /// Number of lock objects per level; the last entry absorbs deeper levels
    pub sizes_per_level: Vec<usize>,

    /// Max time to block on a single lock before failing with a retriable error
    pub max_acquire_wait: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategyKind::MultiLevel,
            readers_unlocked: false,
            sizes_per_level: DEFAULT_LOCK_SIZES.to_vec(),
            max_acquire_wait: Duration::from_millis(5000),
        }
    }
}

impl LockConfig {
    /// Parse a comma-separated ladder such as `"1,50,2500"`
    pub fn parse_sizes(s: &str) -> Result<Vec<usize>> {
        let sizes = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .map_err(|e| ArborError::Config(format!("bad lock size '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        if sizes.is_empty() || sizes.iter().any(|&n| n == 0) {
            return Err(ArborError::Config(format!("lock sizes must be > 0: '{}'", s)));
        }

        Ok(sizes)
    }

    /// Build from raw setting strings, falling back to defaults on parse failure
    pub fn from_settings(strategy: Option<&str>, sizes: Option<&str>) -> Self {
        let mut config = LockConfig::default();

        if let Some(s) = strategy {
            match s.parse::<LockStrategyOption>() {
                Ok(option) => {
                    config.strategy = option.kind;
                    config.readers_unlocked = option.readers_unlocked;
                }
                Err(e) => tracing::info!("Could not parse lock strategy from config: {}", e),
            }
        }
        tracing::info!("Using lock strategy: {:?}", config.strategy);

        if let Some(s) = sizes {
            match Self::parse_sizes(s) {
                Ok(parsed) => config.sizes_per_level = parsed,
                Err(e) => tracing::info!("Could not parse lock sizes per level from config: {}", e),
            }
        }

        config
    }

    /// Number of distinct level buckets the pool exposes
    pub fn level_count(&self) -> usize {
        match self.strategy {
            LockStrategyKind::MultiLevel => self.sizes_per_level.len().max(1),
            LockStrategyKind::Single | LockStrategyKind::External => 1,
        }
    }
}

/// Children-map representation thresholds
///
/// ```text
///   Array  --(> min_dictionary)-->  Hash  --(> max_dictionary)-->  Sorted  --(> max_sorted)-->  Guarded
///   Array  <--(< min_dictionary)--  Hash  <--(< max_dictionary)--  Sorted  <--(< min_sorted)---  Guarded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildrenThresholds {
    pub min_dictionary: usize,
    pub max_dictionary: usize,
    pub min_sorted: usize,
    pub max_sorted: usize,
}

impl Default for ChildrenThresholds {
    fn default() -> Self {
        Self {
            min_dictionary: 16,
            max_dictionary: 128,
            min_sorted: 40_000,
            max_sorted: 50_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let t = &self.children;
        if !(t.min_dictionary <= t.max_dictionary
            && t.max_dictionary <= t.min_sorted
            && t.min_sorted <= t.max_sorted)
        {
            return Err(ArborError::Config(format!("children thresholds out of order: {:?}", t)));
        }

        if self.lock.strategy == LockStrategyKind::MultiLevel
            && (self.lock.sizes_per_level.is_empty() || self.lock.sizes_per_level.contains(&0))
        {
            return Err(ArborError::Config("lock sizes per level must be > 0".to_string()));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the lock strategy
    pub fn lock_strategy(mut self, strategy: LockStrategyKind) -> Self {
        self.config.lock.strategy = strategy;
        self
    }

    /// Let reads go unlocked
    pub fn readers_unlocked(mut self, unlocked: bool) -> Self {
        self.config.lock.readers_unlocked = unlocked;
        self
    }

    /// Set the lock pool size ladder
    pub fn lock_sizes_per_level(mut self, sizes: impl Into<Vec<usize>>) -> Self {
        self.config.lock.sizes_per_level = sizes.into();
        self
    }

    /// Set the maximum lock wait (in milliseconds)
    pub fn max_acquire_wait_ms(mut self, ms: u64) -> Self {
        self.config.lock.max_acquire_wait = Duration::from_millis(ms);
        self
    }

    /// Set the children-map thresholds
    pub fn children_thresholds(mut self, thresholds: ChildrenThresholds) -> Self {
        self.config.children = thresholds;
        self
    }

    /// Enable the lock-list audit before undo steps
    pub fn validate_lock_list(mut self, enabled: bool) -> Self {
        self.config.validate_lock_list = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
