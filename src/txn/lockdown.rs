//! Lockdown paths
//!
//! Paths listed here are rejected for every non-super session. The set is
//! replaced wholesale and read without blocking writers of other paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct LockDownSet {
    paths: RwLock<Arc<HashSet<String>>>,
    ignore_all: AtomicBool,
}

impl LockDownSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_paths<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = paths.into_iter().map(Into::into).collect();
        tracing::info!(count = set.len(), "lockdown paths replaced");
        *self.paths.write() = Arc::new(set);
    }

    pub fn contains(&self, path: &str) -> bool {
        !self.ignore_all.load(Ordering::Relaxed) && self.paths.read().contains(path)
    }

    /// Cheap pre-check before building a path
    pub fn is_empty(&self) -> bool {
        self.ignore_all.load(Ordering::Relaxed) || self.paths.read().is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.read().iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Temporarily disable every lockdown entry
    pub fn set_ignore_all(&self, ignore: bool) {
        self.ignore_all.store(ignore, Ordering::Relaxed);
    }
}
