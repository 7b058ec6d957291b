//! Record factories
//!
//! A factory allocates, deletes and undeletes records. `InMemoryFactory` is
//! the id-keyed arena; the durable and the ephemeral factory share one
//! `IdProvider` so ids (and therefore lock slots and lock order) are unique
//! across both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::PersistedData;

/// Source of unique record ids
#[derive(Debug)]
pub struct IdProvider {
    next: AtomicU64,
}

impl IdProvider {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates and tracks records
pub trait PersistedDataFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Records from this factory are ephemeral
    fn is_ephemeral(&self) -> bool;

    /// Allocate a fresh, unlinked record
    fn create_new(&self, name: &str) -> Arc<PersistedData>;

    /// Remove a record from the arena and mark it detached
    fn delete(&self, record: &Arc<PersistedData>);

    /// Put a deleted record back (abort of a delete)
    fn record_undelete(&self, record: &Arc<PersistedData>);

    fn get(&self, id: u64) -> Option<Arc<PersistedData>>;

    /// Live records
    fn total_nodes(&self) -> u64;

    /// Bytes of data held by live records
    fn total_data(&self) -> u64;
}

/// Arena-backed factory used for both durable and ephemeral records
pub struct InMemoryFactory {
    name: String,
    ephemeral: bool,
    ids: Arc<IdProvider>,
    arena: RwLock<HashMap<u64, Arc<PersistedData>>>,
}

impl InMemoryFactory {
    pub fn durable(ids: Arc<IdProvider>) -> Self {
        Self::with_name("durable", false, ids)
    }

    pub fn ephemeral(ids: Arc<IdProvider>) -> Self {
        Self::with_name("ephemeral", true, ids)
    }

    fn with_name(name: &str, ephemeral: bool, ids: Arc<IdProvider>) -> Self {
        Self {
            name: name.to_string(),
            ephemeral,
            ids,
            arena: RwLock::new(HashMap::new()),
        }
    }
}

impl PersistedDataFactory for InMemoryFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    fn create_new(&self, name: &str) -> Arc<PersistedData> {
        let record = Arc::new(PersistedData::new(self.ids.next_id(), name, self.ephemeral));
        self.arena.write().insert(record.id(), Arc::clone(&record));
        record
    }

    fn delete(&self, record: &Arc<PersistedData>) {
        record.detach();
        if self.ephemeral {
            record.set_parent(None);
        }
        self.arena.write().remove(&record.id());
    }

    fn record_undelete(&self, record: &Arc<PersistedData>) {
        record.attach();
        self.arena.write().insert(record.id(), Arc::clone(record));
    }

    fn get(&self, id: u64) -> Option<Arc<PersistedData>> {
        self.arena.read().get(&id).cloned()
    }

    fn total_nodes(&self) -> u64 {
        self.arena.read().len() as u64
    }

    fn total_data(&self) -> u64 {
        self.arena
            .read()
            .values()
            .map(|r| r.data_len() as u64)
            .sum()
    }
}
