//! Persistence Module
//!
//! The boundary between the in-memory tree and the durable backend.
//!
//! ## Responsibilities
//! - Own node records (`PersistedData`): name, parent link, stat, ACL, data
//! - Create, delete and undelete records through a factory (the arena)
//! - Stage every mutation into a change list handed to replication on commit
//!
//! The tree never talks to storage directly. Each record knows how to stage
//! its own changes (`append_*`), and a change list either commits the staged
//! operations as one unit or is thrown away on abort.
//!
//! ## Ephemeral Records
//! Ephemeral records come from a separate factory and stage nothing; they
//! live only as long as the process (or the owning session).

mod changelist;
mod factory;
mod record;

pub use changelist::{
    ChangeList, ChangeListFactory, ChangeOp, CommittedChanges, MemoryReplicator, ReplicationAck,
    ReplicationTask,
};
pub use factory::{IdProvider, InMemoryFactory, PersistedDataFactory};
pub use record::PersistedData;
