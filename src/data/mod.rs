//! Data Model Module
//!
//! Value types shared by the tree, the transactions and the external
//! persistence/replication layers.
//!
//! ## Contents
//! - `Stat`: optimistic version triple plus transaction timestamps
//! - `Acl` / `Perm`: access control entries and permission flags
//! - `ChangeKind` / `WatchedEvent` / `Watcher`: change notification

mod acl;
mod event;
mod stat;

pub use acl::{Acl, AclId, AclList, Perm, Scheme};
pub use event::{ChangeKind, WatchedEvent, WatchedEventType, Watcher, WatcherKind, WatcherSet};
pub use stat::{convert_time, Stat};
