//! Tree Module
//!
//! The in-memory node tree.
//!
//! ## Responsibilities
//! - Node handles with adaptive children storage
//! - Watcher registration and change notification
//! - ACL evaluation
//! - Path resolution with wildcards and fault-back
//!
//! ## Concurrency
//! Structural consistency comes from the hierarchical locks taken through a
//! transaction (`txn`). Each record additionally guards its own fields with
//! short-held locks so that concurrent readers on different lock slots never
//! observe torn state.

mod children;
mod node;
mod path;

pub use children::{ChildrenMap, ChildrenRepr};
pub use node::Node;
pub(crate) use node::{fire_watchers, NodeBody};
pub use path::{DataMatcher, DataPrefix, NodeLookup, PathParent, WildcardBehavior};
pub(crate) use path::needs_write;
