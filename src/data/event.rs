//! Change notification types

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;

use super::Stat;

/// What a mutation did to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    None,
    NodeCreated,
    ChildrenAdded,
    ChildrenRemoved,
    DataChanged,
    AclChanged,
    NodeDeleted,
}

/// Event type delivered to watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedEventType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

impl WatchedEventType {
    /// ACL changes and `None` produce no event
    pub fn from_change(kind: ChangeKind) -> Option<Self> {
        match kind {
            ChangeKind::NodeCreated => Some(WatchedEventType::NodeCreated),
            ChangeKind::ChildrenAdded | ChangeKind::ChildrenRemoved => {
                Some(WatchedEventType::NodeChildrenChanged)
            }
            ChangeKind::DataChanged => Some(WatchedEventType::NodeDataChanged),
            ChangeKind::NodeDeleted => Some(WatchedEventType::NodeDeleted),
            ChangeKind::AclChanged | ChangeKind::None => None,
        }
    }
}

/// Notification delivered to a watcher
#[derive(Debug, Clone, PartialEq)]
pub struct WatchedEvent {
    pub event_type: WatchedEventType,
    pub path: String,
    pub data: Option<Bytes>,
    pub stat: Option<Stat>,
}

impl WatchedEvent {
    /// Same event without payload
    pub fn without_data(&self) -> Self {
        Self {
            event_type: self.event_type,
            path: self.path.clone(),
            data: None,
            stat: None,
        }
    }
}

bitflags! {
    /// Watcher behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WatcherKind: u32 {
        /// Removed from the node after the first notification
        const ONE_USE = 1;
        /// Receives node data and stat with the event
        const INCLUDE_DATA = 2;
    }
}

/// Receiver of node change notifications
pub trait Watcher: Send + Sync {
    fn kind(&self) -> WatcherKind;

    fn process(&self, event: &WatchedEvent);

    /// Human readable description, used by watcher listings
    fn describe(&self) -> String {
        format!("watcher({:?})", self.kind())
    }
}

impl fmt::Debug for dyn Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Watchers registered on one node
pub type WatcherSet = Vec<Arc<dyn Watcher>>;
