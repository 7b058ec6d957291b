//! Request definitions
//!
//! Operations accepted by `DataTree::execute` and their results.

use std::sync::Arc;

use bytes::Bytes;

use crate::data::{Acl, Stat, Watcher};
use crate::tree::WildcardBehavior;

/// Request types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Delete,
    SetData,
    SetAcl,
    Move,
    GetData,
    GetChildren,
    Exists,
    Multi,
}

/// Path resolution options for `GetData`
#[derive(Debug, Clone)]
pub struct GetDataOptions {
    /// Where `*` / `**` children may match
    pub wildcards: WildcardBehavior,

    /// Fall back to the deepest node whose data starts with this prefix
    pub fault_back_prefix: Option<Bytes>,
}

impl Default for GetDataOptions {
    fn default() -> Self {
        Self {
            wildcards: WildcardBehavior::NOT_ALLOWED,
            fault_back_prefix: None,
        }
    }
}

/// A tree operation
#[derive(Debug, Clone)]
pub enum Request {
    /// Create a node under an existing parent
    Create {
        path: String,
        data: Option<Bytes>,
        acl: Option<Vec<Acl>>,
        ephemeral: bool,
    },

    /// Delete a node (`version` -1 matches any)
    Delete {
        path: String,
        version: i32,
        recursive: bool,
    },

    SetData {
        path: String,
        data: Option<Bytes>,
        version: i32,
    },

    SetAcl {
        path: String,
        acl: Option<Vec<Acl>>,
        aversion: i32,
    },

    /// Re-parent a node, keeping its name and subtree
    Move {
        path: String,
        new_parent: String,
        version: i32,
    },

    GetData {
        path: String,
        watcher: Option<Arc<dyn Watcher>>,
        options: GetDataOptions,
    },

    /// List children; see `Node::retrieve_children` for the condition format
    GetChildren {
        path: String,
        retrieval_condition: Option<String>,
    },

    Exists {
        path: String,
    },

    /// All-or-nothing batch inside one transaction
    Multi(Vec<Request>),
}

impl Request {
    pub fn create(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Request::Create {
            path: path.into(),
            data: Some(data.into()),
            acl: None,
            ephemeral: false,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Request::Delete {
            path: path.into(),
            version: -1,
            recursive: false,
        }
    }

    pub fn set_data(path: impl Into<String>, data: impl Into<Bytes>, version: i32) -> Self {
        Request::SetData {
            path: path.into(),
            data: Some(data.into()),
            version,
        }
    }

    pub fn get_data(path: impl Into<String>) -> Self {
        Request::GetData {
            path: path.into(),
            watcher: None,
            options: GetDataOptions::default(),
        }
    }

    pub fn get_children(path: impl Into<String>) -> Self {
        Request::GetChildren {
            path: path.into(),
            retrieval_condition: None,
        }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Request::Exists { path: path.into() }
    }

    /// Get the request type
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Create { .. } => RequestType::Create,
            Request::Delete { .. } => RequestType::Delete,
            Request::SetData { .. } => RequestType::SetData,
            Request::SetAcl { .. } => RequestType::SetAcl,
            Request::Move { .. } => RequestType::Move,
            Request::GetData { .. } => RequestType::GetData,
            Request::GetChildren { .. } => RequestType::GetChildren,
            Request::Exists { .. } => RequestType::Exists,
            Request::Multi(_) => RequestType::Multi,
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            Request::GetData { .. } | Request::GetChildren { .. } | Request::Exists { .. } => true,
            Request::Multi(ops) => ops.iter().all(Request::is_read_only),
            _ => false,
        }
    }
}

/// Result of a request
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Created { path: String, stat: Stat },
    Deleted,
    Stat(Stat),
    Moved { path: String, stat: Stat },
    Data {
        path: String,
        data: Option<Bytes>,
        stat: Stat,
    },
    Children(Vec<String>),
    Exists(Option<Stat>),
    Multi(Vec<Response>),
}
