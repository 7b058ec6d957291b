//! Access control entries

use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Operations an ACL entry grants
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Perm: u32 {
        const CREATE = 1;
        const READ = 2;
        const WRITE = 4;
        const DELETE = 8;
        const ADMIN = 16;
        const ALL = 31;
    }
}

impl Perm {
    /// No permission
    pub const NONE: Perm = Perm::empty();
}

/// Authentication scheme of an ACL identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// Anyone
    World,
    /// Any session carrying a client identity or digest
    Authenticated,
    /// Client identity (certificate subject) equals the identifier
    Host,
    /// Client IP equals the identifier
    Ip,
    /// Client digest equals `digest:<identifier>`
    Digest,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::World => "world",
            Scheme::Authenticated => "auth",
            Scheme::Host => "host",
            Scheme::Ip => "ip",
            Scheme::Digest => "digest",
        }
    }
}

/// Identity an ACL entry applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclId {
    pub scheme: Scheme,
    pub identifier: String,
}

/// One access control entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub perms: Perm,
    pub id: AclId,
}

impl Acl {
    pub fn new(perms: Perm, scheme: Scheme, identifier: impl Into<String>) -> Self {
        Self {
            perms,
            id: AclId {
                scheme,
                identifier: identifier.into(),
            },
        }
    }

    /// `world:anyone` with the given permissions
    pub fn world(perms: Perm) -> Self {
        Self::new(perms, Scheme::World, "anyone")
    }
}

/// Shared, immutable ACL list (cloned by reference into undo snapshots)
pub type AclList = Arc<Vec<Acl>>;
