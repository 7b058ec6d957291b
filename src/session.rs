//! Session-layer inputs consumed by transactions
//!
//! The session layer (authentication, lifecycle) lives outside the tree; it
//! hands each request an identity and optional transaction overrides.

use std::fmt;

/// Identity of the client issuing a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAuth {
    /// Certificate subject or host name
    pub client_identity: Option<String>,

    /// `digest:<id>` credential
    pub client_digest: Option<String>,

    pub client_ip: Option<String>,

    /// Bypasses every ACL check
    pub is_super_session: bool,

    /// Opts out of tree locking (reads may be stale)
    pub is_lock_free_session: bool,
}

impl SessionAuth {
    /// Anonymous session
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Superuser session
    pub fn super_session() -> Self {
        Self {
            is_super_session: true,
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.client_identity = Some(identity.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.client_digest = Some(digest.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn lock_free(mut self, lock_free: bool) -> Self {
        self.is_lock_free_session = lock_free;
        self
    }
}

impl fmt::Display for SessionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} digest={} ip={}{}",
            self.client_identity.as_deref().unwrap_or("-"),
            self.client_digest.as_deref().unwrap_or("-"),
            self.client_ip.as_deref().unwrap_or("-"),
            if self.is_super_session { " super" } else { "" }
        )
    }
}

/// Explicit transaction id / time supplied by the caller (e.g. replay)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationOverrides {
    pub tx_id: Option<i64>,
    pub tx_time: Option<i64>,
}
