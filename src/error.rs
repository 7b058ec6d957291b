//! Error types for Arbor
//!
//! Provides a unified error type for all tree, lock and transaction operations.
//!
//! Callers are expected to branch on two classes only:
//! - [`ArborError::is_retriable`]: lock timeouts, retry the whole operation
//! - [`ArborError::is_access_denied`]: ACL, ephemeral-only and lockdown denials
//!
//! Everything else is either a request outcome (`NoNode`, `BadVersion`, ...)
//! or an unexpected failure that should be logged with context.

use thiserror::Error;

/// Result type alias using ArborError
pub type Result<T> = std::result::Result<T, ArborError>;

/// Unified error type for Arbor operations
#[derive(Debug, Error)]
pub enum ArborError {
    // -------------------------------------------------------------------------
    // Retriable Errors
    // -------------------------------------------------------------------------
    #[error("lock at level {level} couldn't be acquired within {waited_ms} ms for {name}")]
    LockTimeout {
        level: usize,
        name: String,
        waited_ms: u128,
    },

    #[error("retriable conflict: {0}")]
    Retriable(String),

    // -------------------------------------------------------------------------
    // Access Errors
    // -------------------------------------------------------------------------
    #[error("access denied on {path}: {reason}")]
    AccessDenied { path: String, reason: String },

    // -------------------------------------------------------------------------
    // Request Outcomes
    // -------------------------------------------------------------------------
    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("version mismatch on {0}")]
    BadVersion(String),

    #[error("bad arguments: {0}")]
    BadArguments(String),

    // -------------------------------------------------------------------------
    // Programming Errors
    // -------------------------------------------------------------------------
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    // -------------------------------------------------------------------------
    // Commit Errors
    // -------------------------------------------------------------------------
    #[error("commit failed: {0}")]
    CommitFailed(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}

impl ArborError {
    /// Whether the caller may retry the whole operation
    pub fn is_retriable(&self) -> bool {
        matches!(self, ArborError::LockTimeout { .. } | ArborError::Retriable(_))
    }

    /// Whether this is a permission failure (never retried)
    pub fn is_access_denied(&self) -> bool {
        matches!(self, ArborError::AccessDenied { .. })
    }

    pub(crate) fn access_denied(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ArborError::AccessDenied {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
