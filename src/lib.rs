//! # Arbor
//!
//! The in-memory data tree of a ZooKeeper-like coordination service:
//! - Hierarchical reader/writer locking over a multi-level lock pool
//! - Per-request transactions with an undo log and exactly-once completion
//! - Adaptive children storage for very wide nodes
//! - Watchers, ACLs, ephemeral nodes and lockdown paths
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         DataTree                             │
//! │                  (request handlers, engine)                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 LockListForRw / LockListForRo                │
//! │          (access checks, locks, staging, undo log)           │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//!  ┌───────────┐        ┌──────────────┐        ┌──────────────┐
//!  │  LockPool │        │     Node     │        │  ChangeList  │
//!  │ (levels)  │        │ (children,   │        │ (replication │
//!  └───────────┘        │  watchers)   │        │   boundary)  │
//!                       └──────┬───────┘        └──────────────┘
//!                              ▼
//!                     ┌────────────────┐
//!                     │ PersistedData  │
//!                     │   (records)    │
//!                     └────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod data;
pub mod engine;
pub mod instrumentation;
pub mod lock;
pub mod persist;
pub mod request;
pub mod session;
pub mod tree;
pub mod txn;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::{DataTree, ExecuteOptions};
pub use error::{ArborError, Result};
pub use request::{Request, Response};
pub use session::SessionAuth;
pub use tree::Node;
pub use txn::LockListTransaction;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Arbor
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
