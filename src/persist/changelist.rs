//! Change lists and replication handles
//!
//! A transaction stages `ChangeOp`s into one change list. On commit the list
//! is handed to the backend, which answers with a `ReplicationTask` that
//! completes once the changes are replicated; on abort it is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::data::{Acl, Stat};
use crate::error::{ArborError, Result};

/// One staged mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeOp {
    Create {
        id: u64,
        name: String,
        stat: Stat,
        acl: Option<Vec<Acl>>,
        data: Option<Bytes>,
    },
    AddChild {
        parent: u64,
        child: u64,
    },
    RemoveChild {
        parent: u64,
        child: u64,
    },
    Remove {
        parent: Option<u64>,
        id: u64,
        recursive: bool,
    },
    SetAcl {
        id: u64,
        acl: Option<Vec<Acl>>,
        stat: Stat,
    },
    SetData {
        id: u64,
        data: Option<Bytes>,
        stat: Stat,
    },
    Poison {
        id: u64,
        spec: String,
    },
}

/// Ordered set of staged changes owned by one transaction
pub trait ChangeList: Send {
    fn append(&mut self, op: ChangeOp);

    fn set_time(&mut self, tx_time: i64);

    fn is_empty(&self) -> bool;

    /// Hand the changes to replication; the returned task completes asynchronously
    fn commit(&mut self, tx_id: i64) -> Result<ReplicationTask>;

    /// Like `commit`, for callers that will block until replication finishes
    fn commit_sync(&mut self, tx_id: i64) -> Result<ReplicationTask>;

    fn abort(&mut self);
}

/// Creates change lists for new transactions
pub trait ChangeListFactory: Send + Sync {
    fn create(&self) -> Box<dyn ChangeList>;
}

// =============================================================================
// Replication Task
// =============================================================================

type Outcome = std::result::Result<(), String>;

enum TaskState {
    Finished(Outcome),
    Pending(Receiver<Outcome>),
}

/// Completion handle for replicating one committed change list
pub struct ReplicationTask {
    state: TaskState,
}

/// Sender side of a pending `ReplicationTask`
pub struct ReplicationAck {
    tx: Sender<Outcome>,
}

impl ReplicationAck {
    pub fn complete(self, outcome: std::result::Result<(), String>) {
        // The waiter may have given up; nothing to do then
        let _ = self.tx.send(outcome);
    }
}

impl ReplicationTask {
    /// Already replicated (or nothing to replicate)
    pub fn finished() -> Self {
        Self {
            state: TaskState::Finished(Ok(())),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: TaskState::Finished(Err(reason.into())),
        }
    }

    /// A task completed later through the returned ack
    pub fn pending() -> (ReplicationAck, Self) {
        let (tx, rx) = channel::bounded(1);
        (
            ReplicationAck { tx },
            Self {
                state: TaskState::Pending(rx),
            },
        )
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            TaskState::Finished(_) => true,
            TaskState::Pending(rx) => !rx.is_empty(),
        }
    }

    /// Block until replication finishes
    pub fn wait(self) -> Result<()> {
        let outcome = match self.state {
            TaskState::Finished(outcome) => outcome,
            TaskState::Pending(rx) => rx
                .recv()
                .unwrap_or_else(|_| Err("replication dropped".to_string())),
        };
        outcome.map_err(ArborError::CommitFailed)
    }

    /// Block up to `timeout`; an unfinished task is returned back
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<()>, Self> {
        match self.state {
            TaskState::Finished(outcome) => Ok(outcome.map_err(ArborError::CommitFailed)),
            TaskState::Pending(rx) => match rx.recv_timeout(timeout) {
                Ok(outcome) => Ok(outcome.map_err(ArborError::CommitFailed)),
                Err(RecvTimeoutError::Disconnected) => {
                    Ok(Err(ArborError::CommitFailed("replication dropped".to_string())))
                }
                Err(RecvTimeoutError::Timeout) => Err(Self {
                    state: TaskState::Pending(rx),
                }),
            },
        }
    }

    /// Non-blocking poll
    pub fn try_result(&self) -> Option<Result<()>> {
        match &self.state {
            TaskState::Finished(outcome) => {
                Some(outcome.clone().map_err(ArborError::CommitFailed))
            }
            TaskState::Pending(rx) => match rx.try_recv() {
                Ok(outcome) => Some(outcome.map_err(ArborError::CommitFailed)),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    Some(Err(ArborError::CommitFailed("replication dropped".to_string())))
                }
            },
        }
    }
}

impl std::fmt::Debug for ReplicationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationTask")
            .field("finished", &self.is_finished())
            .finish()
    }
}

// =============================================================================
// In-Memory Replicator
// =============================================================================

/// A change list that reached the backend
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedChanges {
    pub tx_id: i64,
    pub tx_time: i64,
    pub ops: Vec<ChangeOp>,
    pub synchronous: bool,
}

#[derive(Default)]
struct ReplicatorState {
    committed: Mutex<Vec<CommittedChanges>>,
    aborted: AtomicU64,
    fail_commits: AtomicBool,
    defer_acks: AtomicBool,
    pending: Mutex<Vec<ReplicationAck>>,
}

/// Backend that keeps committed change lists in memory
///
/// Used by the stress tool and tests. Commits can be made to fail, or their
/// replication acks deferred until `ack_pending`.
#[derive(Clone, Default)]
pub struct MemoryReplicator {
    state: Arc<ReplicatorState>,
}

impl MemoryReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self) -> Vec<CommittedChanges> {
        self.state.committed.lock().clone()
    }

    pub fn committed_count(&self) -> usize {
        self.state.committed.lock().len()
    }

    pub fn aborted_count(&self) -> u64 {
        self.state.aborted.load(Ordering::Relaxed)
    }

    /// Make subsequent commits fail
    pub fn set_fail_commits(&self, fail: bool) {
        self.state.fail_commits.store(fail, Ordering::Relaxed);
    }

    /// Hold replication acks until `ack_pending`
    pub fn set_defer_acks(&self, defer: bool) {
        self.state.defer_acks.store(defer, Ordering::Relaxed);
    }

    /// Complete every deferred replication task
    pub fn ack_pending(&self) -> usize {
        let acks = std::mem::take(&mut *self.state.pending.lock());
        let n = acks.len();
        for ack in acks {
            ack.complete(Ok(()));
        }
        n
    }
}

impl ChangeListFactory for MemoryReplicator {
    fn create(&self) -> Box<dyn ChangeList> {
        Box::new(MemoryChangeList {
            state: Arc::clone(&self.state),
            ops: Vec::new(),
            tx_time: 0,
        })
    }
}

struct MemoryChangeList {
    state: Arc<ReplicatorState>,
    ops: Vec<ChangeOp>,
    tx_time: i64,
}

impl MemoryChangeList {
    fn push(&mut self, tx_id: i64, synchronous: bool) -> Result<ReplicationTask> {
        if self.state.fail_commits.load(Ordering::Relaxed) {
            return Err(ArborError::CommitFailed(format!(
                "backend rejected transaction {}",
                tx_id
            )));
        }

        self.state.committed.lock().push(CommittedChanges {
            tx_id,
            tx_time: self.tx_time,
            ops: std::mem::take(&mut self.ops),
            synchronous,
        });

        if self.state.defer_acks.load(Ordering::Relaxed) {
            let (ack, task) = ReplicationTask::pending();
            self.state.pending.lock().push(ack);
            Ok(task)
        } else {
            Ok(ReplicationTask::finished())
        }
    }
}

impl ChangeList for MemoryChangeList {
    fn append(&mut self, op: ChangeOp) {
        self.ops.push(op);
    }

    fn set_time(&mut self, tx_time: i64) {
        self.tx_time = tx_time;
    }

    fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn commit(&mut self, tx_id: i64) -> Result<ReplicationTask> {
        self.push(tx_id, false)
    }

    fn commit_sync(&mut self, tx_id: i64) -> Result<ReplicationTask> {
        self.push(tx_id, true)
    }

    fn abort(&mut self) {
        self.ops.clear();
        self.state.aborted.fetch_add(1, Ordering::Relaxed);
    }
}
