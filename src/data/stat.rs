//! Node stat
//!
//! Every mutation bumps the matching counter; checks take `-1` as "don't care".

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Per-node version and timestamp metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction id that created the node
    pub czxid: i64,

    /// Transaction id that last modified the node data
    pub mzxid: i64,

    /// Transaction id that last modified the node children
    pub pzxid: i64,

    /// Creation time (ms since epoch)
    pub ctime: i64,

    /// Last modification time (ms since epoch)
    pub mtime: i64,

    /// Data version
    pub version: i32,

    /// Children version
    pub cversion: i32,

    /// ACL version
    pub aversion: i32,

    pub data_length: i32,
    pub num_children: i32,
    pub num_ephemeral_children: i32,
}

impl Stat {
    /// Stat of a node created by transaction `zxid` at `time`
    pub fn created(zxid: i64, time: i64) -> Self {
        Self {
            czxid: zxid,
            mzxid: zxid,
            pzxid: zxid,
            ctime: time,
            mtime: time,
            ..Default::default()
        }
    }

    /// `-1` matches anything
    pub fn is_version(&self, version: i32) -> bool {
        version == -1 || self.version == version
    }

    pub fn is_child_version(&self, version: i32) -> bool {
        version == -1 || self.cversion == version
    }

    pub fn is_acl_version(&self, version: i32) -> bool {
        version == -1 || self.aversion == version
    }

    /// Record a data change
    pub fn touch_data(&mut self, zxid: i64, time: i64, data_length: usize) {
        self.version += 1;
        self.mzxid = zxid;
        self.mtime = time;
        self.data_length = data_length as i32;
    }

    /// Record a child being added or removed
    pub fn touch_children(&mut self, zxid: i64, delta: i32, ephemeral: bool) {
        self.cversion += 1;
        self.pzxid = zxid;
        self.num_children += delta;
        if ephemeral {
            self.num_ephemeral_children += delta;
        }
    }

    /// Record an ACL change
    pub fn touch_acl(&mut self) {
        self.aversion += 1;
    }
}

/// Convert a wall-clock time to the tree's time unit
pub fn convert_time(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
