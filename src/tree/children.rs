//! Children map
//!
//! Adaptive name → child mapping. The representation follows the child count:
//!
//! ```text
//!   Array   small fan-out, linear scan
//!   Hash    medium fan-out, O(1) lookup
//!   Sorted  large fan-out, ordered lookup
//!   Guarded very large fan-out, ordered map behind its own mutex so
//!           paging readers can scan it without holding the node body lock
//! ```
//!
//! Transitions use the thresholds in `ChildrenThresholds` with hysteresis,
//! so a node hovering around one boundary does not flap between tiers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Node;
use crate::config::ChildrenThresholds;
use crate::error::{ArborError, Result};

/// Ordered children shared with paging readers
pub(crate) type GuardedChildren = Arc<Mutex<BTreeMap<String, Node>>>;

// =============================================================================
// Children Map
// =============================================================================

/// Current representation of a children map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildrenRepr {
    Array,
    Hash,
    Sorted,
    Guarded,
}

enum Inner {
    Array(Vec<(String, Node)>),
    Hash(HashMap<String, Node>),
    Sorted(BTreeMap<String, Node>),
    Guarded(GuardedChildren),
}

/// Name → child mapping of a complete node
pub struct ChildrenMap {
    inner: Inner,
}

impl ChildrenMap {
    pub fn new() -> Self {
        Self {
            inner: Inner::Array(Vec::new()),
        }
    }

    pub fn repr(&self) -> ChildrenRepr {
        match &self.inner {
            Inner::Array(_) => ChildrenRepr::Array,
            Inner::Hash(_) => ChildrenRepr::Hash,
            Inner::Sorted(_) => ChildrenRepr::Sorted,
            Inner::Guarded(_) => ChildrenRepr::Guarded,
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            Inner::Array(v) => v.len(),
            Inner::Hash(m) => m.len(),
            Inner::Sorted(m) => m.len(),
            Inner::Guarded(m) => m.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<Node> {
        match &self.inner {
            Inner::Array(v) => v.iter().find(|(n, _)| n == name).map(|(_, c)| c.clone()),
            Inner::Hash(m) => m.get(name).cloned(),
            Inner::Sorted(m) => m.get(name).cloned(),
            Inner::Guarded(m) => m.lock().get(name).cloned(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert a child; names are unique within a parent
    pub fn insert(&mut self, name: String, child: Node) -> Result<()> {
        if self.contains(&name) {
            return Err(ArborError::Invariant(format!("duplicate child name '{}'", name)));
        }

        match &mut self.inner {
            Inner::Array(v) => v.push((name, child)),
            Inner::Hash(m) => {
                m.insert(name, child);
            }
            Inner::Sorted(m) => {
                m.insert(name, child);
            }
            Inner::Guarded(m) => {
                m.lock().insert(name, child);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        match &mut self.inner {
            Inner::Array(v) => {
                let pos = v.iter().position(|(n, _)| n == name)?;
                Some(v.swap_remove(pos).1)
            }
            Inner::Hash(m) => m.remove(name),
            Inner::Sorted(m) => m.remove(name),
            Inner::Guarded(m) => m.lock().remove(name),
        }
    }

    /// Child names in storage order
    pub fn names(&self) -> Vec<String> {
        match &self.inner {
            Inner::Array(v) => v.iter().map(|(n, _)| n.clone()).collect(),
            Inner::Hash(m) => m.keys().cloned().collect(),
            Inner::Sorted(m) => m.keys().cloned().collect(),
            Inner::Guarded(m) => m.lock().keys().cloned().collect(),
        }
    }

    pub fn nodes(&self) -> Vec<Node> {
        match &self.inner {
            Inner::Array(v) => v.iter().map(|(_, c)| c.clone()).collect(),
            Inner::Hash(m) => m.values().cloned().collect(),
            Inner::Sorted(m) => m.values().cloned().collect(),
            Inner::Guarded(m) => m.lock().values().cloned().collect(),
        }
    }

    /// Shared handle on the guarded tier, for scans outside the body lock
    pub(crate) fn guarded(&self) -> Option<GuardedChildren> {
        match &self.inner {
            Inner::Guarded(m) => Some(Arc::clone(m)),
            _ => None,
        }
    }

    /// Up to `top` names strictly greater than `start`, in ordinal order
    pub fn sorted_names_after(&self, start: Option<&str>, top: usize) -> Vec<String> {
        match &self.inner {
            Inner::Sorted(m) => names_after(m, start, top),
            Inner::Guarded(m) => names_after(&m.lock(), start, top),
            _ => {
                let mut names: Vec<String> = self
                    .names()
                    .into_iter()
                    .filter(|n| start.map_or(true, |s| n.as_str() > s))
                    .collect();
                names.sort_unstable();
                names.truncate(top);
                names
            }
        }
    }

    // -------------------------------------------------------------------------
    // Representation Changes
    // -------------------------------------------------------------------------

    /// Move to the tier that fits the current count
    pub fn rescale(&mut self, t: &ChildrenThresholds) {
        let count = self.len();
        let target = match self.repr() {
            ChildrenRepr::Array | ChildrenRepr::Hash => {
                if count > t.max_sorted {
                    ChildrenRepr::Guarded
                } else if count > t.max_dictionary {
                    ChildrenRepr::Sorted
                } else if count > t.min_dictionary {
                    ChildrenRepr::Hash
                } else if self.repr() == ChildrenRepr::Hash && count >= t.min_dictionary {
                    ChildrenRepr::Hash
                } else {
                    ChildrenRepr::Array
                }
            }
            ChildrenRepr::Sorted => {
                if count > t.max_sorted {
                    ChildrenRepr::Guarded
                } else if count < t.min_dictionary {
                    ChildrenRepr::Array
                } else if count < t.max_dictionary {
                    ChildrenRepr::Hash
                } else {
                    ChildrenRepr::Sorted
                }
            }
            ChildrenRepr::Guarded => {
                if count < t.min_dictionary {
                    ChildrenRepr::Array
                } else if count <= t.max_dictionary {
                    ChildrenRepr::Hash
                } else if count < t.min_sorted {
                    ChildrenRepr::Sorted
                } else {
                    ChildrenRepr::Guarded
                }
            }
        };

        if target != self.repr() {
            tracing::trace!(from = ?self.repr(), to = ?target, count, "rescaling children map");
            self.convert(target);
        }
    }

    fn convert(&mut self, target: ChildrenRepr) {
        let entries: Vec<(String, Node)> =
            match std::mem::replace(&mut self.inner, Inner::Array(Vec::new())) {
                Inner::Array(v) => v,
                Inner::Hash(m) => m.into_iter().collect(),
                Inner::Sorted(m) => m.into_iter().collect(),
                Inner::Guarded(m) => m
                    .lock()
                    .iter()
                    .map(|(n, c)| (n.clone(), c.clone()))
                    .collect(),
            };

        self.inner = match target {
            ChildrenRepr::Array => Inner::Array(entries),
            ChildrenRepr::Hash => Inner::Hash(entries.into_iter().collect()),
            ChildrenRepr::Sorted => Inner::Sorted(entries.into_iter().collect()),
            ChildrenRepr::Guarded => {
                Inner::Guarded(Arc::new(Mutex::new(entries.into_iter().collect())))
            }
        };
    }
}

impl Default for ChildrenMap {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn names_after(
    map: &BTreeMap<String, Node>,
    start: Option<&str>,
    top: usize,
) -> Vec<String> {
    use std::ops::Bound;

    let lower = match start {
        Some(s) => Bound::Excluded(s.to_string()),
        None => Bound::Unbounded,
    };
    map.range::<String, _>((lower, Bound::Unbounded))
        .take(top)
        .map(|(n, _)| n.clone())
        .collect()
}
