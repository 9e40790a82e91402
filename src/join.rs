//! Fan-in over a set of outstanding operations.

use std::collections::HashSet;
use std::hash::Hash;

/// Tracks operations that must all complete before a combined result is reported.
///
/// Operations are identified by key rather than counted, so a late or repeated completion cannot release the join
/// early. Every operation of a batch must be added before any of them is started, since a driver may complete an
/// operation from inside the call that starts it.
#[derive(Debug)]
pub(crate) struct Join<K> {
    pending: HashSet<K>,
}

impl<K: Hash + Eq> Join<K> {
    pub fn new() -> Self {
        Join {
            pending: HashSet::new(),
        }
    }

    pub fn add(&mut self, op: K) {
        self.pending.insert(op);
    }

    /// Marks an operation complete. Returns `true` if it was outstanding and was the last one.
    pub fn complete(&mut self, op: &K) -> bool {
        self.pending.remove(op) && self.pending.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
