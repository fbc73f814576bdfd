//! Bounded, most-recent-first snapshot history.

use std::collections::VecDeque;
use std::sync::Arc;

use tickscope_types::Snapshot;

/// Default number of snapshots kept in memory.
pub const DEFAULT_HISTORY_LENGTH: usize = 60;

/// Fixed-capacity history of completed snapshots.
///
/// New snapshots go to the front; once the capacity is exceeded the oldest
/// entry falls off the back. `len() <= capacity()` always holds.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Arc<Snapshot>>,
    capacity: usize,
}

impl History {
    /// Create an empty history holding at most `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a snapshot as the most recent entry, evicting from the tail.
    pub fn push(&mut self, snapshot: Arc<Snapshot>) {
        self.entries.push_front(snapshot);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.entries.front()
    }

    /// Iterate most-recent-first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Snapshot>> {
        self.entries.iter()
    }

    /// Copy out every retained snapshot, most-recent-first.
    pub fn export(&self) -> Vec<Snapshot> {
        self.entries.iter().map(|s| Snapshot::clone(s)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LENGTH)
    }
}
