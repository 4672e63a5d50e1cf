//! The set of entries waiting behind the armed one.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use tokio::time::Instant;

use crate::entry::ScheduledEntry;

/// Heap wrapper ordering entries by completion time only, reversed so that
/// `BinaryHeap` (a max-heap) yields the earliest deadline first.
struct ByDeadline(ScheduledEntry);

impl PartialEq for ByDeadline {
    fn eq(&self, other: &Self) -> bool {
        self.0.completion_time() == other.0.completion_time()
    }
}

impl Eq for ByDeadline {}

impl PartialOrd for ByDeadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByDeadline {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.completion_time().cmp(&self.0.completion_time())
    }
}

/// Entries known to the scheduler but not armed on its timer.
///
/// Removal always takes the entry with the minimum completion time. Among
/// entries with equal completion times the one returned is unspecified.
#[derive(Default)]
pub struct PendingSet {
    heap: BinaryHeap<ByDeadline>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ScheduledEntry) {
        self.heap.push(ByDeadline(entry));
    }

    /// Remove and return the entry that is due soonest.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEntry> {
        self.heap.pop().map(|ByDeadline(entry)| entry)
    }

    /// Completion time of the entry that is due soonest.
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.0.completion_time())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every entry without running it. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        n
    }
}

impl fmt::Debug for PendingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSet")
            .field("len", &self.len())
            .field("earliest_deadline", &self.earliest_deadline())
            .finish()
    }
}
