//! Scheduled entries: a task bound to the instant it becomes due.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// A deferred unit of work. Ownership moves to the scheduler on submission.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Used in place of `now + delay` when that sum overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Per-scheduler sequence number, for log correlation only.
///
/// Ids grow with submission order but are never used to order entries:
/// entries with equal completion times fire in unspecified order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) u64);

impl EntryId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A task bound to an absolute completion time. Immutable once built.
pub struct ScheduledEntry {
    id: EntryId,
    completion_time: Instant,
    task: Task,
}

impl ScheduledEntry {
    pub(crate) fn new(id: EntryId, task: Task, completion_time: Instant) -> Self {
        Self {
            id,
            completion_time,
            task,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    /// The earliest instant at which the task may run.
    pub fn completion_time(&self) -> Instant {
        self.completion_time
    }

    /// Whether this entry is due strictly before `other`.
    pub fn is_due_before(&self, other: &ScheduledEntry) -> bool {
        self.completion_time < other.completion_time
    }

    /// Consume the entry and run its task on the current thread.
    pub(crate) fn run(self) {
        (self.task)()
    }
}

impl fmt::Debug for ScheduledEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEntry")
            .field("id", &self.id)
            .field("completion_time", &self.completion_time)
            .finish_non_exhaustive()
    }
}

/// Absolute deadline for a delay measured from `now`, saturating far in the
/// future instead of overflowing.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}
