//! Single-timer delayed task scheduler.
//!
//! Callers hand a task and a delay to a [`Scheduler`]; the task runs no
//! earlier than `now + delay`. However many tasks are pending, only one
//! timer is armed at a time: it always tracks the entry with the earliest
//! completion time, and a newly submitted entry that is due sooner
//! preempts it.
//!
//! Tasks run one at a time and the loop waits for each to return. A task
//! that blocks stalls every entry queued behind it, and a task that panics
//! ends the scheduler, so tasks must be short and must handle their own
//! failures.

pub mod entry;
pub mod metrics;
pub mod pending;
pub mod scheduler;

pub use deferq_core::{CoreError, SchedulerConfig};
pub use entry::{EntryId, ScheduledEntry, Task};
pub use metrics::SchedulerMetrics;
pub use pending::PendingSet;
pub use scheduler::{Scheduler, SchedulerState};
