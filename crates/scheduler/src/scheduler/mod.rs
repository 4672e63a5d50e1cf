//! Delayed task scheduler driven by a single re-armable timer.
//!
//! Split into focused submodules:
//! - `core`: Scheduler handle, lifecycle (start / shutdown / join) and introspection
//! - `gateway`: the thread-safe submission path and its preemption decision
//! - `event_loop`: the sequential loop that owns the timer and the armed entry
//!
//! The loop is the only writer of the armed entry. The pending set is shared
//! with the gateway's fast path under one mutex; a submission that may be due
//! before the armed entry is handed to the loop and the submitter waits until
//! the loop has taken it.

mod core;
mod event_loop;
mod gateway;

pub use self::core::{Scheduler, SchedulerState};
