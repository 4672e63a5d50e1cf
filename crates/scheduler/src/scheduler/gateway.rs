use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::entry::{deadline_after, ScheduledEntry, Task};

use super::core::Handoff;
use super::Scheduler;

/// Outcome of the gateway's comparison against the armed entry.
enum Admission {
    /// The scheduler is shut down; the task was dropped unrun.
    Dropped,
    /// The entry is in the pending set.
    Queued,
    /// The entry may be due first and must be handed to the loop.
    Preempt(ScheduledEntry),
}

impl Scheduler {
    /// Run `task` no earlier than `delay` from now.
    ///
    /// Returns once the entry is known to the scheduler. If it may be due
    /// before the armed entry, this waits until the loop has taken it, which
    /// takes as long as the task the loop is currently running. After
    /// shutdown the task is dropped and this returns immediately.
    pub async fn schedule<F>(&self, task: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(task, deadline_after(Instant::now(), delay))
            .await
    }

    /// Run `task` no earlier than `deadline`. A deadline in the past is due
    /// immediately.
    pub async fn schedule_at<F>(&self, task: F, deadline: Instant)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some((handoff, ack)) = self.admit(Box::new(task), deadline) else {
            return;
        };

        if self.inner.handoff_tx.send(handoff).await.is_err() {
            debug!(scheduler = %self.name(), "loop gone; handoff dropped");
            return;
        }
        // An error means the loop exited before taking the entry.
        let _ = ack.await;
    }

    /// Blocking variant of [`schedule`](Scheduler::schedule) for plain
    /// threads.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn schedule_blocking<F>(&self, task: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = deadline_after(Instant::now(), delay);
        let Some((handoff, ack)) = self.admit(Box::new(task), deadline) else {
            return;
        };

        if self.inner.handoff_tx.blocking_send(handoff).is_err() {
            debug!(scheduler = %self.name(), "loop gone; handoff dropped");
            return;
        }
        let _ = ack.blocking_recv();
    }

    /// Admit a submission: either settle it under the lock, or package it
    /// for the loop together with the receiver the submitter waits on.
    fn admit(&self, task: Task, deadline: Instant) -> Option<(Handoff, oneshot::Receiver<()>)> {
        match self.classify(task, deadline) {
            Admission::Dropped | Admission::Queued => None,
            Admission::Preempt(entry) => {
                let (ack_tx, ack_rx) = oneshot::channel();
                Some((Handoff { entry, ack: ack_tx }, ack_rx))
            }
        }
    }

    fn classify(&self, task: Task, deadline: Instant) -> Admission {
        let inner = &self.inner;
        let mut shared = inner.lock_shared();

        if inner.is_closed() {
            drop(shared);
            inner.record(|m| m.dropped_after_shutdown += 1);
            debug!(scheduler = %inner.name(), "submission after shutdown dropped");
            return Admission::Dropped;
        }

        let entry = ScheduledEntry::new(inner.next_entry_id(), task, deadline);
        let id = entry.id();

        if !shared.started {
            shared.pending.push(entry);
            drop(shared);
            debug!(scheduler = %inner.name(), entry = %id, "queued before start");
            return Admission::Queued;
        }

        match shared.armed_at {
            Some(armed_at) if armed_at < entry.completion_time() => {
                shared.pending.push(entry);
                drop(shared);
                inner.record(|m| m.fast_path_appends += 1);
                debug!(scheduler = %inner.name(), entry = %id, "queued behind armed entry");
                Admission::Queued
            }
            _ => {
                drop(shared);
                inner.record(|m| m.handoffs += 1);
                debug!(scheduler = %inner.name(), entry = %id, "handing entry to loop");
                Admission::Preempt(entry)
            }
        }
    }
}
