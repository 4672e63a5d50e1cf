use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::entry::{EntryId, ScheduledEntry};

use super::core::{Handoff, Inner};

/// The scheduler loop. Owns the timer and the armed entry until shutdown.
///
/// Waits on shutdown, timer expiry and incoming handoffs, in that priority.
/// The timer branch is disabled while nothing is armed, so an idle loop
/// never wakes on its own.
pub(super) async fn run(inner: Arc<Inner>, mut handoffs: mpsc::Receiver<Handoff>) {
    let slow_task = inner.config.slow_task_threshold();
    let timer = time::sleep_until(Instant::now());
    tokio::pin!(timer);

    // Entries submitted before start are waiting in the pending set.
    let mut armed = arm_earliest(&inner);
    if let Some(entry) = &armed {
        timer.as_mut().reset(entry.completion_time());
    }

    loop {
        tokio::select! {
            biased;

            _ = inner.shutdown.notified() => break,

            _ = &mut timer, if armed.is_some() => {
                if inner.is_closed() {
                    break;
                }
                if let Some(entry) = armed.take() {
                    fire(&inner, entry, slow_task).await;
                }
                armed = arm_earliest(&inner);
                if let Some(entry) = &armed {
                    timer.as_mut().reset(entry.completion_time());
                }
            }

            Some(Handoff { entry, ack }) = handoffs.recv() => {
                armed = accept(&inner, armed.take(), entry);
                if let Some(entry) = &armed {
                    timer.as_mut().reset(entry.completion_time());
                }
                // The submitter may have given up waiting.
                let _ = ack.send(());
            }
        }
    }

    // Refuse further handoffs; submitters still waiting see their ack dropped.
    handoffs.close();
    let mut discarded = usize::from(armed.take().is_some());
    while let Ok(handoff) = handoffs.try_recv() {
        drop(handoff);
        discarded += 1;
    }
    {
        let mut shared = inner.lock_shared();
        shared.armed_at = None;
        discarded += shared.pending.clear();
    }
    inner.record(|m| m.discarded_on_shutdown += discarded as u64);

    info!(scheduler = %inner.name(), discarded, "scheduler loop stopped");
}

/// Run a fired entry's task, suspending the loop until it returns.
///
/// The task runs on the blocking pool so that it stalls only this loop, not
/// the worker thread and timers of the runtime hosting it. A panicking task
/// ends the loop: the scheduler is marked shut down and the panic resumes here.
async fn fire(inner: &Inner, entry: ScheduledEntry, slow_task: Duration) {
    let id = entry.id();
    let started = Instant::now();
    let late = started.saturating_duration_since(entry.completion_time());
    debug!(
        scheduler = %inner.name(),
        entry = %id,
        late_ms = late.as_millis() as u64,
        "firing task"
    );

    if let Err(e) = task::spawn_blocking(move || entry.run()).await {
        if e.is_panic() {
            abandon(inner, id);
            std::panic::resume_unwind(e.into_panic());
        }
        // Cancelled: the runtime is shutting down.
        debug!(scheduler = %inner.name(), entry = %id, "task cancelled");
        return;
    }

    let elapsed = started.elapsed();
    if elapsed > slow_task {
        warn!(
            scheduler = %inner.name(),
            entry = %id,
            elapsed_ms = elapsed.as_millis() as u64,
            "task stalled the scheduler loop"
        );
    }
    inner.record(|m| m.record_fire(elapsed));
}

/// Put the scheduler in its terminal state after a task panicked, so that
/// nothing is queued behind a loop that is about to unwind.
fn abandon(inner: &Inner, id: EntryId) {
    inner.closed.store(true, Ordering::Release);
    let discarded = {
        let mut shared = inner.lock_shared();
        shared.armed_at = None;
        shared.pending.clear()
    };
    inner.record(|m| m.discarded_on_shutdown += discarded as u64);
    error!(scheduler = %inner.name(), entry = %id, discarded, "task panicked; scheduler loop stopping");
}

/// Take the earliest pending entry as the new armed entry, or go idle.
fn arm_earliest(inner: &Inner) -> Option<ScheduledEntry> {
    let mut shared = inner.lock_shared();
    let next = shared.pending.pop_earliest();
    shared.armed_at = next.as_ref().map(ScheduledEntry::completion_time);
    let pending = shared.pending.len();
    drop(shared);

    match &next {
        Some(entry) => debug!(scheduler = %inner.name(), entry = %entry.id(), pending, "armed"),
        None => debug!(scheduler = %inner.name(), "idle"),
    }
    next
}

/// Settle a handoff against the current armed entry and return the entry
/// that should be armed afterwards.
///
/// The gateway compared against the armed entry before releasing its lock,
/// so by now a sooner entry may have been armed. Whatever happened, the
/// earliest known entry ends up armed.
pub(super) fn accept(
    inner: &Inner,
    current: Option<ScheduledEntry>,
    incoming: ScheduledEntry,
) -> Option<ScheduledEntry> {
    let mut shared = inner.lock_shared();

    let armed = match current {
        Some(current) if current.is_due_before(&incoming) => {
            debug!(
                scheduler = %inner.name(),
                entry = %incoming.id(),
                armed = %current.id(),
                "handoff no longer earliest; queued"
            );
            shared.pending.push(incoming);
            inner.record(|m| m.stale_handoffs += 1);
            Some(current)
        }
        Some(current) => {
            debug!(
                scheduler = %inner.name(),
                entry = %incoming.id(),
                demoted = %current.id(),
                "preempting armed entry"
            );
            shared.pending.push(current);
            inner.record(|m| m.preemptions += 1);
            Some(incoming)
        }
        None => {
            // Idle, or the loop is just starting: compete with the pending set.
            shared.pending.push(incoming);
            shared.pending.pop_earliest()
        }
    };

    shared.armed_at = armed.as_ref().map(ScheduledEntry::completion_time);
    if let Some(entry) = &armed {
        debug!(scheduler = %inner.name(), entry = %entry.id(), "armed");
    }
    armed
}
