use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler counters, exposed as a snapshot via `Scheduler::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks that ran to completion on the loop.
    pub tasks_fired: u64,
    /// Submissions appended straight to the pending set.
    pub fast_path_appends: u64,
    /// Submissions handed to the loop because they might be due first.
    pub handoffs: u64,
    /// Handoffs that demoted the armed entry.
    pub preemptions: u64,
    /// Handoffs that arrived after a sooner entry had been armed.
    pub stale_handoffs: u64,
    /// Submissions ignored because the scheduler was shut down.
    pub dropped_after_shutdown: u64,
    /// Pending or armed entries thrown away by shutdown.
    pub discarded_on_shutdown: u64,
    /// Mean time spent inside a task.
    pub avg_task_duration: Duration,
    /// Wall-clock time of the most recent firing.
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record a task execution.
    pub fn record_fire(&mut self, duration: Duration) {
        self.tasks_fired += 1;
        self.last_fired_at = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_task_duration = if self.tasks_fired == 1 {
            duration
        } else {
            let prev_nanos = self.avg_task_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.tasks_fired as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }
}
