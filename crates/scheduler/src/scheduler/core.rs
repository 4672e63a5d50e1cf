use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use deferq_core::{CoreError, SchedulerConfig};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::entry::{EntryId, ScheduledEntry};
use crate::metrics::SchedulerMetrics;
use crate::pending::PendingSet;

use super::event_loop;

/// Observable lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// `start` has not been called; submissions wait in the pending set.
    NotStarted,
    /// Nothing armed, timer stopped, pending set empty.
    Idle,
    /// One entry armed on the timer, zero or more pending behind it.
    Armed,
    /// Terminal, after `shutdown` or a panicking task. Nothing runs and
    /// submissions are ignored.
    ShutDown,
}

/// A preempting submission travelling from the gateway to the loop.
/// The loop answers on `ack` once the entry is armed or pending.
pub(super) struct Handoff {
    pub(super) entry: ScheduledEntry,
    pub(super) ack: oneshot::Sender<()>,
}

/// State shared between the loop and the gateway's fast path.
pub(super) struct Shared {
    /// Completion time of the armed entry. Written only by the loop.
    pub(super) armed_at: Option<Instant>,
    pub(super) pending: PendingSet,
    pub(super) started: bool,
}

pub(super) struct Inner {
    pub(super) config: SchedulerConfig,
    pub(super) shared: Mutex<Shared>,
    pub(super) handoff_tx: mpsc::Sender<Handoff>,
    /// Taken by the first successful `start`.
    handoff_rx: Mutex<Option<mpsc::Receiver<Handoff>>>,
    pub(super) shutdown: Notify,
    pub(super) closed: AtomicBool,
    next_id: AtomicU64,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Lock the shared state. Tasks never run under this lock, so a poisoned
    /// guard still holds consistent data.
    pub(super) fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(super) fn next_entry_id(&self) -> EntryId {
        EntryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(super) fn name(&self) -> &str {
        &self.config.name
    }

    pub(super) fn record(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        if let Ok(mut m) = self.metrics.write() {
            f(&mut m);
        }
    }
}

/// Handle to a delayed task scheduler.
///
/// Cloning is cheap; every clone drives the same loop. Instances are fully
/// independent of each other.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler. Nothing runs until [`start`](Scheduler::start).
    pub fn new(config: SchedulerConfig) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                config,
                shared: Mutex::new(Shared {
                    armed_at: None,
                    pending: PendingSet::new(),
                    started: false,
                }),
                handoff_tx,
                handoff_rx: Mutex::new(Some(handoff_rx)),
                shutdown: Notify::new(),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                metrics: RwLock::new(SchedulerMetrics::default()),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn the scheduler loop on the current tokio runtime.
    ///
    /// Only the first successful call has an effect. Entries submitted before
    /// this point are armed as soon as the loop runs. Calling `start` after
    /// `shutdown` does nothing.
    pub fn start(&self) -> Result<(), CoreError> {
        let runtime = Handle::try_current().map_err(|e| CoreError::NoRuntime(e.to_string()))?;

        let taken = self
            .inner
            .handoff_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handoffs) = taken else {
            debug!(scheduler = %self.name(), "start ignored: loop already started");
            return Ok(());
        };

        if self.inner.is_closed() {
            info!(scheduler = %self.name(), "start ignored: scheduler is shut down");
            return Ok(());
        }

        let queued = {
            let mut shared = self.inner.lock_shared();
            shared.started = true;
            shared.pending.len()
        };

        let handle = runtime.spawn(event_loop::run(Arc::clone(&self.inner), handoffs));
        *self
            .inner
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(scheduler = %self.name(), queued, "scheduler started");
        Ok(())
    }

    /// Stop the loop and discard every pending and armed entry.
    ///
    /// Later submissions are silently dropped. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(scheduler = %self.name(), "shutdown already requested");
            return;
        }

        let discarded = self.inner.lock_shared().pending.clear();
        self.inner
            .record(|m| m.discarded_on_shutdown += discarded as u64);

        info!(scheduler = %self.name(), discarded, "scheduler shutdown requested");
        self.inner.shutdown.notify_one();
    }

    /// Wait for the loop to exit. Returns immediately if it was never
    /// started or has already been joined.
    pub async fn join(&self) {
        let handle = self
            .inner
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(scheduler = %self.name(), "scheduler loop ended with a panicking task");
                } else {
                    debug!(scheduler = %self.name(), error = %e, "scheduler loop cancelled");
                }
            }
        }
    }

    /// Current lifecycle state. A task that panicked ends the loop and
    /// leaves the scheduler in [`SchedulerState::ShutDown`].
    pub fn state(&self) -> SchedulerState {
        if self.inner.is_closed() {
            return SchedulerState::ShutDown;
        }
        let shared = self.inner.lock_shared();
        if !shared.started {
            SchedulerState::NotStarted
        } else if shared.armed_at.is_some() {
            SchedulerState::Armed
        } else {
            SchedulerState::Idle
        }
    }

    /// Number of entries waiting behind the armed one.
    pub fn pending_len(&self) -> usize {
        self.inner.lock_shared().pending.len()
    }

    /// Snapshot of the scheduler counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner
            .metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
