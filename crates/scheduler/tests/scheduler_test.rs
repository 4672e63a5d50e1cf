//! Integration tests on a multi-threaded runtime with the real clock.
//!
//! Verifies the "no earlier than" guarantee and exactly-once firing under
//! concurrent submission from async tasks and plain threads, plus the
//! backpressure a long-running task puts on preempting submitters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{timeout, Instant};

use deferq_scheduler::{Scheduler, SchedulerConfig, SchedulerState};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Per-entry record: earliest allowed firing instant and actual firings.
#[derive(Default)]
struct Ledger {
    entries: Mutex<Vec<(Instant, Vec<Instant>)>>,
    fired: AtomicUsize,
}

impl Ledger {
    /// Register an entry due no earlier than `not_before`, returning its task.
    fn task(self: &Arc<Self>, not_before: Instant) -> impl FnOnce() + Send + 'static {
        let idx = {
            let mut entries = self.entries.lock().unwrap();
            entries.push((not_before, Vec::new()));
            entries.len() - 1
        };
        let ledger = Arc::clone(self);
        move || {
            ledger.entries.lock().unwrap()[idx].1.push(Instant::now());
            ledger.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(&self, expected: usize) {
        timeout(TIMEOUT, async {
            while self.fired.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("not every entry fired in time");
    }

    fn assert_each_fired_once_on_time(&self) {
        for (i, (not_before, firings)) in self.entries.lock().unwrap().iter().enumerate() {
            assert_eq!(firings.len(), 1, "entry {i} fired {} times", firings.len());
            assert!(firings[0] >= *not_before, "entry {i} fired early");
        }
    }
}

fn started(name: &str) -> Scheduler {
    let sched = Scheduler::new(SchedulerConfig::named(name));
    sched.start().unwrap();
    sched
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_async_submitters_all_fire_once() {
    let sched = started("concurrent-async");
    let ledger = Arc::new(Ledger::default());

    let mut handles = Vec::new();
    for worker in 0..8u64 {
        let sched = sched.clone();
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            for i in 0..25u64 {
                let delay = Duration::from_millis((worker * 31 + i * 17) % 150);
                let task = ledger.task(Instant::now() + delay);
                sched.schedule(task, delay).await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    ledger.wait_for(200).await;
    ledger.assert_each_fired_once_on_time();

    let m = sched.metrics();
    assert_eq!(m.tasks_fired, 200);
    assert_eq!(m.fast_path_appends + m.handoffs, 200);

    sched.shutdown();
    sched.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_threads_can_submit() {
    let sched = started("blocking");
    let ledger = Arc::new(Ledger::default());

    let mut handles = Vec::new();
    for thread in 0..4u64 {
        let sched = sched.clone();
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::task::spawn_blocking(move || {
            for i in 0..10u64 {
                let delay = Duration::from_millis(100 - (thread * 10 + i) * 2);
                let task = ledger.task(Instant::now() + delay);
                sched.schedule_blocking(task, delay);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    ledger.wait_for(40).await;
    ledger.assert_each_fired_once_on_time();

    sched.shutdown();
    sched.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sooner_entry_fires_first_on_real_clock() {
    let sched = started("real-clock");
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&order);
    sched.schedule(move || o.lock().unwrap().push("A"), Duration::from_millis(200)).await;
    let o = Arc::clone(&order);
    sched.schedule(move || o.lock().unwrap().push("B"), Duration::from_millis(100)).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
    assert_eq!(sched.state(), SchedulerState::Idle);

    sched.shutdown();
    sched.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preempting_submitter_waits_for_running_task() {
    let sched = started("backpressure");
    let ledger = Arc::new(Ledger::default());

    // Occupies the loop for a while once it fires.
    let due = Instant::now();
    let slow = ledger.task(due);
    sched
        .schedule_at(
            move || {
                std::thread::sleep(Duration::from_millis(300));
                slow();
            },
            due,
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Due no later than the entry being executed, so it must go through the loop.
    let submitted = Instant::now();
    let task = ledger.task(due);
    sched.schedule_at(task, due).await;
    let waited = submitted.elapsed();

    assert!(
        waited >= Duration::from_millis(200),
        "submitter returned after {waited:?} while the loop was busy"
    );

    ledger.wait_for(2).await;
    ledger.assert_each_fired_once_on_time();

    sched.shutdown();
    sched.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn later_submission_is_not_held_up_by_running_task() {
    let sched = started("fast-path-while-busy");
    let ledger = Arc::new(Ledger::default());

    let due = Instant::now();
    let slow = ledger.task(due);
    sched
        .schedule_at(
            move || {
                std::thread::sleep(Duration::from_millis(300));
                slow();
            },
            due,
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Due after the entry being executed: appended without involving the loop.
    let appended_before = sched.metrics().fast_path_appends;
    let delay = Duration::from_millis(10);
    let submitted = Instant::now();
    let task = ledger.task(submitted + delay);
    sched.schedule(task, delay).await;
    let waited = submitted.elapsed();

    assert!(
        waited < Duration::from_millis(100),
        "submitter waited {waited:?} behind the running task"
    );
    assert_eq!(sched.metrics().fast_path_appends, appended_before + 1);

    ledger.wait_for(2).await;
    ledger.assert_each_fired_once_on_time();

    sched.shutdown();
    sched.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_with_pending_entries_runs_nothing() {
    let sched = started("shutdown");
    let ran = Arc::new(AtomicUsize::new(0));

    for ms in [1000, 2000] {
        let r = Arc::clone(&ran);
        sched
            .schedule(move || { r.fetch_add(1, Ordering::SeqCst); }, Duration::from_millis(ms))
            .await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    sched.shutdown();
    timeout(TIMEOUT, sched.join()).await.unwrap();

    let r = Arc::clone(&ran);
    let late = sched.schedule(move || { r.fetch_add(1, Ordering::SeqCst); }, Duration::ZERO);
    timeout(Duration::from_millis(100), late)
        .await
        .expect("schedule after shutdown must not block");

    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(sched.state(), SchedulerState::ShutDown);
}
