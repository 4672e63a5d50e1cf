//! deferq-demo — exercises a scheduler end to end.
//!
//! Schedules A (1000ms), B (500ms) and C (1000ms), waits until all three
//! have run (B first, since it preempts A), shuts the scheduler down, then
//! submits D, which is silently dropped. Prints the final metrics as JSON.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::info;

use deferq_core::config::{load_dotenv, Config};
use deferq_scheduler::Scheduler;

// ── CLI ─────────────────────────────────────────────────────────────

/// Single-timer delayed task scheduler demo.
#[derive(Parser, Debug)]
#[command(name = "deferq-demo", version, about)]
struct Cli {
    /// How long to keep running after shutdown, to show D never fires.
    #[arg(long, env = "DEFERQ_DEMO_LINGER_MS", default_value_t = 2000)]
    linger_ms: u64,

    /// Print the effective config and exit.
    #[arg(long)]
    show_config: bool,
}

// ── Completion tracking ─────────────────────────────────────────────

/// Counts outstanding demo tasks and wakes the waiter when all have run.
struct Outstanding {
    remaining: AtomicUsize,
    done: Notify,
}

impl Outstanding {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(0),
            done: Notify::new(),
        })
    }

    /// Build a task that logs its key and marks itself finished.
    fn task(self: &Arc<Self>, key: &'static str) -> impl FnOnce() + Send + 'static {
        self.remaining.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        move || {
            info!(task = key, "task {}", key);
            if this.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                this.done.notify_one();
            }
        }
    }

    async fn wait(&self) {
        while self.remaining.load(Ordering::SeqCst) > 0 {
            self.done.notified().await;
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    if cli.show_config {
        println!("{}", serde_json::to_string_pretty(&config.summary())?);
        return Ok(());
    }
    config.log_summary();

    let scheduler = Scheduler::new(config.scheduler);
    scheduler.start()?;

    let outstanding = Outstanding::new();
    scheduler.schedule(outstanding.task("A"), Duration::from_millis(1000)).await;
    scheduler.schedule(outstanding.task("B"), Duration::from_millis(500)).await;
    scheduler.schedule(outstanding.task("C"), Duration::from_millis(1000)).await;

    outstanding.wait().await;

    scheduler.shutdown();
    scheduler.join().await;

    // Dropped: the scheduler is shut down.
    scheduler.schedule(outstanding.task("D"), Duration::from_secs(1)).await;

    tokio::time::sleep(Duration::from_millis(cli.linger_ms)).await;

    let metrics = scheduler.metrics();
    info!(
        fired = metrics.tasks_fired,
        dropped = metrics.dropped_after_shutdown,
        "demo finished"
    );
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
