use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Source of raw config values. `from_env` uses the process environment;
/// tests pass a closure over a fixed map.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: Lookup<'_>, profile: &str, key: &str) -> Option<(String, String)> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(prefixed.as_str()).filter(|s| !s.is_empty()) {
            return Some((prefixed, v));
        }
    }
    lookup(key)
        .filter(|s| !s.is_empty())
        .map(|v| (key.to_string(), v))
}

fn profiled_or(lookup: Lookup<'_>, profile: &str, key: &str, default: &str) -> String {
    profiled_opt(lookup, profile, key)
        .map(|(_, v)| v)
        .unwrap_or_else(|| default.to_string())
}

fn profiled_u64(
    lookup: Lookup<'_>,
    profile: &str,
    key: &str,
    default: u64,
) -> Result<u64, CoreError> {
    match profiled_opt(lookup, profile, key) {
        Some((key, value)) => value
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidConfig { key, value }),
        None => Ok(default),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `DEFERQ_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(&env_opt)
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, CoreError> {
        let profile = lookup("DEFERQ_PROFILE")
            .unwrap_or_default()
            .trim()
            .to_uppercase();
        Ok(Self {
            scheduler: SchedulerConfig::from_lookup_profiled(lookup, &profile)?,
            profile,
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   name={}, slow_task_threshold_ms={}",
            self.scheduler.name,
            self.scheduler.slow_task_threshold_ms
        );
    }

    /// Return a JSON view of the effective settings.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "scheduler": {
                "name": self.scheduler.name,
                "slow_task_threshold_ms": self.scheduler.slow_task_threshold_ms,
            },
        })
    }
}

// ── Scheduler ─────────────────────────────────────────────────

fn default_name() -> String { "deferq".to_string() }
fn default_slow_task_threshold_ms() -> u64 { 1000 }

/// Settings for a single scheduler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Label carried on every log line emitted by the scheduler.
    #[serde(default = "default_name")]
    pub name: String,
    /// Tasks running longer than this are logged as stalling the loop.
    #[serde(default = "default_slow_task_threshold_ms")]
    pub slow_task_threshold_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            slow_task_threshold_ms: default_slow_task_threshold_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Config with a custom name and default thresholds.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn from_lookup_profiled(lookup: Lookup<'_>, p: &str) -> Result<Self, CoreError> {
        Ok(Self {
            name: profiled_or(lookup, p, "DEFERQ_NAME", &default_name()),
            slow_task_threshold_ms: profiled_u64(
                lookup,
                p,
                "DEFERQ_SLOW_TASK_MS",
                default_slow_task_threshold_ms(),
            )?,
        })
    }

    pub fn slow_task_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_task_threshold_ms)
    }
}
