use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rate-monotonic least upper bound for an unbounded number of tasks
/// (`ln 2`, truncated).
pub const LIMINAL_UTILIZATION: f64 = 0.693;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Scheduler configuration.
///
/// Usually built from the environment via [`SchedulerConfig::from_env`];
/// every field also has a serde default so partial TOML/JSON documents work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    /// Admission bound on total utilization.
    #[serde(default = "default_utilization_bound")]
    pub utilization_bound: f64,
    /// Delay before a postponed release retries signaling the dispatcher.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum number of admitted tasks.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Worker threads driving release timers. 0 = 1.
    #[serde(default = "default_timer_threads")]
    pub timer_threads: usize,
}

fn default_utilization_bound() -> f64 {
    LIMINAL_UTILIZATION
}

fn default_retry_delay_ms() -> u64 {
    5
}

fn default_max_tasks() -> usize {
    1024
}

fn default_timer_threads() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            utilization_bound: default_utilization_bound(),
            retry_delay_ms: default_retry_delay_ms(),
            max_tasks: default_max_tasks(),
            timer_threads: default_timer_threads(),
        }
    }
}

impl SchedulerConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RMSCHED_PROFILE`. When set (e.g. `BENCH`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RMSCHED_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let bound = profiled_env_parse(p, "RMSCHED_UTILIZATION_BOUND", default_utilization_bound());
        Self {
            profile: p.to_string(),
            // Anything outside (0, 1] cannot be a meaningful single-CPU bound.
            utilization_bound: if bound > 0.0 && bound <= 1.0 {
                bound
            } else {
                tracing::warn!(bound, "ignoring out-of-range utilization bound");
                default_utilization_bound()
            },
            retry_delay_ms: profiled_env_parse(p, "RMSCHED_RETRY_DELAY_MS", default_retry_delay_ms()),
            max_tasks: profiled_env_parse(p, "RMSCHED_MAX_TASKS", default_max_tasks()),
            timer_threads: profiled_env_parse(p, "RMSCHED_TIMER_THREADS", default_timer_threads()),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Delay between postponed release retries. Never zero.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.max(1))
    }

    /// Resolve timer thread count (0 means a single thread).
    pub fn resolved_timer_threads(&self) -> usize {
        self.timer_threads.max(1)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  admission:   utilization_bound={:.3}, max_tasks={}", self.utilization_bound, self.max_tasks);
        tracing::info!("  timers:      threads={}, retry_delay={}ms", self.resolved_timer_threads(), self.retry_delay_ms);
    }

    /// Return a JSON view for status output.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "admission": { "utilization_bound": self.utilization_bound, "max_tasks": self.max_tasks },
            "timers": { "threads": self.resolved_timer_threads(), "retry_delay_ms": self.retry_delay_ms },
        })
    }
}
