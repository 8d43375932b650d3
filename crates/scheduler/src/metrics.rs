use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rmsched_core::TaskId;

/// Scheduler counters, readable through `Scheduler::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Successful registrations.
    pub admitted: u64,
    /// Registrations refused by the admission test.
    pub rejected: u64,
    pub deregistered: u64,
    /// Period boundaries that made a sleeping task ready.
    pub releases: u64,
    /// Releases whose dispatcher signal had to be retried.
    pub postponed_releases: u64,
    /// Yields that arrived after the task's next release time.
    pub overruns: u64,
    /// Dispatcher decisions that changed the running task.
    pub dispatches: u64,
    /// Releases per task.
    pub releases_by_task: HashMap<TaskId, u64>,
    /// Wall-clock time of each task's last release.
    pub last_release: HashMap<TaskId, DateTime<Utc>>,
    /// Current total utilization of admitted tasks.
    pub utilization: f64,
}

impl SchedulerMetrics {
    pub fn record_admission(&mut self, utilization: f64) {
        self.admitted += 1;
        self.utilization = utilization;
    }

    pub fn record_rejection(&mut self) {
        self.rejected += 1;
    }

    pub fn record_deregistration(&mut self, id: TaskId, utilization: f64) {
        self.deregistered += 1;
        self.utilization = utilization;
        self.releases_by_task.remove(&id);
        self.last_release.remove(&id);
    }

    pub fn record_release(&mut self, id: TaskId) {
        self.releases += 1;
        *self.releases_by_task.entry(id).or_default() += 1;
        self.last_release.insert(id, Utc::now());
    }

    pub fn record_postponed(&mut self) {
        self.postponed_releases += 1;
    }

    pub fn record_overrun(&mut self) {
        self.overruns += 1;
    }

    pub fn record_dispatch(&mut self) {
        self.dispatches += 1;
    }
}
