use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use rmsched_core::TaskId;

use crate::host::ContextHandle;
use crate::timer::ReleaseTimer;

/// Scheduling status of an admitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Released and waiting for the CPU.
    Ready,
    /// The dispatcher's current choice.
    Running,
    /// Finished its job for this period; waiting for the next release.
    Sleeping,
}

/// An admitted periodic task. Lives inside the registry and is only touched
/// under the registry lock.
#[derive(Debug)]
pub struct Task {
    pub(crate) id: TaskId,
    /// `None` for a phantom task whose context could not be resolved.
    pub(crate) context: Option<ContextHandle>,
    pub(crate) period: Duration,
    pub(crate) budget: Duration,
    pub(crate) status: TaskStatus,
    /// Next period boundary that has not been released yet.
    pub(crate) next_release: Instant,
    /// Release applied but the dispatcher has not been reached yet.
    pub(crate) postponed: bool,
    pub(crate) timer: ReleaseTimer,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        context: Option<ContextHandle>,
        period: Duration,
        budget: Duration,
        next_release: Instant,
        timer: ReleaseTimer,
    ) -> Self {
        Self {
            id,
            context,
            period,
            budget,
            status: TaskStatus::Ready,
            next_release,
            postponed: false,
            timer,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_phantom(&self) -> bool {
        self.context.is_none()
    }

    pub fn utilization(&self) -> f64 {
        crate::admission::task_utilization(self.period, self.budget)
    }

    /// Utilization in admission load units.
    pub fn load(&self) -> u64 {
        crate::admission::task_load(self.period, self.budget)
    }

    pub(crate) fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            period_ms: self.period.as_millis() as u64,
            budget_ms: self.budget.as_millis() as u64,
        }
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            period: self.period,
            budget: self.budget,
            status: self.status,
            phantom: self.is_phantom(),
            postponed: self.postponed,
            next_release: self.next_release,
            timer_deadline: self.timer.deadline(),
        }
    }
}

/// One row of the task listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub period_ms: u64,
    pub budget_ms: u64,
}

/// Point-in-time view of a task, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub period: Duration,
    pub budget: Duration,
    pub status: TaskStatus,
    pub phantom: bool,
    pub postponed: bool,
    pub next_release: Instant,
    pub timer_deadline: Option<Instant>,
}
