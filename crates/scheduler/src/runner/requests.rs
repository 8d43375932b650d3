use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use rmsched_core::{Result, SchedError, TaskId};

use crate::admission;
use crate::sync::lock;
use crate::task::{Task, TaskStatus};
use crate::timer::{FireOutcome, ReleaseTimer};

use super::core::Core;

impl Core {
    /// Admit `pid` as a periodic task and make it immediately runnable.
    pub(crate) fn register(self: &Arc<Self>, pid: TaskId, period: Duration, budget: Duration) -> Result<TaskId> {
        self.ensure_running()?;
        admission::validate(period, budget)?;

        // Host lookups happen before the registry lock is taken.
        let context = self.host.lookup(pid);
        if context.is_none() {
            warn!(task = pid, "execution context not found; admitting phantom task");
        }

        let utilization = {
            let mut registry = lock(&self.registry);
            // Shutdown may have drained the registry since the check above.
            self.ensure_running()?;
            registry.check_vacancy(pid)?;
            let load = match admission::admit(
                registry.load(),
                period,
                budget,
                self.config.utilization_bound,
            ) {
                Ok(load) => load,
                Err(e) => {
                    drop(registry);
                    if let Ok(mut m) = self.metrics.write() {
                        m.record_rejection();
                    }
                    info!(task = pid, ?period, ?budget, "registration rejected: {}", e);
                    return Err(e);
                }
            };

            let next_release = self.clock.now() + period;
            let timer = self.release_timer(pid);
            timer.arm(next_release);
            registry.insert(Task::new(pid, context, period, budget, next_release, timer))?;

            let utilization = admission::load_to_utilization(load);
            if let Ok(mut m) = self.metrics.write() {
                m.record_admission(utilization);
            }
            utilization
        };

        info!(
            task = pid,
            period_ms = period.as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            utilization,
            "task registered"
        );
        self.signal.notify();
        Ok(pid)
    }

    /// Finish the current job of `id` and suspend the caller until the
    /// dispatcher resumes the task.
    pub(crate) fn yield_task(&self, id: TaskId) -> Result<()> {
        self.ensure_running()?;

        let context = lock(&self.registry)
            .get(id)
            .ok_or(SchedError::NotFound(id))?
            .context;
        // Wake-ups from before this point belong to the job that just ended.
        if let Some(handle) = context {
            self.host.prepare_suspend(handle);
        }

        let overrun = {
            let mut registry = lock(&self.registry);
            let now = self.clock.now();
            let task = registry.get_mut(id).ok_or(SchedError::NotFound(id))?;
            let overrun = task.next_release <= now;
            if overrun {
                task.next_release = now + task.period;
            }
            task.timer.arm(task.next_release);
            task.status = TaskStatus::Sleeping;
            task.postponed = false;
            registry.clear_running_if(id);
            overrun
        };

        if overrun {
            debug!(task = id, "deadline overrun absorbed; next release one period from now");
            if let Ok(mut m) = self.metrics.write() {
                m.record_overrun();
            }
        }
        self.signal.notify();

        if let Some(handle) = context {
            if let Err(e) = self.host.suspend(handle) {
                warn!(task = id, "suspend failed: {}", e);
            }
        }
        Ok(())
    }

    /// Remove `id`, stopping and joining its release timer first.
    pub(crate) fn deregister(&self, id: TaskId) -> Result<()> {
        self.ensure_running()?;

        let (task, utilization) = {
            let mut registry = lock(&self.registry);
            let task = registry.remove(id).ok_or(SchedError::NotFound(id))?;
            let utilization = registry.utilization();
            if let Ok(mut m) = self.metrics.write() {
                m.record_deregistration(id, utilization);
            }
            (task, utilization)
        };
        task.timer.cancel();
        drop(task);

        info!(task = id, utilization, "task deregistered");
        self.signal.notify();
        Ok(())
    }

    fn release_timer(self: &Arc<Self>, id: TaskId) -> ReleaseTimer {
        let core = Arc::downgrade(self);
        ReleaseTimer::new(self.timers.clone(), move || match core.upgrade() {
            Some(core) => core.on_release(id),
            None => FireOutcome::Done,
        })
    }
}
