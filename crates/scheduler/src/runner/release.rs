use tracing::{debug, trace};

use rmsched_core::TaskId;

use crate::sync::try_lock;
use crate::task::TaskStatus;
use crate::timer::FireOutcome;

use super::core::Core;

/// What a timer firing did, recorded after the registry lock is released.
enum Fired {
    Released { postponed: bool },
    Retried { postponed: bool },
}

impl Core {
    /// Release-timer callback for task `id`.
    ///
    /// Runs on the timer runtime and never blocks: contended locks and a busy
    /// dispatcher both turn into a short re-arm instead of a wait. Re-arming
    /// keeps releases live; the state it protects is already consistent.
    pub(crate) fn on_release(&self, id: TaskId) -> FireOutcome {
        let retry = FireOutcome::RetryAfter(self.config.retry_delay());

        let fired = {
            let Some(mut registry) = try_lock(&self.registry) else {
                trace!(task = id, "registry busy; deferring release");
                return retry;
            };
            let Some(task) = registry.get_mut(id) else {
                return FireOutcome::Done;
            };

            let released = if task.postponed {
                false
            } else {
                match task.status {
                    TaskStatus::Sleeping => {
                        task.status = TaskStatus::Ready;
                        task.next_release += task.period;
                        true
                    }
                    TaskStatus::Ready | TaskStatus::Running => {
                        // The job is still in progress; the next yield takes
                        // the overrun path.
                        debug!(task = id, "period boundary reached before the job yielded");
                        return FireOutcome::Done;
                    }
                }
            };

            let postponed = !self.signal.try_notify();
            task.postponed = postponed;
            if released {
                Fired::Released { postponed }
            } else {
                Fired::Retried { postponed }
            }
        };

        match fired {
            Fired::Released { postponed } => {
                debug!(task = id, postponed, "task released");
                if let Ok(mut m) = self.metrics.write() {
                    m.record_release(id);
                    if postponed {
                        m.record_postponed();
                    }
                }
                if postponed { retry } else { FireOutcome::Done }
            }
            Fired::Retried { postponed: true } => retry,
            Fired::Retried { postponed: false } => {
                trace!(task = id, "postponed release reached the dispatcher");
                FireOutcome::Done
            }
        }
    }
}
