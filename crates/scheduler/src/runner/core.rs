use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use rmsched_core::{Result, SchedError, SchedulerConfig, TaskId};

use crate::clock::Clock;
use crate::dispatcher::DispatchSignal;
use crate::host::HostControl;
use crate::metrics::SchedulerMetrics;
use crate::registry::Registry;
use crate::sync::lock;
use crate::task::{TaskInfo, TaskSnapshot};

/// State shared by client requests, release timers and the dispatcher.
pub(crate) struct Core {
    pub(crate) config: SchedulerConfig,
    /// The one lock over every task read-modify-write.
    pub(crate) registry: Mutex<Registry>,
    pub(crate) signal: DispatchSignal,
    pub(crate) host: Arc<dyn HostControl>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: RwLock<SchedulerMetrics>,
    /// Runtime that drives release timers.
    pub(crate) timers: Handle,
    pub(crate) stopped: AtomicBool,
}

impl Core {
    pub(crate) fn new(
        config: SchedulerConfig,
        host: Arc<dyn HostControl>,
        clock: Arc<dyn Clock>,
        timers: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::new(config.max_tasks)),
            config,
            signal: DispatchSignal::new(),
            host,
            clock,
            metrics: RwLock::new(SchedulerMetrics::default()),
            timers,
            stopped: AtomicBool::new(false),
        })
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedError::Shutdown);
        }
        Ok(())
    }

    pub(crate) fn is_registered(&self, id: TaskId) -> bool {
        lock(&self.registry).contains(id)
    }

    pub(crate) fn list(&self) -> Vec<TaskInfo> {
        lock(&self.registry).list()
    }

    pub(crate) fn snapshot(&self) -> Vec<TaskSnapshot> {
        lock(&self.registry).snapshot()
    }

    pub(crate) fn task(&self, id: TaskId) -> Option<TaskSnapshot> {
        lock(&self.registry).get(id).map(|t| t.snapshot())
    }

    pub(crate) fn running(&self) -> Option<TaskId> {
        lock(&self.registry).running()
    }

    pub(crate) fn utilization(&self) -> f64 {
        lock(&self.registry).utilization()
    }

    pub(crate) fn metrics(&self) -> SchedulerMetrics {
        match self.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Mark the scheduler stopped. Returns `false` if it already was.
    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.stopped.swap(true, Ordering::AcqRel)
    }

    /// Tear down every task once the dispatcher has exited: timers are
    /// stopped and joined, contexts are dropped back to the normal class and
    /// clients still suspended in a yield are woken.
    pub(crate) fn close(&self) {
        let tasks = lock(&self.registry).drain();
        info!(tasks = tasks.len(), "closing task registry");
        for task in tasks {
            task.timer.cancel();
            if let Some(handle) = task.context {
                if let Err(e) = self.host.demote(handle) {
                    warn!(task = task.id, "demotion on shutdown failed: {}", e);
                }
                if let Err(e) = self.host.wake(handle) {
                    debug!(task = task.id, "wake on shutdown failed: {}", e);
                }
            }
        }
    }
}
