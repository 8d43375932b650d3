use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{error, info};

use rmsched_core::{Result, SchedError, SchedulerConfig, TaskId};

use crate::clock::{Clock, MonotonicClock};
use crate::dispatcher::Dispatcher;
use crate::host::HostControl;
use crate::metrics::SchedulerMetrics;
use crate::sync::lock;
use crate::task::{TaskInfo, TaskSnapshot};

use super::core::Core;

/// Handle to a running scheduler.
///
/// Construction starts the timer runtime and the dispatcher thread;
/// [`shutdown`](Self::shutdown) (or dropping the handle) stops both and
/// tears down every task. All request methods take `&self` and may be called
/// from any number of client threads.
pub struct Scheduler {
    core: Arc<Core>,
    runtime: Mutex<Option<Runtime>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start a scheduler on the process monotonic clock.
    pub fn new(config: SchedulerConfig, host: Arc<dyn HostControl>) -> Result<Self> {
        Self::with_clock(config, host, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        config: SchedulerConfig,
        host: Arc<dyn HostControl>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.resolved_timer_threads())
            .thread_name("rmsched-timer")
            .enable_time()
            .build()
            .map_err(|e| SchedError::Runtime(format!("timer runtime: {}", e)))?;

        info!(
            "Scheduler starting: bound={:.3}, max_tasks={}, timer_threads={}",
            config.utilization_bound,
            config.max_tasks,
            config.resolved_timer_threads()
        );

        let core = Core::new(config, host, clock, runtime.handle().clone());
        let dispatcher = Dispatcher::new(Arc::clone(&core));
        let thread = std::thread::Builder::new()
            .name("rmsched-dispatch".into())
            .spawn(move || dispatcher.run())
            .map_err(|e| SchedError::Runtime(format!("dispatcher thread: {}", e)))?;

        Ok(Self {
            core,
            runtime: Mutex::new(Some(runtime)),
            dispatcher: Mutex::new(Some(thread)),
        })
    }

    /// Register `pid` as a periodic task.
    pub fn register(&self, pid: TaskId, period: Duration, budget: Duration) -> Result<TaskId> {
        self.core.register(pid, period, budget)
    }

    /// Register with millisecond parameters, as carried by the command channel.
    pub fn register_ms(&self, pid: TaskId, period_ms: u64, budget_ms: u64) -> Result<TaskId> {
        self.register(pid, Duration::from_millis(period_ms), Duration::from_millis(budget_ms))
    }

    /// End the current job of `id`. Blocks the calling thread until the
    /// dispatcher resumes the task (phantom tasks return immediately).
    pub fn yield_task(&self, id: TaskId) -> Result<()> {
        self.core.yield_task(id)
    }

    pub fn deregister(&self, id: TaskId) -> Result<()> {
        self.core.deregister(id)
    }

    /// `(id, period, budget)` of every admitted task in registration order.
    pub fn list(&self) -> Vec<TaskInfo> {
        self.core.list()
    }

    /// Full state of every task, in registration order.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.core.snapshot()
    }

    pub fn task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.core.task(id)
    }

    /// Task currently holding the CPU according to the dispatcher.
    pub fn running(&self) -> Option<TaskId> {
        self.core.running()
    }

    pub fn utilization(&self) -> f64 {
        self.core.utilization()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.core.metrics()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// Whether the dispatcher is in the middle of an activation.
    pub fn is_dispatching(&self) -> bool {
        self.core.signal.is_active() || self.core.signal.is_pending()
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.ensure_running().is_err()
    }

    /// Stop the dispatcher, cancel every timer and release suspended
    /// clients. Idempotent.
    pub fn shutdown(&self) {
        if !self.core.begin_shutdown() {
            return;
        }
        info!("Scheduler shutdown requested");
        self.core.signal.stop();
        if let Some(thread) = lock(&self.dispatcher).take() {
            if thread.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
        self.core.close();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
