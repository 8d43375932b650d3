//! The dispatcher: one long-lived thread that turns "something changed"
//! signals into rate-monotonic context switches.
//!
//! It is the only component that calls the host's priority primitives. All
//! other components flip task status under the registry lock and signal it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use rmsched_core::TaskId;

use crate::host::{ContextHandle, HostError};
use crate::runner::core::Core;
use crate::sync::{lock, try_lock};

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    active: bool,
    stopped: bool,
}

/// Wake-up channel into the dispatcher (`IDLE <-> ACTIVE`).
#[derive(Debug, Default)]
pub(crate) struct DispatchSignal {
    state: Mutex<SignalState>,
    wakeup: Condvar,
}

impl DispatchSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue an activation. For client requests, which may wait briefly on
    /// the signal lock. A request that lands while the dispatcher is active
    /// makes it run once more.
    pub(crate) fn notify(&self) {
        lock(&self.state).pending = true;
        self.wakeup.notify_one();
    }

    /// Non-blocking signal for timer callbacks. Fails while the dispatcher is
    /// active or the signal lock is contended; the caller retries later.
    /// After shutdown it reports success so callers stop retrying.
    pub(crate) fn try_notify(&self) -> bool {
        let Some(mut state) = try_lock(&self.state) else {
            return false;
        };
        if state.stopped {
            return true;
        }
        if state.active {
            return false;
        }
        state.pending = true;
        self.wakeup.notify_one();
        true
    }

    pub(crate) fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    pub(crate) fn is_pending(&self) -> bool {
        lock(&self.state).pending
    }

    pub(crate) fn stop(&self) {
        lock(&self.state).stopped = true;
        self.wakeup.notify_all();
    }

    /// Block until an activation is requested, then go `ACTIVE`.
    /// Returns `false` once stopped.
    fn begin(&self) -> bool {
        let mut state = lock(&self.state);
        while !state.pending && !state.stopped {
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.stopped {
            return false;
        }
        state.pending = false;
        state.active = true;
        true
    }

    fn end(&self) {
        lock(&self.state).active = false;
    }

    #[cfg(test)]
    pub(crate) fn set_active(&self, active: bool) {
        lock(&self.state).active = active;
    }
}

pub(crate) struct Dispatcher {
    core: Arc<Core>,
    /// Task this dispatcher last raised to real-time priority.
    promoted: Option<(TaskId, ContextHandle)>,
}

impl Dispatcher {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core, promoted: None }
    }

    /// Dispatcher thread body. Returns only after `DispatchSignal::stop`.
    pub(crate) fn run(mut self) {
        info!("dispatcher started");
        while self.core.signal.begin() {
            if panic::catch_unwind(AssertUnwindSafe(|| self.dispatch_once())).is_err() {
                error!("dispatch activation panicked; dispatcher keeps running");
            }
            self.core.signal.end();
        }
        info!("dispatcher stopped");
    }

    /// One activation: select under the lock, then act on the host.
    pub(crate) fn dispatch_once(&mut self) {
        let switch = lock(&self.core.registry).switch_to_next();

        if let Some(id) = switch.preempted {
            debug!(task = id, "preempted by a shorter-period task");
        }
        let selected = switch.selected.map(|(id, _)| id);

        if let Some((previous, handle)) = self.promoted {
            if selected != Some(previous) {
                self.promoted = None;
                // Deregistered tasks are demoted too; a context that has
                // already exited shows up as `Gone`.
                match self.core.host.demote(handle) {
                    Ok(()) => {}
                    Err(HostError::Gone(_)) => {
                        debug!(task = previous, "context gone before demotion");
                    }
                    Err(e) => warn!(task = previous, "demotion failed: {}", e),
                }
            }
        }

        if !switch.changed {
            return;
        }
        let Some((id, context)) = switch.selected else {
            debug!("no ready task; dispatcher idle");
            return;
        };

        if let Ok(mut m) = self.core.metrics.write() {
            m.record_dispatch();
        }
        let Some(handle) = context else {
            debug!(task = id, "phantom task selected; no context to resume");
            return;
        };
        if !self.core.is_registered(id) {
            debug!(task = id, "selected task deregistered before promotion");
            return;
        }
        debug!(task = id, "promoting");
        if let Err(e) = self.core.host.promote(handle) {
            warn!(task = id, "promotion failed: {}", e);
        }
        self.promoted = Some((id, handle));
    }
}
