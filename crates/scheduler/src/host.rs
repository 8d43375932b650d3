//! Host execution-context capability.
//!
//! The scheduling core never touches an OS scheduler directly. It resolves a
//! client pid to an opaque [`ContextHandle`] and asks the host to change the
//! context's priority class, wake it, or suspend it. [`ThreadHost`] is the
//! in-process implementation where every client is a thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rmsched_core::TaskId;

use crate::sync::lock;

/// Highest fixed real-time priority level (matches `SCHED_FIFO`'s range).
pub const MAX_RT_LEVEL: u8 = 99;

/// Opaque reference to a host execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextHandle(pub u64);

/// Scheduling class requested from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityClass {
    /// Ordinary time-sharing class.
    Normal,
    /// Fixed-priority real-time class at the given level.
    RealTime(u8),
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("execution context {0:?} no longer exists")]
    Gone(ContextHandle),

    #[error("priority change rejected for {handle:?}: {reason}")]
    Priority { handle: ContextHandle, reason: String },
}

/// Primitives the scheduler needs from its host.
///
/// Only the dispatcher calls [`promote`](HostControl::promote) and
/// [`demote`](HostControl::demote). [`suspend`](HostControl::suspend) is
/// called on the yielding client's own thread and may block until
/// [`wake`](HostControl::wake).
pub trait HostControl: Send + Sync {
    /// Resolve a pid to its execution context.
    fn lookup(&self, pid: TaskId) -> Option<ContextHandle>;

    fn set_priority_class(&self, handle: ContextHandle, class: PriorityClass) -> Result<(), HostError>;

    /// Discard wake-ups delivered before the caller's next `suspend`.
    fn prepare_suspend(&self, _handle: ContextHandle) {}

    fn wake(&self, handle: ContextHandle) -> Result<(), HostError>;

    fn suspend(&self, handle: ContextHandle) -> Result<(), HostError>;

    /// Resume a context at the highest real-time priority.
    fn promote(&self, handle: ContextHandle) -> Result<(), HostError> {
        self.wake(handle)?;
        self.set_priority_class(handle, PriorityClass::RealTime(MAX_RT_LEVEL))
    }

    /// Drop a context back to the normal class.
    fn demote(&self, handle: ContextHandle) -> Result<(), HostError> {
        self.set_priority_class(handle, PriorityClass::Normal)
    }
}

// ── ThreadHost ────────────────────────────────────────────────

#[derive(Debug)]
struct Gate {
    /// A wake-up that has not been consumed by `suspend` yet.
    permit: bool,
    class: PriorityClass,
    detached: bool,
}

#[derive(Debug)]
struct Context {
    gate: Mutex<Gate>,
    woken: Condvar,
}

#[derive(Debug, Default)]
struct Contexts {
    by_pid: HashMap<TaskId, ContextHandle>,
    by_handle: HashMap<ContextHandle, Arc<Context>>,
}

/// In-process host where each client is a thread that attaches itself under
/// a pid before registering.
///
/// Suspension is real (the yielding thread blocks on a condvar until woken).
/// Priority classes are recorded, not enforced: a demoted thread keeps
/// running on the CPU, so preemption here is logical only.
#[derive(Debug, Default)]
pub struct ThreadHost {
    contexts: Mutex<Contexts>,
    next_handle: AtomicU64,
}

impl ThreadHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the calling client resolvable under `pid`.
    pub fn attach(&self, pid: TaskId) -> ContextHandle {
        let handle = ContextHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let context = Arc::new(Context {
            gate: Mutex::new(Gate {
                permit: false,
                class: PriorityClass::Normal,
                detached: false,
            }),
            woken: Condvar::new(),
        });
        let mut contexts = lock(&self.contexts);
        if let Some(old) = contexts.by_pid.insert(pid, handle) {
            contexts.by_handle.remove(&old);
        }
        contexts.by_handle.insert(handle, context);
        handle
    }

    /// Forget `pid`. A thread still suspended on it is released.
    pub fn detach(&self, pid: TaskId) {
        let context = {
            let mut contexts = lock(&self.contexts);
            contexts
                .by_pid
                .remove(&pid)
                .and_then(|handle| contexts.by_handle.remove(&handle))
        };
        if let Some(context) = context {
            lock(&context.gate).detached = true;
            context.woken.notify_all();
        }
    }

    /// Priority class last set on `handle`.
    pub fn class_of(&self, handle: ContextHandle) -> Option<PriorityClass> {
        self.context(handle).map(|c| lock(&c.gate).class)
    }

    fn context(&self, handle: ContextHandle) -> Option<Arc<Context>> {
        lock(&self.contexts).by_handle.get(&handle).cloned()
    }
}

impl HostControl for ThreadHost {
    fn lookup(&self, pid: TaskId) -> Option<ContextHandle> {
        lock(&self.contexts).by_pid.get(&pid).copied()
    }

    fn set_priority_class(&self, handle: ContextHandle, class: PriorityClass) -> Result<(), HostError> {
        let context = self.context(handle).ok_or(HostError::Gone(handle))?;
        lock(&context.gate).class = class;
        Ok(())
    }

    fn prepare_suspend(&self, handle: ContextHandle) {
        if let Some(context) = self.context(handle) {
            lock(&context.gate).permit = false;
        }
    }

    fn wake(&self, handle: ContextHandle) -> Result<(), HostError> {
        let context = self.context(handle).ok_or(HostError::Gone(handle))?;
        lock(&context.gate).permit = true;
        context.woken.notify_all();
        Ok(())
    }

    fn suspend(&self, handle: ContextHandle) -> Result<(), HostError> {
        let context = self.context(handle).ok_or(HostError::Gone(handle))?;
        let mut gate = lock(&context.gate);
        while !gate.permit && !gate.detached {
            gate = context
                .woken
                .wait(gate)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        gate.permit = false;
        Ok(())
    }
}
