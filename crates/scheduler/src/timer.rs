//! One-shot release timers.
//!
//! Each task owns a [`ReleaseTimer`]. Arming spawns a sleeper on the timer
//! runtime; re-arming replaces whatever was pending. The callback reports
//! whether it wants a short retry ([`FireOutcome::RetryAfter`]), which the
//! timer schedules itself unless the timer was re-armed or cancelled while
//! the callback ran.
//!
//! [`ReleaseTimer::cancel`] is stop-and-join: once it returns no callback is
//! running and none will start.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::sync::lock;

/// What a fired callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Done,
    RetryAfter(Duration),
}

type Callback = dyn Fn() -> FireOutcome + Send + Sync;

struct TimerState {
    /// Bumped on every arm and on cancel; a sleeper whose generation is stale
    /// wakes up and does nothing.
    generation: u64,
    deadline: Option<Instant>,
    pending: Option<JoinHandle<()>>,
    in_flight: bool,
    stopped: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    drained: Condvar,
    runtime: Handle,
    on_fire: Box<Callback>,
}

pub struct ReleaseTimer {
    shared: Arc<TimerShared>,
}

impl std::fmt::Debug for ReleaseTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseTimer")
            .field("deadline", &self.deadline())
            .finish()
    }
}

impl ReleaseTimer {
    pub fn new<F>(runtime: Handle, on_fire: F) -> Self
    where
        F: Fn() -> FireOutcome + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    generation: 0,
                    deadline: None,
                    pending: None,
                    in_flight: false,
                    stopped: false,
                }),
                drained: Condvar::new(),
                runtime,
                on_fire: Box::new(on_fire),
            }),
        }
    }

    /// Fire once at (or just after) `at`, replacing any pending deadline.
    /// No-op after [`cancel`](Self::cancel).
    pub fn arm(&self, at: Instant) {
        let mut state = lock(&self.shared.state);
        if state.stopped {
            return;
        }
        self.shared.schedule(&mut state, at);
    }

    /// The instant the timer is currently armed for, if any.
    pub fn deadline(&self) -> Option<Instant> {
        lock(&self.shared.state).deadline
    }

    /// Stop the timer and wait for an in-flight callback to return.
    ///
    /// Must not be called from inside this timer's own callback.
    pub fn cancel(&self) {
        let mut state = lock(&self.shared.state);
        state.stopped = true;
        state.generation += 1;
        state.deadline = None;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        while state.in_flight {
            state = self
                .shared
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for ReleaseTimer {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        state.stopped = true;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }
}

impl TimerShared {
    fn schedule(self: &Arc<Self>, state: &mut TimerState, at: Instant) {
        state.generation += 1;
        state.deadline = Some(at);
        if let Some(previous) = state.pending.take() {
            previous.abort();
        }
        let generation = state.generation;
        let shared = Arc::clone(self);
        state.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
            shared.fire(generation);
        }));
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        {
            let mut state = lock(&self.state);
            if state.stopped || state.generation != generation {
                return;
            }
            // This sleeper is the pending one; forget it so a retry does not
            // abort the task that is scheduling it.
            state.pending = None;
            state.deadline = None;
            state.in_flight = true;
        }

        let outcome = {
            let _guard = InFlight(self.as_ref());
            (self.on_fire)()
        };

        if let FireOutcome::RetryAfter(delay) = outcome {
            let mut state = lock(&self.state);
            if !state.stopped && state.generation == generation {
                self.schedule(&mut state, Instant::now() + delay);
            }
        }
    }
}

/// Clears `in_flight` on every exit path, including a panicking callback.
struct InFlight<'a>(&'a TimerShared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(&self.0.state).in_flight = false;
        self.0.drained.notify_all();
    }
}
