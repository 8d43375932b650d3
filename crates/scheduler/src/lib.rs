//! Rate-monotonic scheduling core for user-controlled periodic tasks.
//!
//! Clients register as periodic tasks (`period`, `budget`), pass a
//! utilization-based admission test, and then alternate between running and
//! yielding. Per-task release timers mark tasks ready at each period
//! boundary; a single dispatcher thread picks the ready task with the
//! shortest period and promotes it through the [`HostControl`] capability.

pub mod admission;
pub mod clock;
pub mod host;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod runner;
pub mod task;
pub mod timer;

mod dispatcher;
mod sync;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use host::{ContextHandle, HostControl, HostError, PriorityClass, ThreadHost};
pub use metrics::SchedulerMetrics;
pub use protocol::{Command, ParseError, Response};
pub use runner::Scheduler;
pub use task::{TaskInfo, TaskSnapshot, TaskStatus};

pub use rmsched_core::{Result, SchedError, SchedulerConfig, TaskId};
