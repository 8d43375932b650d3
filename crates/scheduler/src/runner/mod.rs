//! Scheduler runner -- owns the registry, the timer runtime and the
//! dispatcher thread.
//!
//! Split into focused submodules:
//! - `core`: shared state reachable from client requests, timers and the dispatcher
//! - `requests`: Register, Yield and Deregister
//! - `release`: the release-timer callback and its postponed retry
//! - `service`: the public `Scheduler` handle and its lifecycle

pub(crate) mod core;
mod release;
mod requests;
mod service;

pub use self::service::Scheduler;
