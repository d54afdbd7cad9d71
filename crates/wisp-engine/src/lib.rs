//! Wisp: an M:N cooperative task scheduler
//!
//! Lightweight stackful tasks are multiplexed over a small pool of carrier
//! threads per [`Engine`]. Carriers keep FIFO run queues and steal from
//! each other when idle. Tasks suspend only at cooperative points: parks,
//! sleeps, yields, readiness waits on [`io`] types, the [`sync`] primitives,
//! and [`checkpoint`] calls where the monitor can force a yield. Code that
//! must block its OS thread runs under [`blocking`], which hands the
//! carrier's queue to another thread for the duration.
//!
//! # Example
//!
//! ```rust,ignore
//! use wisp_engine::{sleep, Runtime, WispConfig};
//! use std::time::Duration;
//!
//! let rt = Runtime::new(WispConfig::default())?;
//! let handle = rt.spawn(|| {
//!     sleep(Duration::from_millis(10)).ok();
//! })?;
//! handle.join();
//!
//! rt.shutdown();
//! rt.await_termination(Duration::from_secs(1));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("wisp-engine supports Linux on x86_64 and aarch64 only");

/// Execution contexts and task stacks
pub mod context;

/// Task scheduler: engines, carriers, tasks and timers
pub mod scheduler;

/// Non-blocking file descriptors and sockets
pub mod io;

/// Thread-conversion rules
pub mod policy;

/// Task-aware locks
pub mod sync;

/// Read-only engine snapshots
pub mod diagnostics;

mod config;
mod error;
mod runtime;

pub use config::{
    HandOffConfig, HandOffPolicy, PreemptConfig, ThreadPolicyConfig, WispConfig,
    DEFAULT_STACK_SIZE, MIN_STACK_SIZE,
};
pub use diagnostics::{CarrierSnapshot, EngineCounters, EngineSnapshot, TaskSnapshot};
pub use error::{ConfigError, PolicyError, WispError, WispResult};
pub use runtime::{Runtime, ThreadHandle};
pub use scheduler::{
    blocking, checkpoint, current, current_task, interrupted, park, park_timeout, sleep,
    yield_now, DefaultThreadFactory, Engine, PanicReport, ParkOutcome, TaskBuilder,
    TaskCancelled, TaskHandle, TaskId, TaskOutcome, TaskState, ThreadFactory, TimerHandle,
    UncaughtHandler,
};
