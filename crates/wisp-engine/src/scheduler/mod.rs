//! M:N task scheduler
//!
//! An [`Engine`] owns a fixed set of carriers. Each carrier has a local FIFO
//! queue with a `next` slot for freshly woken tasks, an inbox for pushes
//! from other threads, and a timer heap. Idle carriers steal from each other
//! and from the engine's global queue; one idle carrier at a time blocks in
//! the I/O poller while the rest sleep on their parker.
//!
//! Tasks are stackful: [`park`], [`sleep`], [`yield_now`] and the I/O and
//! sync primitives switch the task out without blocking the OS thread. Code
//! that must block the OS thread goes through [`blocking`], which hands the
//! carrier to another thread for the duration.

mod api;
mod carrier;
mod current;
mod engine;
mod handoff;
mod monitor;
mod task;
mod timer;

pub use api::{checkpoint, current, current_task, interrupted, park, park_timeout, sleep, yield_now};
pub use engine::{DefaultThreadFactory, Engine, TaskBuilder, ThreadFactory};
pub use handoff::blocking;
pub use task::{
    PanicReport, ParkOutcome, TaskCancelled, TaskHandle, TaskId, TaskOutcome, TaskState,
    UncaughtHandler,
};
pub use timer::TimerHandle;

pub(crate) use api::{in_task, park_interruptibly, park_until, suspendable_task, Waiter};
pub(crate) use engine::EngineShared;
pub(crate) use task::Task;
