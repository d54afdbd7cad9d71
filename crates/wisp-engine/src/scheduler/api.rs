//! Blocking primitives callable from task bodies.
//!
//! Every function here also works on a plain OS thread, where it falls back
//! to the std equivalent. A task inside [`blocking`](super::blocking) has
//! handed its carrier away and counts as a plain thread until the call
//! returns.

use super::current::{self, unwind_cancelled, with_carrier_thread, SwitchRequest};
use super::engine::Engine;
use super::task::{BeginPark, ParkOutcome, Task, TaskHandle, WakeReason};
use crate::error::{WispError, WispResult};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

/// Something that can be put to sleep and woken: a task or an OS thread.
pub(crate) enum Waiter {
    Task(Arc<Task>),
    Thread(Thread),
}

impl Waiter {
    /// The caller, as a task if it can suspend, otherwise as its thread.
    pub(crate) fn current() -> Self {
        match suspendable_task() {
            Some(task) => Waiter::Task(task),
            None => Waiter::Thread(thread::current()),
        }
    }

    pub(crate) fn wake(&self) {
        match self {
            Waiter::Task(task) => task.unpark(),
            Waiter::Thread(thread) => thread.unpark(),
        }
    }

    pub(crate) fn is_same(&self, other: &Waiter) -> bool {
        match (self, other) {
            (Waiter::Task(a), Waiter::Task(b)) => Arc::ptr_eq(a, b),
            (Waiter::Thread(a), Waiter::Thread(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

/// The running task, if the thread still drives a carrier so the task can
/// switch out.
pub(crate) fn suspendable_task() -> Option<Arc<Task>> {
    with_carrier_thread(|ct| {
        let has_core = ct
            .core
            .try_borrow()
            .map(|core| core.is_some())
            .unwrap_or(false);
        if !has_core {
            return None;
        }
        ct.current.try_borrow().ok().and_then(|task| task.clone())
    })
    .flatten()
}

/// Whether the caller is a task that can suspend.
pub(crate) fn in_task() -> bool {
    suspendable_task().is_some()
}

fn check_cancelled(task: &Task) {
    // A second unwind started from a destructor would abort the process
    if task.is_cancelled() && !thread::panicking() {
        unwind_cancelled();
    }
}

/// Park ignoring the interrupt flag. Used by joins and the sync primitives,
/// which loop on their own condition.
pub(crate) fn park_until(deadline: Option<Instant>) -> ParkOutcome {
    match suspendable_task() {
        Some(task) => park_task(&task, deadline, false),
        None => park_thread(deadline),
    }
}

/// Park `task`, the caller, honoring its interrupt flag. Used by I/O waits.
pub(crate) fn park_interruptibly(task: &Arc<Task>, deadline: Option<Instant>) -> ParkOutcome {
    park_task(task, deadline, true)
}

fn park_task(task: &Arc<Task>, deadline: Option<Instant>, honor_interrupt: bool) -> ParkOutcome {
    check_cancelled(task);
    if honor_interrupt && task.is_interrupted() {
        return ParkOutcome::Interrupted;
    }
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return ParkOutcome::TimedOut;
    }
    if task.begin_park() == BeginPark::Notified {
        return ParkOutcome::Unparked;
    }

    current::suspend(SwitchRequest::Park { deadline });

    if let Some(timer) = task.take_park_timer() {
        timer.cancel();
    }
    check_cancelled(task);
    if honor_interrupt && task.is_interrupted() {
        return ParkOutcome::Interrupted;
    }
    match task.wake_reason() {
        WakeReason::TimedOut => ParkOutcome::TimedOut,
        WakeReason::Unparked => ParkOutcome::Unparked,
    }
}

fn park_thread(deadline: Option<Instant>) -> ParkOutcome {
    match deadline {
        None => {
            thread::park();
            ParkOutcome::Unparked
        }
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return ParkOutcome::TimedOut;
            }
            thread::park_timeout(deadline - now);
            if Instant::now() >= deadline {
                ParkOutcome::TimedOut
            } else {
                ParkOutcome::Unparked
            }
        }
    }
}

/// Park the current task until it is unparked or interrupted.
///
/// Consumes a pending unpark permit immediately if one is present. May
/// return spuriously; callers re-check their condition. On a native thread
/// this is [`std::thread::park`].
pub fn park() -> ParkOutcome {
    match suspendable_task() {
        Some(task) => park_task(&task, None, true),
        None => park_thread(None),
    }
}

/// Like [`park`], giving up after `timeout`.
pub fn park_timeout(timeout: Duration) -> ParkOutcome {
    let deadline = Instant::now().checked_add(timeout);
    match suspendable_task() {
        Some(task) => park_task(&task, deadline, true),
        None => park_thread(deadline),
    }
}

/// Suspend the current task for `duration` without occupying its carrier.
///
/// Returns `Err(WispError::Interrupted)` if the task is interrupted while
/// asleep, clearing the flag. A zero duration yields instead.
pub fn sleep(duration: Duration) -> WispResult<()> {
    let Some(task) = suspendable_task() else {
        thread::sleep(duration);
        return Ok(());
    };
    if duration.is_zero() {
        yield_now();
        return Ok(());
    }

    let deadline = Instant::now().checked_add(duration);
    loop {
        if task.take_interrupted() {
            return Err(WispError::Interrupted);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }
        park_task(&task, deadline, true);
    }
}

/// Move the current task to the back of its carrier's queue.
pub fn yield_now() {
    match suspendable_task() {
        Some(task) => {
            check_cancelled(&task);
            current::suspend(SwitchRequest::Yield);
            check_cancelled(&task);
        }
        None => thread::yield_now(),
    }
}

/// Cooperative preemption point.
///
/// Yields if the monitor flagged the current task for running past its time
/// slice, and unwinds if the task was cancelled. Cheap enough for hot loops.
pub fn checkpoint() {
    let Some(task) = suspendable_task() else {
        return;
    };
    check_cancelled(&task);
    if task.take_preempt_request() {
        current::suspend(SwitchRequest::Preempted);
        check_cancelled(&task);
    }
}

/// Handle to the running task.
pub fn current_task() -> Option<TaskHandle> {
    current::current_task().map(TaskHandle::new)
}

/// The engine owning the calling task or carrier thread.
pub fn current() -> Option<Engine> {
    Engine::current()
}

/// Test-and-clear of the current task's interrupt flag. Always `false` on a
/// native thread.
pub fn interrupted() -> bool {
    current::current_task().is_some_and(|task| task.take_interrupted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_fallbacks() {
        assert!(!in_task());
        assert!(current_task().is_none());
        assert!(current().is_none());
        assert!(!interrupted());
        assert!(sleep(Duration::from_millis(1)).is_ok());
        yield_now();
        checkpoint();
    }

    #[test]
    fn test_native_park_timeout() {
        let started = Instant::now();
        let outcome = park_until(Some(started + Duration::from_millis(20)));
        // std park may wake spuriously; a timeout is the common case
        if outcome == ParkOutcome::TimedOut {
            assert!(started.elapsed() >= Duration::from_millis(20));
        }
        assert_eq!(park_until(Some(Instant::now())), ParkOutcome::TimedOut);
    }

    #[test]
    fn test_thread_waiter_wakes() {
        let waiter = Waiter::current();
        assert!(waiter.is_same(&Waiter::current()));
        let handle = thread::spawn(move || waiter.wake());
        handle.join().unwrap();
        // The unpark token is consumed by this park
        thread::park_timeout(Duration::from_secs(5));
    }
}
