//! Per-OS-thread carrier state and the task side of context switching.
//!
//! Every thread owned by an engine installs a [`CarrierThread`] for its
//! lifetime. Tasks reach it through [`with_carrier_thread`], which reads the
//! thread-local slot through a non-inlined call: a task can migrate to
//! another OS thread across any switch, so the slot address must never be
//! cached across one.

use super::carrier::Core;
use super::engine::EngineShared;
use super::task::{PanicReport, Task, TaskCancelled, TaskOutcome};
use crate::context::{self, ExecutionContext};
use crate::error::fatal;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use std::time::Instant;

/// What a task asks of its carrier when it switches out.
pub(crate) enum SwitchRequest {
    /// Requeue at the back of the local queue
    Yield,
    /// Like `Yield`, counted as a preemption
    Preempted,
    /// Commit a park, arming a deadline timer if given
    Park { deadline: Option<Instant> },
    /// This thread lost its core during a blocking call; requeue anywhere
    Rejoin,
    /// The body finished
    Exit,
}

/// State of one engine-owned OS thread.
pub(crate) struct CarrierThread {
    pub(crate) engine: Arc<EngineShared>,
    /// Save area for the thread's own stack while a task runs
    pub(crate) sched: ExecutionContext,
    /// The carrier this thread is currently driving, if any
    pub(crate) core: RefCell<Option<Box<Core>>>,
    /// Task resumed by this thread
    pub(crate) current: RefCell<Option<Arc<Task>>>,
    /// Set by the task right before it switches out
    pub(crate) request: Cell<Option<SwitchRequest>>,
}

thread_local! {
    static CARRIER_THREAD: Cell<*const CarrierThread> = const { Cell::new(ptr::null()) };
}

impl CarrierThread {
    pub(crate) fn new(engine: Arc<EngineShared>) -> Self {
        Self {
            engine,
            sched: ExecutionContext::new(),
            core: RefCell::new(None),
            current: RefCell::new(None),
            request: Cell::new(None),
        }
    }

    /// Run `f` with `self` installed as this thread's carrier state.
    pub(crate) fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Reset;
        impl Drop for Reset {
            fn drop(&mut self) {
                CARRIER_THREAD.with(|slot| slot.set(ptr::null()));
            }
        }

        CARRIER_THREAD.with(|slot| slot.set(self as *const CarrierThread));
        let _reset = Reset;
        f()
    }

    /// Index of the carrier this thread drives.
    pub(crate) fn core_index(&self) -> Option<usize> {
        self.core
            .try_borrow()
            .ok()
            .and_then(|core| core.as_ref().map(|core| core.index))
    }
}

#[inline(never)]
fn carrier_thread_ptr() -> *const CarrierThread {
    CARRIER_THREAD.with(|slot| slot.get())
}

/// Call `f` with this thread's carrier state, if it is an engine thread.
///
/// `f` must not switch contexts.
pub(crate) fn with_carrier_thread<R>(f: impl FnOnce(&CarrierThread) -> R) -> Option<R> {
    let ptr = carrier_thread_ptr();
    if ptr.is_null() {
        None
    } else {
        Some(f(unsafe { &*ptr }))
    }
}

/// The task running on this thread, if any.
pub(crate) fn current_task() -> Option<Arc<Task>> {
    with_carrier_thread(|ct| ct.current.try_borrow().ok().and_then(|t| t.clone())).flatten()
}

/// Switch from the running task back to the carrier loop of this thread.
///
/// Returns when some carrier, possibly on another thread, resumes the task.
#[inline(never)]
pub(crate) fn suspend(request: SwitchRequest) {
    let ptr = carrier_thread_ptr();
    if ptr.is_null() {
        fatal("suspend called outside of a carrier thread");
    }
    let (task_ctx, sched) = {
        let ct = unsafe { &*ptr };
        let current = ct.current.borrow();
        let Some(task) = current.as_ref() else {
            fatal("suspend called with no current task");
        };
        ct.request.set(Some(request));
        (
            task.context() as *const ExecutionContext,
            &ct.sched as *const ExecutionContext,
        )
    };
    // `ptr` and `sched` belong to this thread only until the switch returns
    unsafe { context::suspend(&*task_ctx, &*sched) };
}

/// First function on every task stack.
pub(crate) unsafe extern "C" fn task_entry(arg: usize) -> ! {
    {
        let task = &*(arg as *const Task);
        let outcome = run_body(task);
        task.set_outcome(outcome);
    }
    suspend(SwitchRequest::Exit);
    fatal("terminated task was resumed")
}

fn run_body(task: &Task) -> TaskOutcome {
    let Some(body) = task.take_body() else {
        return TaskOutcome::Completed;
    };
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => TaskOutcome::Completed,
        Err(payload) if payload.is::<TaskCancelled>() => {
            tracing::debug!(task = %task.id(), "task unwound after cancellation");
            TaskOutcome::Cancelled
        }
        Err(payload) => {
            report_uncaught(task, payload);
            TaskOutcome::Panicked
        }
    }
}

fn report_uncaught(task: &Task, payload: Box<dyn Any + Send>) {
    let report = PanicReport::new(task, payload.as_ref());
    let handler = task
        .uncaught_handler()
        .cloned()
        .or_else(|| task.engine().and_then(|engine| engine.default_uncaught_handler()));

    match handler {
        Some(handler) => {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(&report))).is_err() {
                tracing::error!(
                    task = %report.task_id,
                    name = %report.task_name,
                    "uncaught-panic handler panicked; ignoring"
                );
            }
        }
        None => {
            tracing::error!(
                task = %report.task_id,
                name = %report.task_name,
                message = %report.message,
                "task panicked"
            );
        }
    }
    // Payload destructors may panic as well
    let _ = panic::catch_unwind(AssertUnwindSafe(move || drop(payload)));
}

/// Abandon the current task body because its pool is shutting down.
pub(crate) fn unwind_cancelled() -> ! {
    panic::resume_unwind(Box::new(TaskCancelled))
}
