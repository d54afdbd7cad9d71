//! Task structure, park/unpark protocol and task handles

use super::api::{self, Waiter};
use super::engine::EngineShared;
use super::timer::TimerHandle;
use crate::context::ExecutionContext;
use crate::error::fatal;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TaskState {
    /// Created, not yet queued
    New = 0,
    /// Waiting in a run queue
    Runnable = 1,
    /// Executing on a carrier
    Running = 2,
    /// Suspended until a timer, I/O event or unpark wakes it
    Parked = 3,
    /// Body finished (or was cancelled)
    Terminated = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::New,
            1 => TaskState::Runnable,
            2 => TaskState::Running,
            3 => TaskState::Parked,
            _ => TaskState::Terminated,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::New => "NEW",
            TaskState::Runnable => "RUNNABLE",
            TaskState::Running => "RUNNING",
            TaskState::Parked => "PARKED",
            TaskState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Why a park call returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParkOutcome {
    /// Woken by unpark, I/O readiness, or a stale permit
    Unparked,
    /// The deadline passed
    TimedOut,
    /// The interrupt flag is set
    Interrupted,
}

/// How a task ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Body returned normally
    Completed,
    /// Body panicked; the panic went to the uncaught handler
    Panicked,
    /// Cancelled by pool shutdown
    Cancelled,
    /// Never started because its execution context could not be created
    Failed,
}

/// Unwind payload used to tear down a task cancelled by shutdown.
///
/// Blocking primitives resume the unwind with this value when they notice
/// the cancellation, so destructors on the task stack still run.
#[derive(Debug, Clone, Copy)]
pub struct TaskCancelled;

/// Information handed to an uncaught-panic handler.
#[derive(Debug, Clone)]
pub struct PanicReport {
    /// Task that panicked
    pub task_id: TaskId,
    /// Its name
    pub task_name: String,
    /// Panic message, if it was a string
    pub message: String,
}

impl PanicReport {
    pub(crate) fn new(task: &Task, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        Self {
            task_id: task.id(),
            task_name: task.name().to_string(),
            message,
        }
    }
}

/// Callback for panics escaping a task body.
pub type UncaughtHandler = Arc<dyn Fn(&PanicReport) + Send + Sync>;

pub(crate) type TaskBody = Box<dyn FnOnce() + Send + 'static>;

/// Carrier index meaning "not attached to any carrier"
pub(crate) const NO_CARRIER: usize = usize::MAX;

// Park word layout: generation in the high bits, status in the low three.
const STATUS_MASK: u64 = 0b111;
const GEN_SHIFT: u32 = 3;

/// No park in progress, no permit
const EMPTY: u64 = 0;
/// An unpark arrived while the task was not parked
const NOTIFIED: u64 = 1;
/// The task announced a park but is still on its own stack
const PARKING: u64 = 2;
/// The carrier committed the park; the task is in no queue
const PARKED: u64 = 3;
/// The deadline passed before the carrier committed the park
const TIMED_OUT: u64 = 4;

fn pack(generation: u64, status: u64) -> u64 {
    (generation << GEN_SHIFT) | status
}

fn unpack(word: u64) -> (u64, u64) {
    (word >> GEN_SHIFT, word & STATUS_MASK)
}

/// Result of announcing a park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeginPark {
    /// A pending unpark was consumed; do not suspend
    Notified,
    /// Suspend; timers for this park must carry the generation
    Parking(u64),
}

/// Why a committed (or committing) park ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum WakeReason {
    Unparked = 0,
    TimedOut = 1,
}

/// Options fixed at task creation.
#[derive(Default)]
pub(crate) struct TaskOptions {
    pub(crate) name: Option<String>,
    pub(crate) group: Option<String>,
    pub(crate) uncaught_handler: Option<UncaughtHandler>,
}

/// A lightweight task: one execution context plus scheduling state.
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Display name
    name: String,

    /// Optional resource/quota group label
    group: Option<String>,

    /// Owning pool
    engine: Weak<EngineShared>,

    /// Lifecycle state (TaskState as u8)
    state: AtomicU8,

    /// Park/unpark status word
    park_word: AtomicU64,

    /// Set by whoever ended the last committed park
    wake_reason: AtomicU8,

    /// Cooperative interrupt flag
    interrupted: AtomicBool,

    /// Set by pool shutdown
    cancelled: AtomicBool,

    /// Set by the monitor when the task overran its slice
    preempt_requested: AtomicBool,

    /// Carrier the task last ran on or was queued for
    carrier: AtomicUsize,

    /// When the current run slice started
    run_start: Mutex<Option<Instant>>,

    /// Body, taken when the task first runs
    body: Mutex<Option<TaskBody>>,

    /// Per-task panic handler
    uncaught_handler: Option<UncaughtHandler>,

    /// Stack and registers
    context: ExecutionContext,

    /// Deadline timer of the current park
    park_timer: Mutex<Option<TimerHandle>>,

    /// Whether an I/O registration currently points at this task
    io_registered: AtomicBool,

    /// Set once when the task ends
    outcome: Mutex<Option<TaskOutcome>>,

    /// Completion flag for native-thread joiners
    completed: Mutex<bool>,
    completed_cv: Condvar,

    /// Tasks and threads waiting in join
    joiners: Mutex<Vec<Waiter>>,

    park_count: AtomicU64,
    steal_count: AtomicU64,
    preempt_count: AtomicU64,
    resume_count: AtomicU64,
}

impl Task {
    pub(crate) fn new(engine: Weak<EngineShared>, body: TaskBody, options: TaskOptions) -> Arc<Self> {
        let id = TaskId::new();
        let name = options
            .name
            .unwrap_or_else(|| format!("wisp-task-{}", id.as_u64()));
        Arc::new(Self {
            id,
            name,
            group: options.group,
            engine,
            state: AtomicU8::new(TaskState::New as u8),
            park_word: AtomicU64::new(pack(0, EMPTY)),
            wake_reason: AtomicU8::new(WakeReason::Unparked as u8),
            interrupted: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            preempt_requested: AtomicBool::new(false),
            carrier: AtomicUsize::new(NO_CARRIER),
            run_start: Mutex::new(None),
            body: Mutex::new(Some(body)),
            uncaught_handler: options.uncaught_handler,
            context: ExecutionContext::new(),
            park_timer: Mutex::new(None),
            io_registered: AtomicBool::new(false),
            outcome: Mutex::new(None),
            completed: Mutex::new(false),
            completed_cv: Condvar::new(),
            joiners: Mutex::new(Vec::new()),
            park_count: AtomicU64::new(0),
            steal_count: AtomicU64::new(0),
            preempt_count: AtomicU64::new(0),
            resume_count: AtomicU64::new(0),
        })
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quota group label
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn engine(&self) -> Option<Arc<EngineShared>> {
        self.engine.upgrade()
    }

    pub(crate) fn belongs_to(&self, engine: &EngineShared) -> bool {
        std::ptr::eq(self.engine.as_ptr(), engine)
    }

    pub(crate) fn context(&self) -> &ExecutionContext {
        &self.context
    }

    // ------------------------------------------------------------------------
    // Park / unpark
    // ------------------------------------------------------------------------

    /// Announce a park. Called on the task's own stack.
    pub(crate) fn begin_park(&self) -> BeginPark {
        loop {
            let word = self.park_word.load(Ordering::Acquire);
            let (generation, status) = unpack(word);
            let (next, result) = match status {
                NOTIFIED => (pack(generation, EMPTY), BeginPark::Notified),
                EMPTY => (
                    pack(generation + 1, PARKING),
                    BeginPark::Parking(generation + 1),
                ),
                _ => fatal("task parked while a previous park is still registered"),
            };
            if self
                .park_word
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return result;
            }
        }
    }

    /// Generation of the park in progress.
    pub(crate) fn park_generation(&self) -> u64 {
        unpack(self.park_word.load(Ordering::Acquire)).0
    }

    /// Commit a park after the task's registers are saved.
    ///
    /// Returns the wake reason instead if a wake-up raced with the park; the
    /// caller must then requeue the task itself.
    pub(crate) fn commit_park(&self) -> Result<(), WakeReason> {
        loop {
            let word = self.park_word.load(Ordering::Acquire);
            let (generation, status) = unpack(word);
            let (next, result) = match status {
                PARKING => (pack(generation, PARKED), Ok(())),
                NOTIFIED => (pack(generation, EMPTY), Err(WakeReason::Unparked)),
                TIMED_OUT => (pack(generation, EMPTY), Err(WakeReason::TimedOut)),
                _ => fatal("park committed for a task that is not parking"),
            };
            if self
                .park_word
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if result.is_ok() {
                    self.park_count.fetch_add(1, Ordering::Relaxed);
                }
                return result;
            }
        }
    }

    /// Make the task runnable, or leave a permit for its next park.
    pub fn unpark(self: &Arc<Self>) {
        loop {
            let word = self.park_word.load(Ordering::Acquire);
            let (generation, status) = unpack(word);
            let next = match status {
                EMPTY | PARKING => pack(generation, NOTIFIED),
                PARKED => pack(generation, EMPTY),
                _ => return,
            };
            if self
                .park_word
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if status == PARKED {
                    self.wake(WakeReason::Unparked);
                }
                return;
            }
        }
    }

    /// Deadline expiry for park `generation`. Stale generations are ignored.
    pub(crate) fn timer_wake(self: &Arc<Self>, generation: u64) {
        loop {
            let word = self.park_word.load(Ordering::Acquire);
            let (current, status) = unpack(word);
            if current != generation {
                return;
            }
            let next = match status {
                PARKING => pack(generation, TIMED_OUT),
                PARKED => pack(generation, EMPTY),
                _ => return,
            };
            if self
                .park_word
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if status == PARKED {
                    self.wake(WakeReason::TimedOut);
                }
                return;
            }
        }
    }

    fn wake(self: &Arc<Self>, reason: WakeReason) {
        self.set_wake_reason(reason);
        self.set_state(TaskState::Runnable);
        if let Some(engine) = self.engine() {
            engine.enqueue_woken(self.clone());
        }
    }

    pub(crate) fn set_wake_reason(&self, reason: WakeReason) {
        self.wake_reason.store(reason as u8, Ordering::Release);
    }

    pub(crate) fn wake_reason(&self) -> WakeReason {
        if self.wake_reason.load(Ordering::Acquire) == WakeReason::TimedOut as u8 {
            WakeReason::TimedOut
        } else {
            WakeReason::Unparked
        }
    }

    pub(crate) fn set_park_timer(&self, timer: TimerHandle) {
        *self.park_timer.lock() = Some(timer);
    }

    pub(crate) fn take_park_timer(&self) -> Option<TimerHandle> {
        self.park_timer.lock().take()
    }

    /// Claim the task's single I/O registration. Returns `false` if one is
    /// already outstanding.
    pub(crate) fn claim_io_registration(&self) -> bool {
        !self.io_registered.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn release_io_registration(&self) {
        self.io_registered.store(false, Ordering::Release);
    }

    // ------------------------------------------------------------------------
    // Interruption, cancellation, preemption
    // ------------------------------------------------------------------------

    /// Set the interrupt flag and wake the task if it is parked.
    pub fn interrupt(self: &Arc<Self>) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.unpark();
    }

    /// Whether the interrupt flag is set.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Test-and-clear of the interrupt flag.
    pub fn take_interrupted(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn cancel(self: &Arc<Self>) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.interrupt();
    }

    /// Whether pool shutdown cancelled this task.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Ask the task to yield at its next checkpoint.
    pub(crate) fn request_preempt(&self) {
        self.preempt_requested.store(true, Ordering::Release);
    }

    pub(crate) fn is_preempt_requested(&self) -> bool {
        self.preempt_requested.load(Ordering::Acquire)
    }

    pub(crate) fn take_preempt_request(&self) -> bool {
        self.is_preempt_requested() && self.preempt_requested.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn record_preempt(&self) {
        self.preempt_count.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------------
    // Carrier bookkeeping
    // ------------------------------------------------------------------------

    pub(crate) fn carrier(&self) -> usize {
        self.carrier.load(Ordering::Acquire)
    }

    pub(crate) fn set_carrier(&self, index: usize) {
        self.carrier.store(index, Ordering::Release);
    }

    /// Mark the start of a run slice on `index`; counts a steal if the task
    /// was queued for another carrier.
    pub(crate) fn begin_run(&self, index: usize) {
        let previous = self.carrier.swap(index, Ordering::AcqRel);
        if previous != index && previous != NO_CARRIER {
            self.steal_count.fetch_add(1, Ordering::Relaxed);
        }
        self.preempt_requested.store(false, Ordering::Release);
        *self.run_start.lock() = Some(Instant::now());
        self.resume_count.fetch_add(1, Ordering::Relaxed);
        self.set_state(TaskState::Running);
    }

    pub(crate) fn end_run(&self) {
        *self.run_start.lock() = None;
    }

    /// When the current run slice started, if running.
    pub(crate) fn run_start(&self) -> Option<Instant> {
        *self.run_start.lock()
    }

    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.body.lock().take()
    }

    pub(crate) fn uncaught_handler(&self) -> Option<&UncaughtHandler> {
        self.uncaught_handler.as_ref()
    }

    pub(crate) fn park_count(&self) -> u64 {
        self.park_count.load(Ordering::Relaxed)
    }

    pub(crate) fn steal_count(&self) -> u64 {
        self.steal_count.load(Ordering::Relaxed)
    }

    pub(crate) fn preempt_count(&self) -> u64 {
        self.preempt_count.load(Ordering::Relaxed)
    }

    pub(crate) fn resume_count(&self) -> u64 {
        self.resume_count.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    pub(crate) fn set_outcome(&self, outcome: TaskOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
    }

    /// How the task ended, once it has.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        *self.outcome.lock()
    }

    /// Wake everything blocked in join. Called once, after TERMINATED.
    pub(crate) fn complete(&self) {
        *self.completed.lock() = true;
        self.completed_cv.notify_all();
        let joiners = std::mem::take(&mut *self.joiners.lock());
        for waiter in joiners {
            waiter.wake();
        }
    }

    fn is_complete(&self) -> bool {
        *self.completed.lock()
    }

    /// Register a joiner; returns `false` if the task already completed.
    fn add_joiner(&self, waiter: Waiter) -> bool {
        let mut joiners = self.joiners.lock();
        if self.is_complete() {
            return false;
        }
        joiners.push(waiter);
        true
    }

    /// Withdraw a joiner that gave up waiting.
    fn remove_joiner(&self, waiter: &Waiter) {
        self.joiners.lock().retain(|w| !w.is_same(waiter));
    }

    fn wait_complete_native(&self, deadline: Option<Instant>) -> bool {
        let mut done = self.completed.lock();
        while !*done {
            match deadline {
                Some(deadline) => {
                    if self.completed_cv.wait_until(&mut done, deadline).timed_out() {
                        return *done;
                    }
                }
                None => self.completed_cv.wait(&mut done),
            }
        }
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("carrier", &self.carrier())
            .finish()
    }
}

/// Handle to a dispatched task.
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        Self { task }
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Task name
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Make the task runnable, or leave a permit for its next park.
    pub fn unpark(&self) {
        self.task.unpark();
    }

    /// Set the interrupt flag and wake the task if parked.
    pub fn interrupt(&self) {
        self.task.interrupt();
    }

    /// Whether the interrupt flag is set.
    pub fn is_interrupted(&self) -> bool {
        self.task.is_interrupted()
    }

    /// Whether the task has terminated.
    pub fn is_finished(&self) -> bool {
        self.task.state() == TaskState::Terminated
    }

    /// How the task ended, once it has.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.task.outcome()
    }

    /// Wait for the task to end.
    pub fn join(&self) -> TaskOutcome {
        self.wait(None);
        self.task.outcome().unwrap_or(TaskOutcome::Completed)
    }

    /// Wait up to `timeout`; `None` if the task is still alive.
    pub fn join_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        if self.wait(Some(Instant::now() + timeout)) {
            self.task.outcome()
        } else {
            None
        }
    }

    fn wait(&self, deadline: Option<Instant>) -> bool {
        if api::in_task() {
            if !self.task.add_joiner(Waiter::current()) {
                return true;
            }
            loop {
                if self.task.is_complete() {
                    return true;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    self.task.remove_joiner(&Waiter::current());
                    return self.task.is_complete();
                }
                api::park_until(deadline);
            }
        } else {
            self.task.wait_complete_native(deadline)
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.task.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> Arc<Task> {
        Task::new(Weak::new(), Box::new(|| {}), TaskOptions::default())
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert!(b.as_u64() > a.as_u64());
        assert_eq!(TaskId::from_u64(a.as_u64()), a);
    }

    #[test]
    fn test_default_name_and_state() {
        let task = detached();
        assert_eq!(task.name(), format!("wisp-task-{}", task.id()));
        assert_eq!(task.state(), TaskState::New);
        assert_eq!(task.carrier(), NO_CARRIER);
    }

    #[test]
    fn test_unpark_before_park_leaves_permit() {
        let task = detached();
        task.unpark();
        task.unpark();
        assert_eq!(task.begin_park(), BeginPark::Notified);
        // Permit consumed; the next park really parks
        assert!(matches!(task.begin_park(), BeginPark::Parking(_)));
    }

    #[test]
    fn test_unpark_during_parking_defeats_commit() {
        let task = detached();
        assert!(matches!(task.begin_park(), BeginPark::Parking(_)));
        task.unpark();
        assert_eq!(task.commit_park(), Err(WakeReason::Unparked));
        assert_eq!(task.park_count(), 0);
    }

    #[test]
    fn test_commit_then_unpark_wakes() {
        let task = detached();
        assert!(matches!(task.begin_park(), BeginPark::Parking(_)));
        assert_eq!(task.commit_park(), Ok(()));
        assert_eq!(task.park_count(), 1);
        task.unpark();
        assert_eq!(task.state(), TaskState::Runnable);
        assert_eq!(task.wake_reason(), WakeReason::Unparked);
        // Woken, no permit left over
        assert!(matches!(task.begin_park(), BeginPark::Parking(_)));
    }

    #[test]
    fn test_timer_wake_respects_generation() {
        let task = detached();
        let BeginPark::Parking(first) = task.begin_park() else {
            panic!("expected to park");
        };
        assert_eq!(task.commit_park(), Ok(()));
        task.unpark();

        let BeginPark::Parking(second) = task.begin_park() else {
            panic!("expected to park");
        };
        assert_ne!(first, second);
        task.timer_wake(first);
        assert_eq!(task.commit_park(), Ok(()));
        task.timer_wake(second);
        assert_eq!(task.wake_reason(), WakeReason::TimedOut);
    }

    #[test]
    fn test_timer_before_commit() {
        let task = detached();
        let BeginPark::Parking(generation) = task.begin_park() else {
            panic!("expected to park");
        };
        task.timer_wake(generation);
        assert_eq!(task.commit_park(), Err(WakeReason::TimedOut));
    }

    #[test]
    fn test_interrupt_test_and_clear() {
        let task = detached();
        task.interrupt();
        assert!(task.is_interrupted());
        assert!(task.take_interrupted());
        assert!(!task.take_interrupted());
        // interrupt also left an unpark permit
        assert_eq!(task.begin_park(), BeginPark::Notified);
    }

    #[test]
    fn test_begin_run_counts_steals() {
        let task = detached();
        task.begin_run(0);
        task.begin_run(0);
        assert_eq!(task.steal_count(), 0);
        task.begin_run(1);
        assert_eq!(task.steal_count(), 1);
        assert_eq!(task.resume_count(), 3);
        assert_eq!(task.state(), TaskState::Running);
    }

    #[test]
    fn test_single_io_registration() {
        let task = detached();
        assert!(task.claim_io_registration());
        assert!(!task.claim_io_registration());
        task.release_io_registration();
        assert!(task.claim_io_registration());
    }

    #[test]
    fn test_native_join_after_completion() {
        let task = detached();
        task.set_outcome(TaskOutcome::Completed);
        task.set_state(TaskState::Terminated);
        task.complete();
        let handle = TaskHandle::new(task);
        assert!(handle.is_finished());
        assert_eq!(handle.join(), TaskOutcome::Completed);
        assert_eq!(
            handle.join_timeout(Duration::from_millis(1)),
            Some(TaskOutcome::Completed)
        );
    }

    #[test]
    fn test_native_join_timeout_on_live_task() {
        let handle = TaskHandle::new(detached());
        assert_eq!(handle.join_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_task_join_timeout_withdraws_joiner() {
        use crate::config::WispConfig;
        use crate::scheduler::{park, Engine};

        let engine = Engine::new(WispConfig {
            name: "join-timeout-test".to_string(),
            carrier_count: 1,
            ..WispConfig::default()
        })
        .unwrap();

        let target = engine
            .spawn(|| {
                park();
            })
            .unwrap();
        let watched = target.clone();
        let joiner = engine
            .spawn(move || {
                assert_eq!(watched.join_timeout(Duration::from_millis(10)), None);
            })
            .unwrap();

        assert_eq!(joiner.join(), TaskOutcome::Completed);
        assert!(target.task.joiners.lock().is_empty());

        target.unpark();
        assert_eq!(target.join(), TaskOutcome::Completed);
        engine.shutdown();
        assert!(engine.await_termination(Duration::from_secs(5)));
    }
}
