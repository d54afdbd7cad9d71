//! Engine pools: carriers, task registry, dispatch and lifecycle

use super::carrier::{self, CarrierShared, Core, Placement};
use super::current::{self, with_carrier_thread};
use super::handoff;
use super::monitor;
use super::task::{
    PanicReport, Task, TaskBody, TaskHandle, TaskId, TaskOptions, TaskOutcome, TaskState,
    UncaughtHandler, NO_CARRIER,
};
use super::timer::{TimerAction, TimerHandle};
use crate::config::WispConfig;
use crate::context::StackPool;
use crate::error::{WispError, WispResult};
use crate::io::Poller;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam_deque::Injector;
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const TERMINATED: u8 = 2;

/// Nobody holds the poller
const NO_POLLER: usize = usize::MAX;
/// Poller holder id used by the monitor thread
pub(crate) const MONITOR_POLLER: usize = usize::MAX - 1;

/// How often an idle spare thread re-checks for engine termination
const SPARE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Creates the OS threads an engine runs on.
///
/// Called once per carrier at startup, once for the monitor, and again for
/// every spare thread a hand-off needs.
pub trait ThreadFactory: Send + Sync {
    /// Start a thread named `name` running `body`.
    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<JoinHandle<()>>;
}

/// Spawns plain [`std::thread`]s.
#[derive(Debug, Clone, Default)]
pub struct DefaultThreadFactory {
    stack_size: Option<usize>,
}

impl DefaultThreadFactory {
    /// Use `stack_size` bytes for the native stack of every thread.
    pub fn with_stack_size(stack_size: usize) -> Self {
        Self {
            stack_size: Some(stack_size),
        }
    }
}

impl ThreadFactory for DefaultThreadFactory {
    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<JoinHandle<()>> {
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(body)
    }
}

impl<F> ThreadFactory for F
where
    F: Fn(String, Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> + Send + Sync,
{
    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<JoinHandle<()>> {
        self(name, body)
    }
}

/// Engine-wide counters.
#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    pub(crate) dispatched: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) steals: AtomicU64,
    pub(crate) handoffs: AtomicU64,
    pub(crate) retakes: AtomicU64,
    pub(crate) preemptions: AtomicU64,
}

/// State shared by every thread of one engine.
pub(crate) struct EngineShared {
    pub(crate) name: String,
    pub(crate) config: WispConfig,
    pub(crate) carriers: Vec<CarrierShared>,
    /// Tasks that lost their carrier, and overflow from stopped carriers
    pub(crate) global: Injector<Arc<Task>>,
    pub(crate) tasks: RwLock<FxHashMap<TaskId, Arc<Task>>>,
    live: AtomicUsize,
    phase: AtomicU8,
    pub(crate) stacks: StackPool,
    pub(crate) poller: Poller,
    polling: AtomicUsize,
    handoff_tx: Sender<Box<Core>>,
    handoff_rx: Receiver<Box<Core>>,
    idle_spares: AtomicUsize,
    spare_threads: AtomicUsize,
    threads_alive: AtomicUsize,
    terminated: Mutex<bool>,
    terminated_cv: Condvar,
    factory: Arc<dyn ThreadFactory>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_carrier: AtomicUsize,
    blocking_tokens: AtomicU64,
    default_uncaught: RwLock<Option<UncaughtHandler>>,
    degraded: AtomicBool,
    pub(crate) stats: EngineStats,
}

impl EngineShared {
    pub(crate) fn default_uncaught_handler(&self) -> Option<UncaughtHandler> {
        self.default_uncaught.read().clone()
    }

    fn phase(&self) -> u8 {
        self.phase.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.phase() != RUNNING
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.phase() == TERMINATED
    }

    /// Shut down and no live tasks left: threads may exit.
    pub(crate) fn is_drained(&self) -> bool {
        self.is_shutdown() && self.live.load(Ordering::Acquire) == 0
    }

    pub(crate) fn live_tasks(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_degraded(&self, reason: impl fmt::Display) {
        if self.degraded.swap(true, Ordering::Relaxed) {
            debug!(engine = %self.name, %reason, "engine still degraded");
        } else {
            warn!(engine = %self.name, %reason, "engine degraded");
        }
    }

    /// Whether the calling thread belongs to this engine.
    fn is_own_thread(&self) -> bool {
        with_carrier_thread(|ct| std::ptr::eq(Arc::as_ptr(&ct.engine), self)).unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Queueing
    // ------------------------------------------------------------------------

    /// Carrier for new work: the caller's own carrier, else round robin over
    /// the carriers that have a thread.
    fn pick_carrier(&self) -> usize {
        let own = with_carrier_thread(|ct| {
            if std::ptr::eq(Arc::as_ptr(&ct.engine), self) {
                ct.core_index()
            } else {
                None
            }
        })
        .flatten();
        if let Some(index) = own {
            return index;
        }

        let count = self.carriers.len();
        for _ in 0..count {
            let index = self.next_carrier.fetch_add(1, Ordering::Relaxed) % count;
            if !self.carriers[index].offline.load(Ordering::Relaxed) {
                return index;
            }
        }
        0
    }

    /// Queue `task` for the carrier it is attached to, or a chosen one.
    pub(crate) fn enqueue(&self, task: Arc<Task>, placement: Placement) {
        let target = task.carrier();

        // Fast path: this thread drives the target carrier
        let pushed_locally = with_carrier_thread(|ct| {
            if !std::ptr::eq(Arc::as_ptr(&ct.engine), self) {
                return None;
            }
            let mut slot = ct.core.try_borrow_mut().ok()?;
            let core = slot.as_mut()?;
            if target != NO_CARRIER && target != core.index {
                return None;
            }
            core.push(task.clone(), placement);
            Some(core.index)
        })
        .flatten();
        if let Some(index) = pushed_locally {
            self.wake_idle_peer(Some(index));
            return;
        }

        let index = if target < self.carriers.len()
            && !self.carriers[target].offline.load(Ordering::Relaxed)
        {
            target
        } else {
            self.pick_carrier()
        };
        task.set_carrier(index);
        self.carriers[index].inbox.push(task);
        if !self.notify_carrier(index) {
            self.wake_idle_peer(Some(index));
        }
    }

    /// Requeue a task woken from a park.
    pub(crate) fn enqueue_woken(&self, task: Arc<Task>) {
        self.enqueue(task, Placement::Next);
    }

    /// Requeue a task whose thread gave its core away mid-run.
    pub(crate) fn enqueue_rejoin(&self, task: Arc<Task>) {
        task.set_carrier(NO_CARRIER);
        task.set_state(TaskState::Runnable);
        self.global.push(task);
        self.wake_idle_peer(None);
    }

    /// Wake carrier `index` if it is idle. Returns `true` if it was.
    pub(crate) fn notify_carrier(&self, index: usize) -> bool {
        self.carriers[index].parker.unpark(|| self.wake_poller())
    }

    fn wake_idle_peer(&self, except: Option<usize>) {
        for carrier in &self.carriers {
            if Some(carrier.index) == except || carrier.offline.load(Ordering::Relaxed) {
                continue;
            }
            if carrier.parker.is_idle() && self.notify_carrier(carrier.index) {
                return;
            }
        }
    }

    pub(crate) fn wake_all_carriers(&self) {
        for carrier in &self.carriers {
            self.notify_carrier(carrier.index);
        }
    }

    fn wake_poller(&self) {
        if let Err(err) = self.poller.wake() {
            debug!(engine = %self.name, error = %err, "failed to wake poller");
        }
    }

    /// Queue a timer on carrier `index` from any thread.
    pub(crate) fn push_remote_timer(
        &self,
        index: usize,
        deadline: Instant,
        action: TimerAction,
    ) -> TimerHandle {
        let index = if index < self.carriers.len() {
            index
        } else {
            self.pick_carrier()
        };
        let handle = self.carriers[index].push_timer(deadline, action);
        self.notify_carrier(index);
        handle
    }

    pub(crate) fn try_acquire_poller(&self, holder: usize) -> bool {
        self.polling
            .compare_exchange(NO_POLLER, holder, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn release_poller(&self) {
        self.polling.store(NO_POLLER, Ordering::Release);
    }

    // ------------------------------------------------------------------------
    // Task lifecycle
    // ------------------------------------------------------------------------

    /// Register and queue a new task.
    pub(crate) fn submit(self: &Arc<Self>, body: TaskBody, options: TaskOptions) -> WispResult<Arc<Task>> {
        let task = Task::new(Arc::downgrade(self), body, options);
        {
            let mut tasks = self.tasks.write();
            if self.is_shutdown() {
                return Err(WispError::Shutdown(self.name.clone()));
            }
            tasks.insert(task.id(), task.clone());
            self.live.fetch_add(1, Ordering::AcqRel);
        }
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        trace!(engine = %self.name, task = %task.id(), name = %task.name(), "task dispatched");

        task.set_state(TaskState::Runnable);
        self.enqueue(task.clone(), Placement::Back);
        Ok(task)
    }

    /// Run a callback whose timer fired.
    pub(crate) fn dispatch_scheduled(self: &Arc<Self>, body: TaskBody) {
        if let Err(err) = self.submit(body, TaskOptions::default()) {
            debug!(engine = %self.name, error = %err, "scheduled callback dropped");
        }
    }

    /// Retire a task whose body ended or never started.
    pub(crate) fn finish_task(&self, task: &Arc<Task>, outcome: TaskOutcome) {
        if let Some(stack) = task.context().take_stack() {
            self.stacks.release(stack);
        }
        task.set_outcome(outcome);
        task.set_state(TaskState::Terminated);
        self.tasks.write().remove(&task.id());
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        trace!(engine = %self.name, task = %task.id(), ?outcome, "task finished");
        task.complete();

        let remaining = self.live.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.is_shutdown() {
            self.wake_all_carriers();
        }
    }

    /// Stop accepting work and cancel every live task. Idempotent.
    pub(crate) fn shutdown(&self) {
        let tasks: Vec<Arc<Task>> = {
            let tasks = self.tasks.write();
            if self
                .phase
                .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            tasks.values().cloned().collect()
        };
        info!(engine = %self.name, live = tasks.len(), "engine shutting down");
        for task in &tasks {
            task.cancel();
        }
        self.wake_all_carriers();
    }

    fn wait_terminated(&self, deadline: Option<Instant>) -> bool {
        let mut done = self.terminated.lock();
        while !*done {
            match deadline {
                Some(deadline) => {
                    if self.terminated_cv.wait_until(&mut done, deadline).timed_out() {
                        break;
                    }
                }
                None => self.terminated_cv.wait(&mut done),
            }
        }
        *done
    }

    pub(crate) fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let finished = handoff::blocking(|| self.wait_terminated(deadline));
        if finished && !self.is_own_thread() {
            let handles = std::mem::take(&mut *self.handles.lock());
            for handle in handles {
                if handle.join().is_err() {
                    warn!(engine = %self.name, "engine thread panicked");
                }
            }
        }
        finished
    }

    /// Called by every carrier and spare thread on its way out.
    pub(crate) fn thread_exited(&self) {
        let remaining = self.threads_alive.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.is_shutdown() {
            self.phase.store(TERMINATED, Ordering::Release);
            *self.terminated.lock() = true;
            self.terminated_cv.notify_all();
            info!(engine = %self.name, "engine terminated");
        }
    }

    // ------------------------------------------------------------------------
    // Threads and hand-off
    // ------------------------------------------------------------------------

    fn spawn_thread(
        self: &Arc<Self>,
        name: String,
        body: Box<dyn FnOnce() + Send + 'static>,
        counted: bool,
    ) -> WispResult<()> {
        if counted {
            self.threads_alive.fetch_add(1, Ordering::AcqRel);
        }
        match self.factory.spawn(name.clone(), body) {
            Ok(handle) => {
                self.handles.lock().push(handle);
                Ok(())
            }
            Err(source) => {
                if counted {
                    self.threads_alive.fetch_sub(1, Ordering::AcqRel);
                }
                Err(WispError::ThreadSpawn { name, source })
            }
        }
    }

    fn spawn_spare(self: &Arc<Self>) -> WispResult<()> {
        let max = self.config.handoff.max_spare_threads;
        let n = self.spare_threads.fetch_add(1, Ordering::AcqRel);
        if n >= max {
            self.spare_threads.fetch_sub(1, Ordering::AcqRel);
            return Err(WispError::ThreadSpawn {
                name: format!("{}-spare", self.name),
                source: io::Error::other(format!("spare thread limit of {} reached", max)),
            });
        }
        let engine = self.clone();
        let name = format!("{}-spare-{}", self.name, n);
        let result = self.spawn_thread(
            name.clone(),
            Box::new(move || carrier::thread_main(engine, None)),
            true,
        );
        match result {
            Ok(()) => {
                debug!(engine = %self.name, thread = %name, "spare thread started");
                Ok(())
            }
            Err(err) => {
                self.spare_threads.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    /// Pass `core` to another thread so its queue keeps running. Gives the
    /// core back if no thread can take it.
    pub(crate) fn handoff(self: &Arc<Self>, core: Box<Core>) -> Result<(), Box<Core>> {
        if self.idle_spares.load(Ordering::Acquire) == 0 {
            if let Err(err) = self.spawn_spare() {
                self.mark_degraded(format_args!("hand-off unavailable: {}", err));
                return Err(core);
            }
        }
        let index = core.index;
        self.carriers[index]
            .handoff_in_flight
            .store(true, Ordering::Release);
        if let Err(err) = self.handoff_tx.send(core) {
            self.carriers[index]
                .handoff_in_flight
                .store(false, Ordering::Release);
            return Err(err.into_inner());
        }
        self.stats.handoffs.fetch_add(1, Ordering::Relaxed);
        debug!(engine = %self.name, carrier = index, "carrier handed off");
        Ok(())
    }

    /// Block a spare thread until a core is handed to it. `None` once the
    /// engine drains.
    pub(crate) fn wait_for_core(&self) -> Option<Box<Core>> {
        self.idle_spares.fetch_add(1, Ordering::AcqRel);
        let core = loop {
            match self.handoff_rx.recv_timeout(SPARE_POLL_INTERVAL) {
                Ok(core) => break Some(core),
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_drained() {
                        break None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };
        self.idle_spares.fetch_sub(1, Ordering::AcqRel);
        core
    }

    pub(crate) fn next_blocking_token(&self) -> u64 {
        self.blocking_tokens.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn spare_threads(&self) -> usize {
        self.spare_threads.load(Ordering::Relaxed)
    }

    pub(crate) fn idle_spares(&self) -> usize {
        self.idle_spares.load(Ordering::Relaxed)
    }
}

/// A pool of carriers running tasks.
///
/// `Engine` is a cheap handle; clones refer to the same pool. The pool keeps
/// running until [`shutdown`](Engine::shutdown) is called, even if every
/// handle is dropped.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Start an engine with the default thread factory.
    pub fn new(config: WispConfig) -> WispResult<Self> {
        Self::with_factory(config, Arc::new(DefaultThreadFactory::default()))
    }

    /// Start an engine whose threads come from `factory`.
    ///
    /// Carriers whose thread fails to start are taken offline and the engine
    /// runs degraded; it is an error only if none start.
    pub fn with_factory(config: WispConfig, factory: Arc<dyn ThreadFactory>) -> WispResult<Self> {
        config.validate()?;
        let count = config.resolved_carrier_count();
        let name = config.name.clone();

        let (carriers, cores): (Vec<_>, Vec<_>) =
            (0..count).map(|i| CarrierShared::new(i, &name)).unzip();
        let poller = Poller::new().map_err(WispError::Poller)?;
        let (handoff_tx, handoff_rx) = channel::unbounded();

        let shared = Arc::new(EngineShared {
            name: name.clone(),
            stacks: StackPool::new(config.stack_cache_size),
            config,
            carriers,
            global: Injector::new(),
            tasks: RwLock::new(FxHashMap::default()),
            live: AtomicUsize::new(0),
            phase: AtomicU8::new(RUNNING),
            poller,
            polling: AtomicUsize::new(NO_POLLER),
            handoff_tx,
            handoff_rx,
            idle_spares: AtomicUsize::new(0),
            spare_threads: AtomicUsize::new(0),
            threads_alive: AtomicUsize::new(0),
            terminated: Mutex::new(false),
            terminated_cv: Condvar::new(),
            factory,
            handles: Mutex::new(Vec::new()),
            next_carrier: AtomicUsize::new(0),
            blocking_tokens: AtomicU64::new(0),
            default_uncaught: RwLock::new(None),
            degraded: AtomicBool::new(false),
            stats: EngineStats::default(),
        });

        let mut started = 0;
        let mut last_error = None;
        for core in cores {
            let index = core.index;
            let engine = shared.clone();
            let result = shared.spawn_thread(
                shared.carriers[index].name.clone(),
                Box::new(move || carrier::thread_main(engine, Some(core))),
                true,
            );
            match result {
                Ok(()) => started += 1,
                Err(err) => {
                    shared.carriers[index].offline.store(true, Ordering::Relaxed);
                    shared.mark_degraded(&err);
                    last_error = Some(err);
                }
            }
        }

        if started == 0 {
            shared.phase.store(TERMINATED, Ordering::Release);
            *shared.terminated.lock() = true;
            return Err(last_error.unwrap_or_else(|| WispError::ThreadSpawn {
                name: name.clone(),
                source: io::Error::other("no carrier threads"),
            }));
        }

        let engine = shared.clone();
        if let Err(err) = shared.spawn_thread(
            format!("{}-monitor", name),
            Box::new(move || monitor::monitor_main(engine)),
            false,
        ) {
            shared.mark_degraded(format_args!("monitor unavailable: {}", err));
        }

        info!(
            engine = %name,
            carriers = started,
            stack_size = shared.config.stack_size,
            handoff = ?shared.config.handoff.policy,
            "engine started"
        );
        Ok(Self { shared })
    }

    pub(crate) fn from_shared(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// The engine owning the calling task or carrier thread.
    pub fn current() -> Option<Engine> {
        current::current_task()
            .and_then(|task| task.engine())
            .or_else(|| with_carrier_thread(|ct| ct.engine.clone()))
            .map(Self::from_shared)
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Effective configuration
    pub fn config(&self) -> &WispConfig {
        &self.shared.config
    }

    /// Number of carriers, including offline ones
    pub fn carrier_count(&self) -> usize {
        self.shared.carriers.len()
    }

    /// Run `f` as a new task.
    pub fn spawn<F>(&self, f: F) -> WispResult<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .submit(Box::new(f), TaskOptions::default())
            .map(TaskHandle::new)
    }

    /// Run `f` as a new task, discarding the handle.
    pub fn dispatch<F>(&self, f: F) -> WispResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(f).map(drop)
    }

    /// Alias of [`dispatch`](Self::dispatch).
    pub fn execute<F>(&self, f: F) -> WispResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(f)
    }

    /// Run `f` as a new task once `delay` has passed.
    ///
    /// Callbacks still pending at shutdown are dropped.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> WispResult<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.is_shutdown() {
            return Err(WispError::Shutdown(self.shared.name.clone()));
        }
        let now = Instant::now();
        let deadline = now
            .checked_add(delay)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64));
        let index = self.shared.pick_carrier();
        Ok(self
            .shared
            .push_remote_timer(index, deadline, TimerAction::Dispatch(Box::new(f))))
    }

    /// Handler for panics from tasks that have none of their own.
    pub fn set_uncaught_handler<H>(&self, handler: H)
    where
        H: Fn(&PanicReport) + Send + Sync + 'static,
    {
        *self.shared.default_uncaught.write() = Some(Arc::new(handler));
    }

    /// Stop accepting work and cancel every live task.
    ///
    /// Parked tasks are woken and unwind from their blocking call; tasks
    /// that never started are dropped. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Wait until every task has ended and every engine thread has exited.
    ///
    /// Returns `false` on timeout. Threads are joined when called from
    /// outside the engine.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.await_termination(timeout)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Whether every engine thread has exited
    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Tasks dispatched but not yet finished
    pub fn live_tasks(&self) -> usize {
        self.shared.live_tasks()
    }

    /// Whether a thread or stack could not be created at some point
    pub fn is_degraded(&self) -> bool {
        self.shared.is_degraded()
    }
}

impl PartialEq for Engine {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Engine {}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.shared.name)
            .field("carriers", &self.shared.carriers.len())
            .field("live_tasks", &self.shared.live_tasks())
            .field("shutdown", &self.shared.is_shutdown())
            .finish()
    }
}

/// Options for a single task.
#[derive(Default)]
pub struct TaskBuilder {
    options: TaskOptions,
}

impl TaskBuilder {
    /// Builder with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Task name shown in diagnostics
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Resource/quota group label
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.options.group = Some(group.into());
        self
    }

    /// Handler for a panic escaping this task's body
    pub fn uncaught_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&PanicReport) + Send + Sync + 'static,
    {
        self.options.uncaught_handler = Some(Arc::new(handler));
        self
    }

    /// Run `f` on `engine` with these options.
    pub fn spawn_on<F>(self, engine: &Engine, f: F) -> WispResult<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        engine
            .shared
            .submit(Box::new(f), self.options)
            .map(TaskHandle::new)
    }
}

impl fmt::Debug for TaskBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("name", &self.options.name)
            .field("group", &self.options.group)
            .finish()
    }
}
