//! Carriers: the per-slot run queues and the loop that drives them
//!
//! A carrier is split in two. [`CarrierShared`] lives in the engine for its
//! whole life and holds what other threads touch: the steal end of the local
//! queue, an inbox, a timer inbox and the wake-up parker. [`Core`] holds what
//! only the driving thread touches: the owner end of the queue, the `next`
//! slot and the timer heap. A core can move to another OS thread during a
//! hand-off; whichever thread holds it runs the loop in [`run`].

use super::current::{task_entry, CarrierThread, SwitchRequest};
use super::engine::EngineShared;
use super::task::{Task, TaskOutcome, TaskState};
use super::timer::{TimerAction, TimerHandle, TimerHeap, TimerSlot};
use crate::error::WispError;
use crossbeam::queue::SegQueue;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// The global queue is checked first once every this many ticks
const GLOBAL_CHECK_INTERVAL: u64 = 61;

/// Consecutive runs from the `next` slot before the local queue gets a turn
const NEXT_STREAK_LIMIT: u32 = 3;

/// Where a requeued task lands in the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Run next: freshly woken tasks keep their cache warm
    Next,
    /// Back of the queue
    Back,
}

const BUSY: u8 = 0;
const PARKED: u8 = 1;
const POLLING: u8 = 2;

/// Wake-up point for an idle carrier thread.
///
/// The thread either sleeps on the condvar or blocks in the poller; a
/// notifier sets `pending` first and then wakes whichever of the two the
/// thread is in.
pub(crate) struct Parker {
    lock: Mutex<()>,
    cvar: Condvar,
    pending: AtomicBool,
    mode: AtomicU8,
}

impl Parker {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cvar: Condvar::new(),
            pending: AtomicBool::new(false),
            mode: AtomicU8::new(BUSY),
        }
    }

    /// Sleep until notified or `timeout` passes.
    fn park(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        self.mode.store(PARKED, Ordering::SeqCst);
        if !self.pending.swap(false, Ordering::SeqCst) {
            self.cvar.wait_for(&mut guard, timeout);
        }
        self.mode.store(BUSY, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Enter polling mode. Returns `true` if a notification is already
    /// pending, in which case the poll must not block.
    fn begin_poll(&self) -> bool {
        self.mode.store(POLLING, Ordering::SeqCst);
        self.pending.swap(false, Ordering::SeqCst)
    }

    fn end_poll(&self) {
        self.mode.store(BUSY, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Whether the thread is parked or polling.
    pub(crate) fn is_idle(&self) -> bool {
        self.mode.load(Ordering::SeqCst) != BUSY
    }

    /// Notify the thread. `wake_poller` is called if it is blocked in the
    /// poller. Returns `true` if the thread was idle.
    pub(crate) fn unpark(&self, wake_poller: impl FnOnce()) -> bool {
        self.pending.store(true, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            PARKED => {
                let _guard = self.lock.lock();
                self.cvar.notify_one();
                true
            }
            POLLING => {
                wake_poller();
                true
            }
            _ => false,
        }
    }
}

/// A core handed away by a thread entering a blocking call.
pub(crate) struct ParkedCore {
    pub(crate) token: u64,
    pub(crate) core: Box<Core>,
    pub(crate) since: Instant,
}

/// The part of a carrier visible to every thread.
pub(crate) struct CarrierShared {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) stealer: Stealer<Arc<Task>>,
    /// Tasks pushed by threads not driving this carrier
    pub(crate) inbox: Injector<Arc<Task>>,
    timer_inbox: SegQueue<(Instant, Arc<TimerSlot<TimerAction>>)>,
    timer_cancelled: Arc<AtomicIsize>,
    parked_core: Mutex<Option<ParkedCore>>,
    /// A hand-off of this carrier's core is on its way to a spare thread
    pub(crate) handoff_in_flight: AtomicBool,
    /// Moving average of blocking-call durations, in nanoseconds
    blocking_ewma_ns: AtomicU64,
    pub(crate) parker: Parker,
    /// Thread spawn failed at startup; other carriers drain the queues
    pub(crate) offline: AtomicBool,
    /// Task currently resumed on this carrier
    running: Mutex<Option<Arc<Task>>>,
    armed_timers: AtomicUsize,
    tasks_run: AtomicU64,
}

impl CarrierShared {
    /// Create the shared half of carrier `index` along with its core.
    pub(crate) fn new(index: usize, engine_name: &str) -> (Self, Box<Core>) {
        let local = Worker::new_fifo();
        let timer_cancelled = Arc::new(AtomicIsize::new(0));
        let shared = Self {
            index,
            name: format!("{}-carrier-{}", engine_name, index),
            stealer: local.stealer(),
            inbox: Injector::new(),
            timer_inbox: SegQueue::new(),
            timer_cancelled: timer_cancelled.clone(),
            parked_core: Mutex::new(None),
            handoff_in_flight: AtomicBool::new(false),
            blocking_ewma_ns: AtomicU64::new(0),
            parker: Parker::new(),
            offline: AtomicBool::new(false),
            running: Mutex::new(None),
            armed_timers: AtomicUsize::new(0),
            tasks_run: AtomicU64::new(0),
        };
        let core = Box::new(Core {
            index,
            local,
            next: None,
            timers: TimerHeap::new(timer_cancelled),
            tick: 0,
            next_streak: 0,
        });
        (shared, core)
    }

    /// Queue a timer from a thread not driving this carrier.
    pub(crate) fn push_timer(&self, deadline: Instant, action: TimerAction) -> TimerHandle {
        let slot = TimerSlot::new(action, self.timer_cancelled.clone());
        self.timer_inbox.push((deadline, slot.clone()));
        TimerHandle::new(slot)
    }

    /// Tasks waiting in the shared queues of this carrier.
    pub(crate) fn queued(&self) -> usize {
        self.stealer.len() + self.inbox.len()
    }

    pub(crate) fn armed_timers(&self) -> usize {
        self.armed_timers.load(Ordering::Relaxed) + self.timer_inbox.len()
    }

    pub(crate) fn tasks_run(&self) -> u64 {
        self.tasks_run.load(Ordering::Relaxed)
    }

    pub(crate) fn running_task(&self) -> Option<Arc<Task>> {
        self.running.lock().clone()
    }

    fn has_shared_work(&self) -> bool {
        !self.inbox.is_empty() || !self.timer_inbox.is_empty()
    }

    // ------------------------------------------------------------------------
    // Blocking-call bookkeeping
    // ------------------------------------------------------------------------

    pub(crate) fn park_core(&self, token: u64, core: Box<Core>) {
        *self.parked_core.lock() = Some(ParkedCore {
            token,
            core,
            since: Instant::now(),
        });
    }

    /// Put back a core taken by [`take_if_blocked`](Self::take_if_blocked).
    pub(crate) fn restore_parked(&self, parked: ParkedCore) {
        *self.parked_core.lock() = Some(parked);
    }

    /// Take the core back if it is still the one parked under `token`.
    pub(crate) fn reclaim_core(&self, token: u64) -> Option<Box<Core>> {
        let mut slot = self.parked_core.lock();
        if slot.as_ref().is_some_and(|parked| parked.token == token) {
            slot.take().map(|parked| parked.core)
        } else {
            None
        }
    }

    /// Take the parked core if its thread has been blocked for at least
    /// `threshold` while work is waiting.
    pub(crate) fn take_if_blocked(&self, now: Instant, threshold: Duration) -> Option<ParkedCore> {
        let mut slot = self.parked_core.lock();
        let parked = slot.as_ref()?;
        if now.saturating_duration_since(parked.since) < threshold
            || !parked.core.has_pending_work(self)
        {
            return None;
        }
        slot.take()
    }

    /// Whether a thread of this carrier is inside a blocking call.
    pub(crate) fn is_blocking(&self) -> bool {
        self.parked_core.lock().is_some()
    }

    pub(crate) fn record_blocking(&self, elapsed: Duration) {
        let sample = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        let previous = self.blocking_ewma_ns.load(Ordering::Relaxed);
        let next = if previous == 0 {
            sample
        } else {
            previous - previous / 8 + sample / 8
        };
        self.blocking_ewma_ns.store(next, Ordering::Relaxed);
    }

    pub(crate) fn blocking_ewma(&self) -> Duration {
        Duration::from_nanos(self.blocking_ewma_ns.load(Ordering::Relaxed))
    }
}

/// The part of a carrier owned by the thread driving it.
pub(crate) struct Core {
    pub(crate) index: usize,
    local: Worker<Arc<Task>>,
    next: Option<Arc<Task>>,
    pub(crate) timers: TimerHeap<TimerAction>,
    tick: u64,
    next_streak: u32,
}

impl Core {
    pub(crate) fn push(&mut self, task: Arc<Task>, placement: Placement) {
        task.set_carrier(self.index);
        match placement {
            Placement::Next => {
                if let Some(previous) = self.next.replace(task) {
                    self.local.push(previous);
                }
            }
            Placement::Back => self.local.push(task),
        }
    }

    /// Whether anything on this carrier is waiting to run or fire.
    pub(crate) fn has_pending_work(&self, carrier: &CarrierShared) -> bool {
        self.next.is_some()
            || !self.local.is_empty()
            || carrier.has_shared_work()
            || !self.timers.is_empty()
    }

    fn drain_timer_inbox(&mut self, carrier: &CarrierShared) {
        while let Some((deadline, slot)) = carrier.timer_inbox.pop() {
            self.timers.insert_slot(deadline, slot);
        }
    }

    fn pop_local(&mut self) -> Option<Arc<Task>> {
        if self.next_streak < NEXT_STREAK_LIMIT {
            if let Some(task) = self.next.take() {
                self.next_streak += 1;
                return Some(task);
            }
        }
        self.next_streak = 0;
        self.local.pop().or_else(|| self.next.take())
    }

    /// Drop everything still owned by this core. Used once the engine
    /// has terminated.
    fn retire(mut self: Box<Self>, carrier: &CarrierShared) {
        self.drain_timer_inbox(carrier);
        let timers = self.timers.drain().len();
        let mut tasks = usize::from(self.next.take().is_some());
        while self.local.pop().is_some() {
            tasks += 1;
        }
        carrier.armed_timers.store(0, Ordering::Relaxed);
        debug!(carrier = carrier.index, timers, tasks, "carrier core retired");
    }
}

fn steal_retrying(mut attempt: impl FnMut() -> Steal<Arc<Task>>) -> Option<Arc<Task>> {
    loop {
        match attempt() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

/// Pick the next task for `core`.
fn find_work(engine: &EngineShared, carrier: &CarrierShared, core: &mut Core) -> Option<Arc<Task>> {
    core.tick = core.tick.wrapping_add(1);

    // Keep the global queue from starving behind a busy local queue
    if core.tick % GLOBAL_CHECK_INTERVAL == 0 {
        if let Some(task) = steal_retrying(|| engine.global.steal_batch_and_pop(&core.local)) {
            return Some(task);
        }
    }

    if let Some(task) = core.pop_local() {
        return Some(task);
    }
    if let Some(task) = steal_retrying(|| carrier.inbox.steal_batch_and_pop(&core.local)) {
        return Some(task);
    }
    if let Some(task) = steal_retrying(|| engine.global.steal_batch_and_pop(&core.local)) {
        return Some(task);
    }
    steal_from_peers(engine, core)
}

fn steal_from_peers(engine: &EngineShared, core: &mut Core) -> Option<Arc<Task>> {
    let count = engine.carriers.len();
    if count <= 1 {
        return None;
    }

    let start = rand::thread_rng().gen_range(0..count);
    for offset in 0..count {
        let victim = &engine.carriers[(start + offset) % count];
        if victim.index == core.index {
            continue;
        }
        let stolen = steal_retrying(|| victim.stealer.steal_batch_and_pop(&core.local))
            .or_else(|| steal_retrying(|| victim.inbox.steal_batch_and_pop(&core.local)));
        if let Some(task) = stolen {
            engine.stats.steals.fetch_add(1, Ordering::Relaxed);
            trace!(carrier = core.index, victim = victim.index, task = %task.id(), "stole work");
            return Some(task);
        }
    }
    None
}

/// Run `f` on the core held by this thread.
fn with_core<R>(ct: &CarrierThread, f: impl FnOnce(&mut Core) -> R) -> Option<R> {
    let mut slot = ct.core.borrow_mut();
    slot.as_mut().map(|core| f(core))
}

/// Put `task` back on this thread's core, or on the global queue if the
/// thread lost its core.
fn requeue(ct: &CarrierThread, task: Arc<Task>, placement: Placement) {
    task.set_state(TaskState::Runnable);
    let mut slot = ct.core.borrow_mut();
    if let Some(core) = slot.as_mut() {
        core.push(task, placement);
        return;
    }
    drop(slot);
    ct.engine.enqueue_rejoin(task);
}

fn fire_timers(ct: &CarrierThread, carrier: &CarrierShared) {
    let now = Instant::now();
    let due = with_core(ct, |core| {
        core.drain_timer_inbox(carrier);
        let due = core.timers.pop_expired(now);
        carrier
            .armed_timers
            .store(core.timers.len(), Ordering::Relaxed);
        due
    })
    .unwrap_or_default();

    for action in due {
        match action {
            TimerAction::Wake { task, generation } => task.timer_wake(generation),
            TimerAction::Dispatch(body) => ct.engine.dispatch_scheduled(body),
        }
    }
}

/// Resume `task` until it switches back, then act on what it asked for.
fn run_task(ct: &CarrierThread, task: Arc<Task>) {
    let engine = &ct.engine;
    let Some(index) = ct.core_index() else {
        engine.enqueue_rejoin(task);
        return;
    };

    if !task.context().is_started() {
        if task.is_cancelled() {
            engine.finish_task(&task, TaskOutcome::Cancelled);
            return;
        }
        match engine.stacks.acquire(engine.config.stack_size) {
            Ok(stack) => unsafe {
                task.context()
                    .prepare(stack, task_entry, Arc::as_ptr(&task) as usize);
            },
            Err(err) => {
                engine.mark_degraded(WispError::ContextAlloc(err));
                engine.finish_task(&task, TaskOutcome::Failed);
                return;
            }
        }
    }

    let carrier = &engine.carriers[index];
    task.begin_run(index);
    carrier.tasks_run.fetch_add(1, Ordering::Relaxed);
    *carrier.running.lock() = Some(task.clone());
    *ct.current.borrow_mut() = Some(task.clone());

    unsafe { crate::context::resume(&ct.sched, task.context()) };

    ct.current.borrow_mut().take();
    {
        // After a hand-off the slot belongs to whichever thread now drives the core
        let mut running = carrier.running.lock();
        if running.as_ref().is_some_and(|t| Arc::ptr_eq(t, &task)) {
            running.take();
        }
    }
    task.end_run();

    match ct.request.take().unwrap_or(SwitchRequest::Yield) {
        SwitchRequest::Yield => requeue(ct, task, Placement::Back),
        SwitchRequest::Preempted => {
            task.record_preempt();
            engine.stats.preemptions.fetch_add(1, Ordering::Relaxed);
            trace!(task = %task.id(), carrier = index, "task preempted");
            requeue(ct, task, Placement::Back);
        }
        SwitchRequest::Park { deadline } => commit_park(ct, task, deadline),
        SwitchRequest::Rejoin => engine.enqueue_rejoin(task),
        SwitchRequest::Exit => {
            let outcome = task.outcome().unwrap_or(TaskOutcome::Completed);
            engine.finish_task(&task, outcome);
        }
    }
}

/// Second half of a park, run after the task's registers are saved.
fn commit_park(ct: &CarrierThread, task: Arc<Task>, deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        let action = TimerAction::Wake {
            task: task.clone(),
            generation: task.park_generation(),
        };
        // The timer must be visible to the task before the park commits
        let timer = match ct.core.borrow_mut().as_mut() {
            Some(core) => core.timers.insert(deadline, action),
            None => ct.engine.push_remote_timer(task.carrier(), deadline, action),
        };
        task.set_park_timer(timer);
    }

    task.set_state(TaskState::Parked);
    if let Err(reason) = task.commit_park() {
        task.set_wake_reason(reason);
        requeue(ct, task, Placement::Next);
    }
}

/// Exponential backoff after poller failures.
struct PollBackoff {
    delay: Duration,
}

impl PollBackoff {
    const MIN: Duration = Duration::from_millis(1);
    const MAX: Duration = Duration::from_millis(100);

    fn new() -> Self {
        Self { delay: Self::MIN }
    }

    fn reset(&mut self) {
        self.delay = Self::MIN;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(Self::MAX);
        delay
    }
}

/// Nothing to run: poll for I/O if no other carrier is, otherwise sleep until
/// notified or the next timer is due.
fn idle(ct: &CarrierThread, carrier: &CarrierShared, backoff: &mut PollBackoff) {
    let engine = &ct.engine;
    let next_deadline = with_core(ct, |core| core.timers.next_deadline()).flatten();
    let until_timer = next_deadline.map(|d| d.saturating_duration_since(Instant::now()));

    if engine.try_acquire_poller(carrier.index) {
        let max_wait = engine.config.io_poll_max_wait();
        let mut wait = until_timer.map_or(max_wait, |d| d.min(max_wait));
        if carrier.parker.begin_poll() || carrier.has_shared_work() || !engine.global.is_empty() {
            wait = Duration::ZERO;
        }
        let result = engine.poller.wait_for_events(Some(wait));
        carrier.parker.end_poll();
        engine.release_poller();

        match result {
            Ok(ready) => {
                backoff.reset();
                for task in ready {
                    task.unpark();
                }
            }
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(carrier = carrier.index, error = %err, ?delay, "I/O poll failed; backing off");
                thread::sleep(delay);
            }
        }
    } else {
        let idle_park = engine.config.idle_park();
        let wait = until_timer.map_or(idle_park, |d| d.min(idle_park));
        if wait.is_zero() || carrier.has_shared_work() || !engine.global.is_empty() {
            return;
        }
        carrier.parker.park(wait);
    }
}

/// Drive the core held by `ct` until the engine drains or the thread gives
/// the core away.
pub(crate) fn run(ct: &CarrierThread) {
    let engine = &ct.engine;
    let mut backoff = PollBackoff::new();

    loop {
        if engine.is_drained() {
            return;
        }
        let Some(index) = ct.core_index() else {
            return;
        };
        let carrier = &engine.carriers[index];

        fire_timers(ct, carrier);

        match with_core(ct, |core| find_work(engine, carrier, core)) {
            Some(Some(task)) => run_task(ct, task),
            Some(None) => idle(ct, carrier, &mut backoff),
            None => return,
        }
    }
}

/// Body of every engine thread. `initial` is the core of a carrier thread
/// and `None` for a hand-off spare.
pub(crate) fn thread_main(engine: Arc<EngineShared>, initial: Option<Box<Core>>) {
    let ct = CarrierThread::new(engine.clone());
    ct.enter(|| {
        let mut next = initial;
        loop {
            if let Some(core) = next.take() {
                let carrier = &engine.carriers[core.index];
                carrier.handoff_in_flight.store(false, Ordering::Release);
                debug!(carrier = core.index, name = %carrier.name, "driving carrier");
                *ct.core.borrow_mut() = Some(core);
                run(&ct);

                // Still holding the core: the engine drained
                if let Some(core) = ct.core.borrow_mut().take() {
                    let carrier = &engine.carriers[core.index];
                    core.retire(carrier);
                    break;
                }
            }
            match engine.wait_for_core() {
                Some(core) => next = Some(core),
                None => break,
            }
        }
    });
    engine.thread_exited();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    fn detached() -> Arc<Task> {
        Task::new(Weak::new(), Box::new(|| {}), Default::default())
    }

    #[test]
    fn test_next_slot_runs_first_then_yields_to_queue() {
        let (carrier, mut core) = CarrierShared::new(0, "test");
        let queued: Vec<_> = (0..2).map(|_| detached()).collect();
        for task in &queued {
            core.push(task.clone(), Placement::Back);
        }
        let woken = detached();
        core.push(woken.clone(), Placement::Next);

        let first = core.pop_local().unwrap();
        assert!(Arc::ptr_eq(&first, &woken));
        assert_eq!(woken.carrier(), 0);
        assert!(Arc::ptr_eq(&core.pop_local().unwrap(), &queued[0]));
        assert!(Arc::ptr_eq(&core.pop_local().unwrap(), &queued[1]));
        assert!(core.pop_local().is_none());
        assert!(!core.has_pending_work(&carrier));
    }

    #[test]
    fn test_next_slot_displaces_previous() {
        let (_carrier, mut core) = CarrierShared::new(0, "test");
        let a = detached();
        let b = detached();
        core.push(a.clone(), Placement::Next);
        core.push(b.clone(), Placement::Next);
        assert!(Arc::ptr_eq(&core.pop_local().unwrap(), &b));
        assert!(Arc::ptr_eq(&core.pop_local().unwrap(), &a));
    }

    #[test]
    fn test_next_streak_is_bounded() {
        let (_carrier, mut core) = CarrierShared::new(0, "test");
        let waiting = detached();
        core.push(waiting.clone(), Placement::Back);
        for _ in 0..NEXT_STREAK_LIMIT {
            core.push(detached(), Placement::Next);
            assert!(!Arc::ptr_eq(&core.pop_local().unwrap(), &waiting));
        }
        core.push(detached(), Placement::Next);
        assert!(Arc::ptr_eq(&core.pop_local().unwrap(), &waiting));
    }

    #[test]
    fn test_remote_timers_reach_heap() {
        let (carrier, mut core) = CarrierShared::new(0, "test");
        let now = Instant::now();
        let handle = carrier.push_timer(now, TimerAction::Dispatch(Box::new(|| {})));
        assert_eq!(carrier.armed_timers(), 1);
        assert!(core.has_pending_work(&carrier));

        core.drain_timer_inbox(&carrier);
        assert_eq!(core.timers.len(), 1);
        assert!(handle.cancel());
        assert!(core.timers.pop_expired(now).is_empty());
    }

    #[test]
    fn test_parked_core_token() {
        let (carrier, core) = CarrierShared::new(0, "test");
        carrier.park_core(7, core);
        assert!(carrier.is_blocking());
        assert!(carrier.reclaim_core(8).is_none());
        assert!(carrier.reclaim_core(7).is_some());
        assert!(!carrier.is_blocking());
    }

    #[test]
    fn test_take_if_blocked_needs_pending_work() {
        let (carrier, mut core) = CarrierShared::new(0, "test");
        core.push(detached(), Placement::Back);
        carrier.park_core(1, core);
        let later = Instant::now() + Duration::from_secs(1);
        assert!(carrier
            .take_if_blocked(Instant::now(), Duration::from_secs(10))
            .is_none());
        let parked = carrier
            .take_if_blocked(later, Duration::from_millis(1))
            .unwrap();
        assert_eq!(parked.token, 1);
        assert!(carrier.reclaim_core(1).is_none());
    }

    #[test]
    fn test_blocking_ewma() {
        let (carrier, _core) = CarrierShared::new(0, "test");
        carrier.record_blocking(Duration::from_millis(8));
        assert_eq!(carrier.blocking_ewma(), Duration::from_millis(8));
        carrier.record_blocking(Duration::ZERO);
        assert_eq!(carrier.blocking_ewma(), Duration::from_millis(7));
    }

    #[test]
    fn test_parker_pending_notification() {
        let parker = Parker::new();
        assert!(!parker.unpark(|| unreachable!()));
        let started = Instant::now();
        parker.park(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!parker.is_idle());
    }
}
