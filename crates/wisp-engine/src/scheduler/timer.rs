//! Per-carrier timer heap.
//!
//! Entries are ordered by deadline, ties broken by insertion order. The heap
//! itself is only touched by the thread running its carrier; other threads
//! cancel through the shared [`TimerHandle`], which marks the entry so it is
//! skipped when popped. A maintenance pass rebuilds the heap once cancelled
//! entries make up more than half of it.

use super::task::Task;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Heaps smaller than this are never rebuilt
const MAINTENANCE_MIN_LEN: usize = 64;

/// What happens when a timer expires.
pub(crate) enum TimerAction {
    /// Wake a task parked with a deadline, if it is still in the same park
    Wake { task: Arc<Task>, generation: u64 },
    /// Run a callback as a new task
    Dispatch(Box<dyn FnOnce() + Send + 'static>),
}

/// Shared state of one timer entry.
pub(crate) struct TimerSlot<A> {
    cancelled: AtomicBool,
    action: Mutex<Option<A>>,
    heap_cancelled: Arc<AtomicIsize>,
}

impl<A> TimerSlot<A> {
    pub(crate) fn new(action: A, heap_cancelled: Arc<AtomicIsize>) -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            action: Mutex::new(Some(action)),
            heap_cancelled,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self) -> bool;
    fn is_cancelled(&self) -> bool;
}

impl<A: Send> Cancel for TimerSlot<A> {
    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let prevented = self.action.lock().take().is_some();
        if prevented {
            self.heap_cancelled.fetch_add(1, Ordering::Relaxed);
        }
        prevented
    }

    fn is_cancelled(&self) -> bool {
        TimerSlot::is_cancelled(self)
    }
}

/// Handle to a pending timer.
#[derive(Clone)]
pub struct TimerHandle {
    slot: Arc<dyn Cancel>,
}

impl TimerHandle {
    pub(crate) fn new<A: Send + 'static>(slot: Arc<TimerSlot<A>>) -> Self {
        Self { slot }
    }

    /// Cancel the timer. Returns `true` if this call stopped it from firing.
    pub fn cancel(&self) -> bool {
        self.slot.cancel()
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct TimerEntry<A> {
    deadline: Instant,
    seq: u64,
    slot: Arc<TimerSlot<A>>,
}

impl<A> PartialEq for TimerEntry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<A> Eq for TimerEntry<A> {}

impl<A> PartialOrd for TimerEntry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for TimerEntry<A> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of timers owned by one carrier.
pub(crate) struct TimerHeap<A> {
    heap: BinaryHeap<TimerEntry<A>>,
    next_seq: u64,
    cancelled: Arc<AtomicIsize>,
}

impl<A: Send + 'static> TimerHeap<A> {
    /// Create a heap whose cancellations are counted in `cancelled`.
    pub(crate) fn new(cancelled: Arc<AtomicIsize>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            cancelled,
        }
    }

    /// Counter shared with slots created outside the carrier thread.
    pub(crate) fn cancel_counter(&self) -> &Arc<AtomicIsize> {
        &self.cancelled
    }

    /// Add a timer firing at `deadline`.
    pub(crate) fn insert(&mut self, deadline: Instant, action: A) -> TimerHandle {
        let slot = TimerSlot::new(action, self.cancelled.clone());
        self.insert_slot(deadline, slot.clone());
        TimerHandle::new(slot)
    }

    /// Add a slot created by another thread.
    pub(crate) fn insert_slot(&mut self, deadline: Instant, slot: Arc<TimerSlot<A>>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            slot,
        });
    }

    /// Remove and return the actions of every live timer due at `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<A> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };
            match entry.slot.action.lock().take() {
                Some(action) => due.push(action),
                None => {
                    self.cancelled.fetch_sub(1, Ordering::Relaxed);
                }
            };
        }
        self.maintain();
        due
    }

    /// Earliest deadline among live timers.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if !entry.slot.is_cancelled() {
                return Some(entry.deadline);
            }
            self.heap.pop();
            self.cancelled.fetch_sub(1, Ordering::Relaxed);
        }
        None
    }

    /// Entries currently in the heap, cancelled ones included.
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Rebuild the heap without cancelled entries once they dominate it.
    pub(crate) fn maintain(&mut self) {
        let len = self.heap.len();
        if len < MAINTENANCE_MIN_LEN {
            return;
        }
        let cancelled = self.cancelled.load(Ordering::Relaxed).max(0) as usize;
        if cancelled * 2 <= len {
            return;
        }
        self.heap.retain(|entry| !entry.slot.is_cancelled());
        let removed = len - self.heap.len();
        self.cancelled.fetch_sub(removed as isize, Ordering::Relaxed);
        tracing::trace!(removed, remaining = self.heap.len(), "timer heap compacted");
    }

    /// Drop every entry, returning the live actions.
    pub(crate) fn drain(&mut self) -> Vec<A> {
        let mut live = Vec::new();
        for entry in self.heap.drain() {
            if let Some(action) = entry.slot.action.lock().take() {
                live.push(action);
            }
        }
        self.cancelled.store(0, Ordering::Relaxed);
        live
    }
}
