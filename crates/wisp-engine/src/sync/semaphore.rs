//! FIFO counting semaphore that parks tasks instead of blocking carriers

use crate::scheduler::{park_until, Waiter};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct WaitNode {
    waiter: Waiter,
    granted: AtomicBool,
}

struct State {
    permits: usize,
    queue: VecDeque<Arc<WaitNode>>,
}

/// A counting semaphore.
///
/// Permits are handed out in arrival order: `release` passes its permit
/// straight to the longest waiter, so a late `try_acquire` cannot barge
/// ahead of a parked task. Works from tasks and native threads alike.
pub struct Semaphore {
    state: Mutex<State>,
}

/// Returns a granted permit, or withdraws the node, if the waiter leaves
/// early (timeout or cancellation unwind).
struct Waiting<'a> {
    sem: &'a Semaphore,
    node: Arc<WaitNode>,
    done: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.sem.state.lock();
        if self.node.granted.load(Ordering::Acquire) {
            drop(state);
            self.sem.release();
        } else {
            state.queue.retain(|n| !Arc::ptr_eq(n, &self.node));
        }
    }
}

impl Semaphore {
    /// A semaphore holding `permits` permits.
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Permits currently free
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Tasks and threads waiting for a permit
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Take a permit, waiting as long as it takes.
    pub fn acquire(&self) {
        self.acquire_until(None);
    }

    /// Take a permit if one is free and nobody is queued ahead.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits > 0 && state.queue.is_empty() {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Take a permit, giving up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.acquire_until(Instant::now().checked_add(timeout))
    }

    fn acquire_until(&self, deadline: Option<Instant>) -> bool {
        let node = {
            let mut state = self.state.lock();
            if state.permits > 0 && state.queue.is_empty() {
                state.permits -= 1;
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            let node = Arc::new(WaitNode {
                waiter: Waiter::current(),
                granted: AtomicBool::new(false),
            });
            state.queue.push_back(node.clone());
            node
        };

        let mut waiting = Waiting {
            sem: self,
            node,
            done: false,
        };
        loop {
            if waiting.node.granted.load(Ordering::Acquire) {
                waiting.done = true;
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                // The drop withdraws the node, or hands back a permit granted
                // after the last check
                drop(waiting);
                return false;
            }
            park_until(deadline);
        }
    }

    /// Return a permit, waking the longest waiter if there is one.
    pub fn release(&self) {
        let next = {
            let mut state = self.state.lock();
            match state.queue.pop_front() {
                Some(node) => {
                    node.granted.store(true, Ordering::Release);
                    Some(node)
                }
                None => {
                    state.permits += 1;
                    None
                }
            }
        };
        if let Some(node) = next {
            node.waiter.wake();
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("permits", &state.permits)
            .field("queued", &state.queue.len())
            .finish()
    }
}
