//! Blocking calls that would otherwise stall a whole carrier
//!
//! A task about to call into something that blocks its OS thread (a
//! syscall, a native library, a std lock) wraps the call in [`blocking`].
//! The thread then gives up its core for the duration:
//!
//! - `force`: the core goes straight to a spare thread
//! - `adaptive`: the core goes to a spare thread right away if recent calls
//!   on this carrier ran long and work is waiting; otherwise it is parked
//!   and the monitor retakes it once the call has run past the threshold
//! - `none`: nothing happens and the carrier blocks with the task
//!
//! When the call returns, the thread takes its core back if nobody retook
//! it. Otherwise the task rejoins the engine through the global queue and
//! the thread becomes a spare.

use super::carrier::Core;
use super::current::{self, with_carrier_thread, SwitchRequest};
use super::engine::EngineShared;
use crate::config::HandOffPolicy;
use crate::error::fatal;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

enum Released {
    HandedOff,
    Parked { index: usize, token: u64 },
}

impl EngineShared {
    fn release_for_blocking(self: &Arc<Self>, core: Box<Core>) -> Released {
        let carrier = &self.carriers[core.index];
        let eager = match self.config.handoff.policy {
            HandOffPolicy::Force => true,
            HandOffPolicy::Adaptive => {
                carrier.blocking_ewma() >= self.config.handoff.threshold()
                    && !carrier.handoff_in_flight.load(Ordering::Acquire)
                    && core.has_pending_work(carrier)
            }
            HandOffPolicy::None => false,
        };

        let core = if eager {
            match self.handoff(core) {
                Ok(()) => return Released::HandedOff,
                Err(core) => core,
            }
        } else {
            core
        };

        let index = core.index;
        let token = self.next_blocking_token();
        self.carriers[index].park_core(token, core);
        Released::Parked { index, token }
    }
}

/// Run `f`, letting other tasks use this carrier while it blocks.
///
/// Outside a task, or with the `none` hand-off policy, this is just `f()`.
/// Inside `f` the task behaves like a plain thread: parking and sleeping
/// block the OS thread. Panics from `f` propagate after the carrier is
/// restored.
pub fn blocking<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let taken = with_carrier_thread(|ct| {
        if ct.engine.config.handoff.policy == HandOffPolicy::None {
            return None;
        }
        let running = ct
            .current
            .try_borrow()
            .map(|task| task.is_some())
            .unwrap_or(false);
        if !running {
            return None;
        }
        let core = ct.core.try_borrow_mut().ok()?.take()?;
        Some((ct.engine.clone(), core))
    })
    .flatten();
    let Some((engine, core)) = taken else {
        return f();
    };

    let home = core.index;
    let released = engine.release_for_blocking(core);
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    engine.carriers[home].record_blocking(started.elapsed());

    let reclaimed = match released {
        Released::HandedOff => None,
        Released::Parked { index, token } => engine.carriers[index].reclaim_core(token),
    };
    match reclaimed {
        Some(core) => {
            if with_carrier_thread(move |ct| *ct.core.borrow_mut() = Some(core)).is_none() {
                fatal("reclaimed a core on a thread that is not a carrier");
            }
        }
        None => {
            trace!(carrier = home, "core was handed off during blocking call; rejoining");
            drop(engine);
            current::suspend(SwitchRequest::Rejoin);
        }
    }

    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WispConfig;
    use crate::scheduler::{Engine, TaskOutcome};
    use std::time::Duration;

    #[test]
    fn test_blocking_outside_task_is_direct() {
        assert_eq!(blocking(|| 41 + 1), 42);
    }

    #[test]
    fn test_blocking_panic_propagates_and_restores_core() {
        let engine = Engine::new(WispConfig {
            name: "handoff-test".to_string(),
            carrier_count: 1,
            ..WispConfig::default()
        })
        .unwrap();

        let handle = engine
            .spawn(|| {
                let caught = std::panic::catch_unwind(|| blocking(|| panic!("inside")));
                assert!(caught.is_err());
                // Still a schedulable task afterwards
                crate::scheduler::yield_now();
                assert_eq!(blocking(|| 7), 7);
            })
            .unwrap();
        assert_eq!(handle.join(), TaskOutcome::Completed);

        engine.shutdown();
        assert!(engine.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_reclaimed_core_returns_to_carrier_thread() {
        let engine = Engine::new(WispConfig {
            name: "reclaim-test".to_string(),
            carrier_count: 1,
            handoff: crate::config::HandOffConfig {
                policy: HandOffPolicy::Adaptive,
                threshold_us: 1_000_000,
                ..Default::default()
            },
            ..WispConfig::default()
        })
        .unwrap();

        let handle = engine
            .spawn(|| {
                assert_eq!(blocking(|| 3), 3);
                let holds_core = with_carrier_thread(|ct| ct.core.borrow().is_some());
                assert_eq!(holds_core, Some(true));
            })
            .unwrap();
        assert_eq!(handle.join(), TaskOutcome::Completed);
        assert_eq!(engine.snapshot().counters.handoffs, 0);

        engine.shutdown();
        assert!(engine.await_termination(Duration::from_secs(5)));
    }
}
