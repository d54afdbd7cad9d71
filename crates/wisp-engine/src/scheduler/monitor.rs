//! Background monitor, one thread per engine
//!
//! Wakes every `preempt.monitor_interval_ms` and
//! - flags tasks that have run past the preemption threshold, so their next
//!   [`checkpoint`](super::checkpoint) yields
//! - retakes cores parked by threads stuck in a blocking call while work is
//!   waiting behind them, and hands them to a spare thread
//! - polls for I/O readiness without blocking when no carrier is polling

use super::engine::{EngineShared, MONITOR_POLLER};
use crate::config::HandOffPolicy;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub(crate) fn monitor_main(engine: Arc<EngineShared>) {
    let interval = Duration::from_millis(engine.config.preempt.monitor_interval_ms.max(1));
    let preempt_threshold = engine
        .config
        .preempt
        .enabled
        .then(|| Duration::from_millis(engine.config.preempt.threshold_ms));
    debug!(engine = %engine.name, ?interval, ?preempt_threshold, "monitor started");

    while !engine.is_terminated() {
        let now = Instant::now();
        if let Some(threshold) = preempt_threshold {
            request_preemption(&engine, now, threshold);
        }
        retake_blocked(&engine, now);
        poll_io(&engine);
        thread::sleep(interval);
    }

    debug!(engine = %engine.name, "monitor stopped");
}

/// Flag running tasks whose slice started at least `threshold` ago.
fn request_preemption(engine: &EngineShared, now: Instant, threshold: Duration) -> usize {
    let mut flagged = 0;
    for carrier in &engine.carriers {
        let Some(task) = carrier.running_task() else {
            continue;
        };
        if task.is_preempt_requested() {
            continue;
        }
        let Some(started) = task.run_start() else {
            continue;
        };
        let elapsed = now.saturating_duration_since(started);
        if elapsed >= threshold {
            task.request_preempt();
            flagged += 1;
            trace!(task = %task.id(), carrier = carrier.index, ?elapsed, "preemption requested");
        }
    }
    flagged
}

/// Hand off the cores of carriers whose thread has been blocked too long.
fn retake_blocked(engine: &Arc<EngineShared>, now: Instant) {
    if engine.config.handoff.policy == HandOffPolicy::None || engine.is_shutdown() {
        return;
    }
    let threshold = engine.config.handoff.threshold();
    for carrier in &engine.carriers {
        let Some(parked) = carrier.take_if_blocked(now, threshold) else {
            continue;
        };
        let blocked_for = now.saturating_duration_since(parked.since);
        match engine.handoff(parked.core) {
            Ok(()) => {
                engine.stats.retakes.fetch_add(1, Ordering::Relaxed);
                debug!(carrier = carrier.index, ?blocked_for, "retook carrier from blocked thread");
            }
            Err(core) => carrier.restore_parked(super::carrier::ParkedCore {
                token: parked.token,
                core,
                since: parked.since,
            }),
        }
    }
}

fn poll_io(engine: &EngineShared) {
    if !engine.try_acquire_poller(MONITOR_POLLER) {
        return;
    }
    let result = engine.poller.wait_for_events(Some(Duration::ZERO));
    engine.release_poller();
    match result {
        Ok(ready) => {
            for task in ready {
                task.unpark();
            }
        }
        Err(err) => trace!(engine = %engine.name, error = %err, "monitor poll failed"),
    }
}
