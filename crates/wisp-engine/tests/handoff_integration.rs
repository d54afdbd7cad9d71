use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wisp_engine::{
    blocking, checkpoint, park_timeout, sleep, Engine, HandOffConfig, HandOffPolicy,
    ParkOutcome, PreemptConfig, TaskOutcome, WispConfig,
};

fn engine(name: &str, policy: HandOffPolicy, threshold_us: u64) -> Engine {
    Engine::new(WispConfig {
        name: name.to_string(),
        carrier_count: 1,
        handoff: HandOffConfig {
            policy,
            threshold_us,
            ..HandOffConfig::default()
        },
        ..WispConfig::default()
    })
    .unwrap()
}

fn finish(engine: Engine) {
    engine.shutdown();
    assert!(engine.await_termination(Duration::from_secs(5)));
}

/// Ten sleepers and one long blocking call on a single carrier. Returns how
/// long the slowest sleeper took.
fn sleepers_beside_blocker(engine: &Engine, nap: Duration, block: Duration) -> Duration {
    let started = Instant::now();
    let finished = Arc::new(Mutex::new(Vec::new()));

    let sleepers: Vec<_> = (0..10)
        .map(|_| {
            let finished = finished.clone();
            engine
                .spawn(move || {
                    sleep(nap).unwrap();
                    finished.lock().push(started.elapsed());
                })
                .unwrap()
        })
        .collect();
    let blocker = engine
        .spawn(move || {
            let value = blocking(|| {
                std::thread::sleep(block);
                7
            });
            assert_eq!(value, 7);
        })
        .unwrap();

    for sleeper in sleepers {
        assert_eq!(sleeper.join(), TaskOutcome::Completed);
    }
    assert_eq!(blocker.join(), TaskOutcome::Completed);

    let finished = finished.lock();
    assert_eq!(finished.len(), 10);
    finished.iter().copied().max().unwrap_or_default()
}

// ============================================================================
// Policies
// ============================================================================

#[test]
fn test_force_handoff_keeps_queue_running() {
    let engine = engine("force", HandOffPolicy::Force, 2_000);
    let slowest = sleepers_beside_blocker(
        &engine,
        Duration::from_millis(100),
        Duration::from_millis(1500),
    );
    assert!(slowest < Duration::from_millis(1000), "slowest sleeper took {:?}", slowest);

    let snap = engine.snapshot();
    assert!(snap.counters.handoffs >= 1);
    assert!(snap.spare_threads >= 1);
    finish(engine);
}

#[test]
fn test_adaptive_retake_keeps_queue_running() {
    let engine = engine("adaptive", HandOffPolicy::Adaptive, 1_000);
    let slowest = sleepers_beside_blocker(
        &engine,
        Duration::from_millis(100),
        Duration::from_millis(1500),
    );
    assert!(slowest < Duration::from_millis(1000), "slowest sleeper took {:?}", slowest);
    assert!(engine.snapshot().counters.retakes >= 1);
    finish(engine);
}

#[test]
#[ignore = "takes five seconds"]
fn test_force_handoff_full_size() {
    let engine = engine("force-full", HandOffPolicy::Force, 2_000);
    let slowest = sleepers_beside_blocker(&engine, Duration::from_secs(1), Duration::from_secs(5));
    assert!(slowest < Duration::from_millis(1200), "slowest sleeper took {:?}", slowest);
    finish(engine);
}

#[test]
fn test_no_handoff_blocks_the_carrier() {
    let engine = engine("none", HandOffPolicy::None, 2_000);
    let slowest = sleepers_beside_blocker(
        &engine,
        Duration::from_millis(20),
        Duration::from_millis(300),
    );
    // Whoever had not fired before the block started waits it out
    assert!(slowest >= Duration::from_millis(20));
    assert_eq!(engine.snapshot().counters.handoffs, 0);
    finish(engine);
}

// ============================================================================
// Inside a blocking section
// ============================================================================

#[test]
fn test_short_blocking_calls_reclaim_core() {
    let engine = engine("short", HandOffPolicy::Adaptive, 50_000);
    let handle = engine
        .spawn(|| {
            for i in 0..100 {
                assert_eq!(blocking(|| i * 2), i * 2);
            }
        })
        .unwrap();
    assert_eq!(handle.join(), TaskOutcome::Completed);
    assert_eq!(engine.snapshot().counters.handoffs, 0);
    finish(engine);
}

#[test]
fn test_park_inside_blocking_uses_thread() {
    let engine = engine("inner-park", HandOffPolicy::Force, 2_000);
    let handle = engine
        .spawn(|| {
            let outcome = blocking(|| park_timeout(Duration::from_millis(10)));
            assert_eq!(outcome, ParkOutcome::TimedOut);
            // Back on a carrier afterwards
            assert_eq!(park_timeout(Duration::from_millis(5)), ParkOutcome::TimedOut);
        })
        .unwrap();
    assert_eq!(handle.join(), TaskOutcome::Completed);
    finish(engine);
}

// ============================================================================
// After a hand-off
// ============================================================================

#[test]
fn test_spare_thread_task_still_preempted_after_blocker_returns() {
    let engine = Engine::new(WispConfig {
        name: "handoff-preempt".to_string(),
        carrier_count: 1,
        handoff: HandOffConfig {
            policy: HandOffPolicy::Force,
            ..HandOffConfig::default()
        },
        preempt: PreemptConfig {
            enabled: true,
            threshold_ms: 5,
            monitor_interval_ms: 1,
        },
        ..WispConfig::default()
    })
    .unwrap();

    let returned = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));

    let flag = returned.clone();
    let blocker = engine
        .spawn(move || {
            blocking(|| std::thread::sleep(Duration::from_millis(100)));
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
    let s = stop.clone();
    let spinner = engine
        .spawn(move || {
            while !s.load(Ordering::SeqCst) {
                checkpoint();
            }
        })
        .unwrap();

    // The blocker's thread has given up the core and is waiting to rejoin
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.snapshot().counters.handoffs == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(200));

    // Only runs if the spinner on the spare thread is still preempted
    let s = stop.clone();
    let stopper = engine.spawn(move || s.store(true, Ordering::SeqCst)).unwrap();
    assert_eq!(
        stopper.join_timeout(Duration::from_secs(3)),
        Some(TaskOutcome::Completed)
    );
    assert_eq!(spinner.join(), TaskOutcome::Completed);
    assert_eq!(blocker.join(), TaskOutcome::Completed);
    assert!(returned.load(Ordering::SeqCst));
    finish(engine);
}
