use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use wisp_engine::{
    park, sleep, DefaultThreadFactory, Engine, Runtime, TaskOutcome, WispConfig, WispError,
};

fn config(name: &str, carriers: usize) -> WispConfig {
    WispConfig {
        name: name.to_string(),
        carrier_count: carriers,
        ..WispConfig::default()
    }
}

/// Decrements the shared counter when the task's stack unwinds.
struct Live(Arc<AtomicUsize>);

impl Live {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Live(counter.clone())
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Draining
// ============================================================================

#[test]
fn test_shutdown_drains_thousand_sleepers() {
    let engine = Engine::new(config("drain", 4)).unwrap();
    let live = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..1000)
        .map(|_| {
            let (live, started) = (live.clone(), started.clone());
            engine
                .spawn(move || {
                    let _guard = Live::new(&live);
                    started.fetch_add(1, Ordering::SeqCst);
                    let _ = sleep(Duration::from_secs(60));
                })
                .unwrap()
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while started.load(Ordering::SeqCst) < 1000 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(started.load(Ordering::SeqCst), 1000);

    let begun = Instant::now();
    engine.shutdown();
    assert!(engine.await_termination(Duration::from_secs(3)));
    assert!(begun.elapsed() < Duration::from_secs(3));

    assert!(engine.is_terminated());
    assert_eq!(engine.live_tasks(), 0);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    for handle in handles {
        assert_eq!(handle.outcome(), Some(TaskOutcome::Cancelled));
    }
}

#[test]
fn test_unstarted_tasks_are_dropped() {
    let engine = Engine::new(config("unstarted", 1)).unwrap();
    let gate = Arc::new(AtomicUsize::new(0));

    // Occupy the only carrier so the rest stay queued
    let g = gate.clone();
    let blocker = engine
        .spawn(move || {
            while g.load(Ordering::SeqCst) == 0 {
                std::hint::spin_loop();
            }
        })
        .unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let queued: Vec<_> = (0..10)
        .map(|_| {
            let ran = ran.clone();
            engine
                .spawn(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        })
        .collect();
    while blocker.state() != wisp_engine::TaskState::Running {
        thread::yield_now();
    }

    engine.shutdown();
    gate.store(1, Ordering::SeqCst);
    assert!(engine.await_termination(Duration::from_secs(5)));

    assert_eq!(blocker.outcome(), Some(TaskOutcome::Completed));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    for handle in queued {
        assert_eq!(handle.outcome(), Some(TaskOutcome::Cancelled));
    }
}

// ============================================================================
// Idempotence and rejection
// ============================================================================

#[test]
fn test_concurrent_shutdown_is_idempotent() {
    let engine = Engine::new(config("idempotent", 2)).unwrap();
    for _ in 0..20 {
        engine
            .dispatch(|| {
                park();
            })
            .unwrap();
    }

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine.shutdown();
                engine.await_termination(Duration::from_secs(5))
            })
        })
        .collect();
    for caller in callers {
        assert!(caller.join().unwrap());
    }
    engine.shutdown();
    assert!(engine.is_terminated());
}

#[test]
fn test_work_rejected_after_shutdown() {
    let engine = Engine::new(config("rejected", 1)).unwrap();
    engine.shutdown();
    assert!(matches!(engine.dispatch(|| {}), Err(WispError::Shutdown(_))));
    assert!(matches!(
        engine.schedule(Duration::from_millis(1), || {}),
        Err(WispError::Shutdown(_))
    ));
    assert!(engine.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_await_termination_times_out_while_task_runs() {
    let engine = Engine::new(config("slow", 1)).unwrap();
    engine
        .dispatch(|| {
            // Cancellation is only seen at suspension points
            thread::sleep(Duration::from_millis(300));
        })
        .unwrap();
    thread::sleep(Duration::from_millis(20));

    engine.shutdown();
    assert!(!engine.await_termination(Duration::from_millis(50)));
    assert!(engine.await_termination(Duration::from_secs(5)));
}

// ============================================================================
// Runtime with several engines
// ============================================================================

#[test]
fn test_runtime_shuts_down_created_engines() {
    let rt = Runtime::new(config("rt-main", 1)).unwrap();
    let named = Arc::new(AtomicUsize::new(0));
    let count = named.clone();
    let factory = move |name: String,
                        body: Box<dyn FnOnce() + Send + 'static>|
          -> std::io::Result<thread::JoinHandle<()>> {
        count.fetch_add(1, Ordering::SeqCst);
        thread::Builder::new().name(name).spawn(body)
    };
    let extra = rt.create_engine("rt-extra", 2, Arc::new(factory)).unwrap();
    assert_eq!(extra.carrier_count(), 2);
    // Two carriers plus the monitor
    assert_eq!(named.load(Ordering::SeqCst), 3);

    let handle = extra
        .spawn(|| {
            let _ = sleep(Duration::from_secs(60));
        })
        .unwrap();
    rt.dispatch(|| {
        let _ = sleep(Duration::from_secs(60));
    })
    .unwrap();

    rt.shutdown();
    assert!(rt.await_termination(Duration::from_secs(5)));
    assert!(extra.is_terminated());
    assert_eq!(handle.outcome(), Some(TaskOutcome::Cancelled));

    let other = Engine::with_factory(
        config("custom-stack", 1),
        Arc::new(DefaultThreadFactory::with_stack_size(512 * 1024)),
    )
    .unwrap();
    other.shutdown();
    assert!(other.await_termination(Duration::from_secs(5)));
}
