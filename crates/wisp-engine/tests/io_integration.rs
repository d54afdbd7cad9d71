use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wisp_engine::io::{Async, TcpListener, TcpStream};
use wisp_engine::{sleep, yield_now, Engine, TaskOutcome, TaskState, WispConfig};

fn engine(name: &str, carriers: usize) -> Engine {
    Engine::new(WispConfig {
        name: name.to_string(),
        carrier_count: carriers,
        ..WispConfig::default()
    })
    .unwrap()
}

fn finish(engine: Engine) {
    engine.shutdown();
    assert!(engine.await_termination(Duration::from_secs(5)));
}

// ============================================================================
// Readiness waits
// ============================================================================

#[test]
fn test_read_parks_until_data_arrives() {
    let engine = engine("io-read", 1);
    let (a, b) = UnixStream::pair().unwrap();
    let reader = Arc::new(Async::new(a).unwrap());
    let writer = Async::new(b).unwrap();

    let r = reader.clone();
    let read_task = engine
        .spawn(move || {
            let mut buf = [0u8; 5];
            (&*r).read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hello");
        })
        .unwrap();
    let write_task = engine
        .spawn(move || {
            sleep(Duration::from_millis(20)).unwrap();
            (&writer).write_all(b"hello").unwrap();
        })
        .unwrap();

    assert_eq!(read_task.join(), TaskOutcome::Completed);
    assert_eq!(write_task.join(), TaskOutcome::Completed);
    let waits = reader.would_block_count();
    assert!((1..=3).contains(&waits), "would-block count {}", waits);
    finish(engine);
}

#[test]
fn test_blocked_reader_does_not_hold_carrier() {
    let engine = engine("io-carrier", 1);
    let (a, b) = UnixStream::pair().unwrap();
    let reader = Async::new(a).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let read_task = engine
        .spawn(move || {
            let mut buf = [0u8; 1];
            (&reader).read_exact(&mut buf).unwrap();
        })
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while read_task.state() != TaskState::Parked && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ran = ran.clone();
            engine
                .spawn(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join();
    }
    assert_eq!(ran.load(Ordering::SeqCst), 10);

    (&b).write_all(b"x").unwrap();
    assert_eq!(read_task.join(), TaskOutcome::Completed);
    finish(engine);
}

#[test]
fn test_read_timeout_and_interrupt() {
    let engine = engine("io-errors", 2);
    let (a, _keep_a) = UnixStream::pair().unwrap();
    let (c, _keep_c) = UnixStream::pair().unwrap();

    let mut timed = Async::new(a).unwrap();
    timed.set_read_timeout(Some(Duration::from_millis(20)));
    let timeout_task = engine
        .spawn(move || {
            let mut buf = [0u8; 1];
            let err = timed.read(&mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        })
        .unwrap();

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let stuck = Async::new(c).unwrap();
    let interrupt_task = engine
        .spawn(move || {
            let mut buf = [0u8; 1];
            let err = (&stuck).read(&mut buf).unwrap_err();
            flag.store(err.kind() == io::ErrorKind::Interrupted, Ordering::SeqCst);
        })
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while interrupt_task.state() != TaskState::Parked && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    interrupt_task.interrupt();

    assert_eq!(timeout_task.join(), TaskOutcome::Completed);
    assert_eq!(interrupt_task.join(), TaskOutcome::Completed);
    assert!(interrupted.load(Ordering::SeqCst));
    finish(engine);
}

#[test]
fn test_dropping_fd_forgets_registration() {
    let engine = engine("io-drop", 1);
    let (a, b) = UnixStream::pair().unwrap();

    let handle = engine
        .spawn(move || {
            let reader = Async::new(a).unwrap();
            let mut buf = [0u8; 2];
            (&reader).read_exact(&mut buf).unwrap();
            drop(reader);
        })
        .unwrap();
    let writer = engine
        .spawn(move || {
            for chunk in [b"a", b"b"] {
                yield_now();
                sleep(Duration::from_millis(5)).unwrap();
                (&b).write_all(chunk).unwrap();
            }
        })
        .unwrap();

    assert_eq!(handle.join(), TaskOutcome::Completed);
    assert_eq!(writer.join(), TaskOutcome::Completed);
    assert_eq!(engine.snapshot().registered_fds, 0);
    finish(engine);
}

// ============================================================================
// TCP
// ============================================================================

#[test]
fn test_tcp_echo_between_tasks() {
    let engine = engine("tcp-echo", 2);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = engine
        .spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            loop {
                let n = conn.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                conn.write_all(&buf[..n]).unwrap();
            }
        })
        .unwrap();

    let client = engine
        .spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.set_nodelay(true).unwrap();
            for round in 0..5u8 {
                let msg = [round; 16];
                stream.write_all(&msg).unwrap();
                let mut reply = [0u8; 16];
                stream.read_exact(&mut reply).unwrap();
                assert_eq!(reply, msg);
            }
            stream.shutdown(std::net::Shutdown::Write).unwrap();
        })
        .unwrap();

    assert_eq!(client.join(), TaskOutcome::Completed);
    assert_eq!(server.join(), TaskOutcome::Completed);
    finish(engine);
}

#[test]
fn test_many_connections_one_carrier() {
    let engine = engine("tcp-many", 1);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    const CLIENTS: usize = 20;

    let server = engine
        .spawn(move || {
            let engine = wisp_engine::current().unwrap();
            let mut workers = Vec::new();
            for _ in 0..CLIENTS {
                let (mut conn, _) = listener.accept().unwrap();
                workers.push(
                    engine
                        .spawn(move || {
                            let mut byte = [0u8; 1];
                            conn.read_exact(&mut byte).unwrap();
                            conn.write_all(&[byte[0] + 1]).unwrap();
                        })
                        .unwrap(),
                );
            }
            for worker in workers {
                assert_eq!(worker.join(), TaskOutcome::Completed);
            }
        })
        .unwrap();

    let clients: Vec<_> = (0..CLIENTS as u8)
        .map(|i| {
            engine
                .spawn(move || {
                    let mut stream = TcpStream::connect(addr).unwrap();
                    stream.write_all(&[i]).unwrap();
                    let mut reply = [0u8; 1];
                    stream.read_exact(&mut reply).unwrap();
                    assert_eq!(reply[0], i + 1);
                })
                .unwrap()
        })
        .collect();

    for client in clients {
        assert_eq!(client.join(), TaskOutcome::Completed);
    }
    assert_eq!(server.join(), TaskOutcome::Completed);
    finish(engine);
}
