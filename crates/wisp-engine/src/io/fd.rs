//! Non-blocking file descriptors that park the calling task
//!
//! [`Async`] puts an fd in non-blocking mode. Operations that would block
//! register with the engine's poller and park the task until the fd is
//! ready, so the carrier keeps running other tasks. Called from a plain
//! thread, they wait in `poll(2)` instead.

use super::poller::Interest;
use crate::scheduler::{park_interruptibly, suspendable_task, EngineShared, ParkOutcome, Task};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Withdraws a task's registration however its park ends, unwinding included.
struct Registration<'a> {
    engine: &'a EngineShared,
    fd: RawFd,
    interest: Interest,
    task: &'a Arc<Task>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.engine
            .poller
            .unregister(self.fd, self.interest, self.task);
    }
}

/// An I/O object whose blocking operations suspend the calling task.
#[derive(Debug)]
pub struct Async<T: AsRawFd> {
    io: T,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    would_block: AtomicU64,
    /// Engines whose pollers have seen this fd
    engines: Mutex<Vec<Weak<EngineShared>>>,
}

impl<T: AsRawFd> Async<T> {
    /// Wrap `io`, switching its fd to non-blocking mode.
    pub fn new(io: T) -> io::Result<Self> {
        set_nonblocking(io.as_raw_fd())?;
        Ok(Self {
            io,
            read_timeout: None,
            write_timeout: None,
            would_block: AtomicU64::new(0),
            engines: Mutex::new(Vec::new()),
        })
    }

    /// The wrapped object
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    /// The wrapped object, mutably. Do not switch it back to blocking mode.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Fail reads that wait longer than `timeout` with `TimedOut`.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Fail writes that wait longer than `timeout` with `TimedOut`.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Current read timeout
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Current write timeout
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// How many times an operation hit `WouldBlock` and had to wait.
    pub fn would_block_count(&self) -> u64 {
        self.would_block.load(Ordering::Relaxed)
    }

    /// Run `op` until it stops returning `WouldBlock`, waiting for
    /// readability in between.
    pub fn read_with<R>(&self, op: impl FnMut(&T) -> io::Result<R>) -> io::Result<R> {
        self.retry(Interest::READABLE, self.read_timeout, op)
    }

    /// Like [`read_with`](Self::read_with), waiting for writability.
    pub fn write_with<R>(&self, op: impl FnMut(&T) -> io::Result<R>) -> io::Result<R> {
        self.retry(Interest::WRITABLE, self.write_timeout, op)
    }

    /// Wait until the fd is readable.
    pub fn readable(&self) -> io::Result<()> {
        let deadline = deadline_after(self.read_timeout);
        self.wait(Interest::READABLE, deadline)
    }

    /// Wait until the fd is writable.
    pub fn writable(&self) -> io::Result<()> {
        let deadline = deadline_after(self.write_timeout);
        self.wait(Interest::WRITABLE, deadline)
    }

    fn retry<R>(
        &self,
        interest: Interest,
        timeout: Option<Duration>,
        mut op: impl FnMut(&T) -> io::Result<R>,
    ) -> io::Result<R> {
        let deadline = deadline_after(timeout);
        loop {
            match op(&self.io) {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.would_block.fetch_add(1, Ordering::Relaxed);
                    self.wait(interest, deadline)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    fn wait(&self, interest: Interest, deadline: Option<Instant>) -> io::Result<()> {
        match suspendable_task() {
            Some(task) => self.wait_task(&task, interest, deadline),
            None => wait_native(self.io.as_raw_fd(), interest, deadline),
        }
    }

    fn wait_task(
        &self,
        task: &Arc<Task>,
        interest: Interest,
        deadline: Option<Instant>,
    ) -> io::Result<()> {
        let Some(engine) = task.engine() else {
            return wait_native(self.io.as_raw_fd(), interest, deadline);
        };
        let fd = self.io.as_raw_fd();
        self.remember(&engine);
        engine.poller.register(fd, interest, task)?;
        let _registration = Registration {
            engine: &engine,
            fd,
            interest,
            task,
        };

        match park_interruptibly(task, deadline) {
            ParkOutcome::Unparked => Ok(()),
            ParkOutcome::TimedOut => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out waiting for readiness",
            )),
            ParkOutcome::Interrupted => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "task interrupted while waiting for readiness",
            )),
        }
    }

    fn remember(&self, engine: &Arc<EngineShared>) {
        let mut engines = self.engines.lock();
        if !engines
            .iter()
            .any(|known| std::ptr::eq(known.as_ptr(), Arc::as_ptr(engine)))
        {
            engines.push(Arc::downgrade(engine));
        }
    }
}

impl<T: AsRawFd> Drop for Async<T> {
    fn drop(&mut self) {
        let fd = self.io.as_raw_fd();
        for engine in self.engines.get_mut().drain(..) {
            if let Some(engine) = engine.upgrade() {
                engine.poller.deregister_fd(fd);
            }
        }
    }
}

impl<T: AsRawFd> AsRawFd for Async<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.io.as_raw_fd()
    }
}

impl<T: AsRawFd + AsFd> AsFd for Async<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.io.as_fd()
    }
}

impl<T> Read for Async<T>
where
    T: AsRawFd,
    for<'a> &'a T: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl<T> Read for &Async<T>
where
    T: AsRawFd,
    for<'a> &'a T: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_with(|mut io| io.read(buf))
    }
}

impl<T> Write for Async<T>
where
    T: AsRawFd,
    for<'a> &'a T: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

impl<T> Write for &Async<T>
where
    T: AsRawFd,
    for<'a> &'a T: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_with(|mut io| io.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_with(|mut io| io.flush())
    }
}

fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

/// Wait with `poll(2)` on a thread that is not running a task.
fn wait_native(fd: RawFd, interest: Interest, deadline: Option<Instant>) -> io::Result<()> {
    let mut events: libc::c_short = 0;
    if interest.contains(Interest::READABLE) {
        events |= libc::POLLIN;
    }
    if interest.contains(Interest::WRITABLE) {
        events |= libc::POLLOUT;
    }
    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out waiting for readiness",
                    ));
                }
                let ms = (deadline - now).as_nanos().div_ceil(1_000_000);
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };
        let mut pollfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if rc > 0 {
            return Ok(());
        }
    }
}
