//! epoll-based readiness poller, one per engine.
//!
//! Each file descriptor has at most one waiting reader and one waiting
//! writer. Registrations are one-shot: an event hands the waiting tasks back
//! to the caller of [`Poller::wait_for_events`] and clears their slots; the
//! fd is re-armed only for the direction still waited on. Event data packs a
//! per-registration token with the fd, so events for an fd number that was
//! closed and reused are dropped.
//!
//! An eventfd registered alongside lets other threads cut a blocking wait
//! short.

use crate::error::fatal;
use crate::scheduler::Task;
use bitflags::bitflags;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Events fetched per `epoll_wait`
const EVENT_CAPACITY: usize = 256;

/// Event data of the waker eventfd
const WAKER_DATA: u64 = u64::MAX;

bitflags! {
    /// Readiness a task can wait for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        /// Data to read, a pending accept, or a hang-up
        const READABLE = 0b01;
        /// Room to write, or a completed connect
        const WRITABLE = 0b10;
    }
}

struct FdEntry {
    token: u32,
    reader: Option<Arc<Task>>,
    writer: Option<Arc<Task>>,
    in_epoll: bool,
}

impl FdEntry {
    fn is_waited_on(&self) -> bool {
        self.reader.is_some() || self.writer.is_some()
    }

    fn take_all(&mut self, into: &mut Vec<Arc<Task>>) {
        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.release_io_registration();
            into.push(task);
        }
    }
}

fn pack(token: u32, fd: RawFd) -> u64 {
    ((token as u64) << 32) | (fd as u32 as u64)
}

fn unpack(data: u64) -> (u32, RawFd) {
    ((data >> 32) as u32, data as u32 as RawFd)
}

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Readiness poller shared by the carriers and monitor of one engine.
pub(crate) struct Poller {
    epoll: OwnedFd,
    waker: OwnedFd,
    entries: Mutex<FxHashMap<RawFd, FdEntry>>,
    next_token: AtomicU32,
    events: Mutex<Vec<libc::epoll_event>>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { OwnedFd::from_raw_fd(cvt(libc::epoll_create1(libc::EPOLL_CLOEXEC))?) };
        let waker = unsafe {
            OwnedFd::from_raw_fd(cvt(libc::eventfd(
                0,
                libc::EFD_NONBLOCK | libc::EFD_CLOEXEC,
            ))?)
        };

        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKER_DATA,
        };
        cvt(unsafe {
            libc::epoll_ctl(
                epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                waker.as_raw_fd(),
                &mut event,
            )
        })?;

        Ok(Self {
            epoll,
            waker,
            entries: Mutex::new(FxHashMap::default()),
            next_token: AtomicU32::new(1),
            events: Mutex::new(Vec::with_capacity(EVENT_CAPACITY)),
        })
    }

    /// Wait for `interest` on `fd` on behalf of `task`.
    ///
    /// Fails if a different task already waits on the same direction.
    pub(crate) fn register(&self, fd: RawFd, interest: Interest, task: &Arc<Task>) -> io::Result<()> {
        if !task.claim_io_registration() {
            fatal("task registered for I/O readiness twice");
        }

        let mut entries = self.entries.lock();
        let entry = entries.entry(fd).or_insert_with(|| FdEntry {
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            reader: None,
            writer: None,
            in_epoll: false,
        });

        let busy = |slot: &Option<Arc<Task>>| slot.as_ref().is_some_and(|t| !Arc::ptr_eq(t, task));
        if (interest.contains(Interest::READABLE) && busy(&entry.reader))
            || (interest.contains(Interest::WRITABLE) && busy(&entry.writer))
        {
            task.release_io_registration();
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                format!("another task is already waiting on fd {}", fd),
            ));
        }

        if interest.contains(Interest::READABLE) {
            entry.reader = Some(task.clone());
        }
        if interest.contains(Interest::WRITABLE) {
            entry.writer = Some(task.clone());
        }

        if let Err(err) = self.arm(fd, entry) {
            if interest.contains(Interest::READABLE) {
                entry.reader = None;
            }
            if interest.contains(Interest::WRITABLE) {
                entry.writer = None;
            }
            task.release_io_registration();
            return Err(err);
        }
        Ok(())
    }

    /// Withdraw `task` from `fd` if it is still waiting there.
    pub(crate) fn unregister(&self, fd: RawFd, interest: Interest, task: &Arc<Task>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&fd) {
            let clear = |slot: &mut Option<Arc<Task>>| {
                if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, task)) {
                    *slot = None;
                }
            };
            if interest.contains(Interest::READABLE) {
                clear(&mut entry.reader);
            }
            if interest.contains(Interest::WRITABLE) {
                clear(&mut entry.writer);
            }
        }
        task.release_io_registration();
    }

    /// Forget `fd` entirely, waking anything still waiting on it. Called
    /// before the fd is closed.
    pub(crate) fn deregister_fd(&self, fd: RawFd) {
        let Some(mut entry) = self.entries.lock().remove(&fd) else {
            return;
        };
        if entry.in_epoll {
            let rc = unsafe {
                libc::epoll_ctl(
                    self.epoll.as_raw_fd(),
                    libc::EPOLL_CTL_DEL,
                    fd,
                    std::ptr::null_mut(),
                )
            };
            if rc < 0 {
                trace!(fd, error = %io::Error::last_os_error(), "epoll delete failed");
            }
        }
        let mut woken = Vec::new();
        entry.take_all(&mut woken);
        for task in woken {
            task.unpark();
        }
    }

    fn arm(&self, fd: RawFd, entry: &mut FdEntry) -> io::Result<()> {
        let mut flags = libc::EPOLLONESHOT;
        if entry.reader.is_some() {
            flags |= libc::EPOLLIN | libc::EPOLLRDHUP;
        }
        if entry.writer.is_some() {
            flags |= libc::EPOLLOUT;
        }
        let mut event = libc::epoll_event {
            events: flags as u32,
            u64: pack(entry.token, fd),
        };

        let op = if entry.in_epoll {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        let mut rc = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 && op == libc::EPOLL_CTL_ADD && io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
            rc = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event) };
        }
        cvt(rc)?;
        entry.in_epoll = true;
        Ok(())
    }

    /// Block up to `timeout` (forever if `None`) and return the tasks whose
    /// readiness arrived. The caller unparks them.
    pub(crate) fn wait_for_events(&self, timeout: Option<Duration>) -> io::Result<Vec<Arc<Task>>> {
        let timeout_ms = match timeout {
            None => -1,
            Some(timeout) => {
                let ms = timeout.as_nanos().div_ceil(1_000_000);
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut events = self.events.lock();
        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                EVENT_CAPACITY as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        unsafe { events.set_len(n as usize) };

        let mut ready = Vec::new();
        let mut entries = self.entries.lock();
        for event in events.iter() {
            let data = event.u64;
            let flags = event.events as libc::c_int;
            if data == WAKER_DATA {
                self.drain_waker();
                continue;
            }

            let (token, fd) = unpack(data);
            let Some(entry) = entries.get_mut(&fd) else {
                continue;
            };
            if entry.token != token {
                continue;
            }

            let failed = flags & (libc::EPOLLHUP | libc::EPOLLERR) != 0;
            if failed || flags & (libc::EPOLLIN | libc::EPOLLRDHUP) != 0 {
                if let Some(task) = entry.reader.take() {
                    task.release_io_registration();
                    ready.push(task);
                }
            }
            if failed || flags & libc::EPOLLOUT != 0 {
                if let Some(task) = entry.writer.take() {
                    task.release_io_registration();
                    ready.push(task);
                }
            }

            // One-shot: the other direction needs a fresh arm
            if entry.is_waited_on() {
                if let Err(err) = self.arm(fd, entry) {
                    trace!(fd, error = %err, "re-arm failed; waking waiters");
                    entry.take_all(&mut ready);
                }
            }
        }
        events.clear();
        Ok(ready)
    }

    /// Interrupt a blocking [`wait_for_events`](Self::wait_for_events).
    pub(crate) fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.waker.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wake-up is already pending
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    fn drain_waker(&self) {
        let mut value: u64 = 0;
        unsafe {
            libc::read(
                self.waker.as_raw_fd(),
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// File descriptors with a live entry.
    pub(crate) fn registered_fds(&self) -> usize {
        self.entries.lock().len()
    }
}
