//! Execution contexts: a stack plus saved registers.
//!
//! A context is created empty, given a stack and an entry point before its
//! first run, and then moved between "running" and "suspended" only through
//! [`resume`] and [`suspend`]. `resume` claims the target with an atomic
//! flag, so a context can never be entered by two carriers at once; a second
//! claim is treated as scheduler corruption and aborts.

mod arch;
mod stack;

pub use self::arch::EntryFn;
pub use self::stack::{Stack, StackPool};

pub(crate) use self::stack::page_size;

use crate::error::fatal;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// A suspendable call stack.
pub struct ExecutionContext {
    regs: UnsafeCell<arch::Registers>,
    stack: UnsafeCell<Option<Stack>>,
    running: AtomicBool,
    started: AtomicBool,
}

// Registers and stack are only touched by the thread that holds the
// `running` claim, or by the owner before the first claim.
unsafe impl Send for ExecutionContext {}
unsafe impl Sync for ExecutionContext {}

impl ExecutionContext {
    /// An empty context with no stack.
    ///
    /// Also used as the save area for an OS thread's own stack: switching
    /// away from it stores the thread's registers here.
    pub fn new() -> Self {
        Self {
            regs: UnsafeCell::new(arch::Registers::default()),
            stack: UnsafeCell::new(None),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Whether [`prepare`](Self::prepare) has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether some carrier is currently executing this context.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Install `stack` and arrange for the first resume to call `entry(arg)`.
    ///
    /// # Safety
    /// The context must not be running and must not have been prepared
    /// before. `entry` must never return.
    pub unsafe fn prepare(&self, stack: Stack, entry: EntryFn, arg: usize) {
        if self.is_running() || self.is_started() {
            fatal("execution context prepared twice");
        }
        *self.regs.get() = arch::Registers::new(stack.top(), entry, arg);
        *self.stack.get() = Some(stack);
        self.started.store(true, Ordering::Release);
    }

    /// Detach the stack so it can be unmapped or recycled.
    ///
    /// Returns `None` if the context is running or never got a stack.
    pub fn take_stack(&self) -> Option<Stack> {
        if self.is_running() {
            return None;
        }
        unsafe { (*self.stack.get()).take() }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("started", &self.is_started())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Switch from `current` into `target` and return once `target` suspends
/// back into `current`.
///
/// # Safety
/// `current` must be the context executing on this thread and `target` a
/// prepared context. `target` must only ever suspend back to `current`.
pub(crate) unsafe fn resume(current: &ExecutionContext, target: &ExecutionContext) {
    if target
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        fatal("execution context resumed while already running");
    }
    if !target.is_started() {
        fatal("execution context resumed before it was prepared");
    }
    arch::switch(current.regs.get(), target.regs.get());
    target.running.store(false, Ordering::Release);
}

/// Save `current` and jump back to the context that resumed it.
///
/// # Safety
/// Must be called from the code running on `current`'s stack, with
/// `resumer` being the context passed as `current` to the matching
/// [`resume`].
pub(crate) unsafe fn suspend(current: &ExecutionContext, resumer: &ExecutionContext) {
    arch::switch(current.regs.get(), resumer.regs.get());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct PingPong {
        main: ExecutionContext,
        coro: ExecutionContext,
        rounds: AtomicUsize,
    }

    unsafe extern "C" fn ping(arg: usize) -> ! {
        let pair = &*(arg as *const PingPong);
        loop {
            pair.rounds.fetch_add(1, Ordering::SeqCst);
            suspend(&pair.coro, &pair.main);
        }
    }

    #[test]
    fn test_resume_and_suspend() {
        let pair = Box::new(PingPong {
            main: ExecutionContext::new(),
            coro: ExecutionContext::new(),
            rounds: AtomicUsize::new(0),
        });
        let stack = Stack::new(64 * 1024).unwrap();
        unsafe {
            pair.coro
                .prepare(stack, ping, &*pair as *const PingPong as usize);
        }
        assert!(pair.coro.is_started());

        for expected in 1..=3 {
            unsafe { resume(&pair.main, &pair.coro) };
            assert_eq!(pair.rounds.load(Ordering::SeqCst), expected);
            assert!(!pair.coro.is_running());
        }
        assert!(pair.coro.take_stack().is_some());
    }

    #[cfg(target_arch = "x86_64")]
    fn read_mxcsr() -> u32 {
        let mut value = 0u32;
        unsafe {
            std::arch::asm!("stmxcsr dword ptr [{}]", in(reg) &mut value, options(nostack));
        }
        value
    }

    #[cfg(target_arch = "x86_64")]
    fn write_mxcsr(value: u32) {
        unsafe {
            std::arch::asm!("ldmxcsr dword ptr [{}]", in(reg) &value, options(nostack));
        }
    }

    #[cfg(target_arch = "x86_64")]
    struct FloatModes {
        main: ExecutionContext,
        coro: ExecutionContext,
        seen: AtomicUsize,
    }

    #[cfg(target_arch = "x86_64")]
    unsafe extern "C" fn round_toward_zero(arg: usize) -> ! {
        let modes = &*(arg as *const FloatModes);
        write_mxcsr(read_mxcsr() | 0x6000);
        loop {
            modes.seen.store(read_mxcsr() as usize, Ordering::SeqCst);
            suspend(&modes.coro, &modes.main);
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_float_control_is_per_context() {
        let modes = Box::new(FloatModes {
            main: ExecutionContext::new(),
            coro: ExecutionContext::new(),
            seen: AtomicUsize::new(0),
        });
        let stack = Stack::new(64 * 1024).unwrap();
        unsafe {
            modes
                .coro
                .prepare(stack, round_toward_zero, &*modes as *const FloatModes as usize);
        }

        let before = read_mxcsr();
        for _ in 0..2 {
            unsafe { resume(&modes.main, &modes.coro) };
            assert_eq!(read_mxcsr(), before);
            assert_eq!(modes.seen.load(Ordering::SeqCst) as u32 & 0x6000, 0x6000);
        }
        assert!(modes.coro.take_stack().is_some());
    }

    #[test]
    fn test_unprepared_context_has_no_stack() {
        let ctx = ExecutionContext::new();
        assert!(!ctx.is_started());
        assert!(ctx.take_stack().is_none());
    }
}
