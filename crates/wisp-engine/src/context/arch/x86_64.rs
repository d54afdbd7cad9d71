//! x86_64 register context (System V ABI)

use std::arch::naked_asm;

/// MXCSR at power-on: all exceptions masked, round to nearest.
const DEFAULT_MXCSR: u32 = 0x1F80;
/// x87 control word at power-on: all exceptions masked, 64-bit precision.
const DEFAULT_X87_CW: u32 = 0x037F;

/// Callee-saved registers of a suspended context, plus the MXCSR and x87
/// control word whose control bits the ABI also treats as callee-saved.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Registers {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    mxcsr: u32,
    x87_cw: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Registers {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: DEFAULT_MXCSR,
            x87_cw: DEFAULT_X87_CW,
        }
    }
}

impl Registers {
    /// Registers for a context that has never run.
    ///
    /// The first switch into it lands in the trampoline, which calls
    /// `entry(arg)` on the fresh stack.
    ///
    /// # Safety
    /// `stack_top` must be the exclusive upper bound of a writable stack of
    /// at least a few hundred bytes.
    pub unsafe fn new(stack_top: usize, entry: super::EntryFn, arg: usize) -> Self {
        // `ret` in `switch` pops the trampoline address from here
        let initial_rsp = (stack_top & !0xF) - 16;
        std::ptr::write(initial_rsp as *mut u64, trampoline as usize as u64);

        Registers {
            rsp: initial_rsp as u64,
            r12: entry as usize as u64,
            r13: arg as u64,
            ..Default::default()
        }
    }
}

/// First frame of every task stack: moves the argument into place and calls
/// the entry function, which never returns.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!(
        "mov rdi, r13",
        "and rsp, -16",
        "call r12",
        "ud2",
    )
}

/// Save callee-saved registers into `from`, load `to`, and return into it.
///
/// # Safety
/// Both pointers must be valid; `to` must hold a suspended or fresh context.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_from: *mut Registers, _to: *const Registers) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr dword ptr [rdi + 0x38]",
        "fnstcw word ptr [rdi + 0x3C]",
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ldmxcsr dword ptr [rsi + 0x38]",
        "fldcw word ptr [rsi + 0x3C]",
        "ret",
    )
}
