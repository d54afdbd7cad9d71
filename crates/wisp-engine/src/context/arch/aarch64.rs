//! aarch64 register context (AAPCS64)

use std::arch::naked_asm;

/// Callee-saved registers of a suspended context, including the low halves
/// of v8-v15.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Registers {
    sp: u64,
    lr: u64,
    fp: u64,
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    d8: u64,
    d9: u64,
    d10: u64,
    d11: u64,
    d12: u64,
    d13: u64,
    d14: u64,
    d15: u64,
}

impl Registers {
    /// Registers for a context that has never run.
    ///
    /// # Safety
    /// `stack_top` must be the exclusive upper bound of a writable stack.
    pub unsafe fn new(stack_top: usize, entry: super::EntryFn, arg: usize) -> Self {
        Registers {
            sp: (stack_top & !0xF) as u64,
            lr: trampoline as usize as u64,
            x19: entry as usize as u64,
            x20: arg as u64,
            ..Default::default()
        }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #1",
    )
}

/// Save callee-saved registers into `from`, load `to`, and return into it.
///
/// # Safety
/// Both pointers must be valid; `to` must hold a suspended or fresh context.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_from: *mut Registers, _to: *const Registers) {
    naked_asm!(
        "mov x9, sp",
        "str x9,  [x0, #0x00]",
        "str lr,  [x0, #0x08]",
        "str fp,  [x0, #0x10]",
        "str x19, [x0, #0x18]",
        "str x20, [x0, #0x20]",
        "str x21, [x0, #0x28]",
        "str x22, [x0, #0x30]",
        "str x23, [x0, #0x38]",
        "str x24, [x0, #0x40]",
        "str x25, [x0, #0x48]",
        "str x26, [x0, #0x50]",
        "str x27, [x0, #0x58]",
        "str x28, [x0, #0x60]",
        "str d8,  [x0, #0x68]",
        "str d9,  [x0, #0x70]",
        "str d10, [x0, #0x78]",
        "str d11, [x0, #0x80]",
        "str d12, [x0, #0x88]",
        "str d13, [x0, #0x90]",
        "str d14, [x0, #0x98]",
        "str d15, [x0, #0xa0]",
        "ldr x9,  [x1, #0x00]",
        "mov sp, x9",
        "ldr lr,  [x1, #0x08]",
        "ldr fp,  [x1, #0x10]",
        "ldr x19, [x1, #0x18]",
        "ldr x20, [x1, #0x20]",
        "ldr x21, [x1, #0x28]",
        "ldr x22, [x1, #0x30]",
        "ldr x23, [x1, #0x38]",
        "ldr x24, [x1, #0x40]",
        "ldr x25, [x1, #0x48]",
        "ldr x26, [x1, #0x50]",
        "ldr x27, [x1, #0x58]",
        "ldr x28, [x1, #0x60]",
        "ldr d8,  [x1, #0x68]",
        "ldr d9,  [x1, #0x70]",
        "ldr d10, [x1, #0x78]",
        "ldr d11, [x1, #0x80]",
        "ldr d12, [x1, #0x88]",
        "ldr d13, [x1, #0x90]",
        "ldr d14, [x1, #0x98]",
        "ldr d15, [x1, #0xa0]",
        "ret",
    )
}
