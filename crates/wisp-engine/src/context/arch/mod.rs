//! Architecture-specific register save/restore.

/// Entry point of a fresh context; receives the argument given to
/// [`Registers::new`] and must never return.
pub type EntryFn = unsafe extern "C" fn(usize) -> !;

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{switch, Registers};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::{switch, Registers};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("wisp-engine supports x86_64 and aarch64 only");
