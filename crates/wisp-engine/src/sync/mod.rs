//! Task-aware synchronization primitives
//!
//! Waiting here parks the task and frees its carrier. On native threads the
//! same types block the thread.

mod mutex;
mod semaphore;

pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;
