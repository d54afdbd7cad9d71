//! Task stacks and the pool that recycles them.
//!
//! Each stack is an anonymous mapping with one inaccessible guard page below
//! the usable region, so an overflow faults instead of corrupting a
//! neighbouring allocation. Finished tasks return their stack to the pool,
//! bucketed by usable size, and the next task of the same size reuses it.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::io;
use std::ptr;

/// A guard-paged stack mapping.
pub struct Stack {
    base: *mut libc::c_void,
    mapped_len: usize,
    usable: usize,
}

// The mapping is plain memory owned by this value.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Map a new stack with at least `size` usable bytes.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let usable = round_up(size.max(page), page);
        let mapped_len = usable + page;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON | map_norserve(),
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Lowest page is the guard; stacks grow down into it
        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(base, mapped_len);
            }
            return Err(err);
        }

        Ok(Stack {
            base,
            mapped_len,
            usable,
        })
    }

    /// Highest address of the stack (exclusive).
    pub fn top(&self) -> usize {
        self.base as usize + self.mapped_len
    }

    /// Lowest usable address, just above the guard page.
    pub fn bottom(&self) -> usize {
        self.top() - self.usable
    }

    /// Usable bytes, excluding the guard page.
    pub fn size(&self) -> usize {
        self.usable
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base, self.mapped_len);
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &format_args!("{:#x}", self.bottom()))
            .field("top", &format_args!("{:#x}", self.top()))
            .field("size", &self.usable)
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn map_norserve() -> libc::c_int {
    libc::MAP_NORESERVE
}

#[cfg(not(target_os = "linux"))]
fn map_norserve() -> libc::c_int {
    0
}

pub(crate) fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// Pool of reusable stacks, keyed by usable size.
pub struct StackPool {
    stacks: Mutex<FxHashMap<usize, Vec<Stack>>>,
    max_per_size: usize,
}

impl StackPool {
    /// Create a pool that keeps up to `max_per_size` stacks of each size.
    pub fn new(max_per_size: usize) -> Self {
        Self {
            stacks: Mutex::new(FxHashMap::default()),
            max_per_size,
        }
    }

    /// Take a cached stack of the rounded `size`, or map a new one.
    pub fn acquire(&self, size: usize) -> io::Result<Stack> {
        let page = page_size();
        let key = round_up(size.max(page), page);
        if let Some(stack) = self.stacks.lock().get_mut(&key).and_then(Vec::pop) {
            return Ok(stack);
        }
        Stack::new(key)
    }

    /// Give a stack back; it is unmapped if its bucket is full.
    pub fn release(&self, stack: Stack) {
        let mut stacks = self.stacks.lock();
        let bucket = stacks.entry(stack.size()).or_default();
        if bucket.len() < self.max_per_size {
            bucket.push(stack);
        }
    }

    /// Number of cached stacks across all sizes.
    pub fn cached(&self) -> usize {
        self.stacks.lock().values().map(Vec::len).sum()
    }
}
