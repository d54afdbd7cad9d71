//! I/O readiness integration
//!
//! One epoll instance per engine maps each file descriptor to the tasks
//! waiting on it. A task whose non-blocking operation hits `WouldBlock`
//! registers interest, parks, and retries once the poller reports the fd
//! ready.

mod fd;
mod net;
mod poller;

pub use fd::Async;
pub use net::{TcpListener, TcpStream};
pub use poller::Interest;

pub(crate) use poller::Poller;
