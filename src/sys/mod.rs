//! Platform layer over the OS socket and scheduling API.
//!
//! Everything above this module is written against [`Platform`] and the free
//! functions re-exported here; no other module issues socket, scheduling or
//! clock system calls.

use std::io;
use std::time::Duration;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::RawHandle;
#[cfg(target_os = "linux")]
pub(crate) use linux::*;

#[cfg(not(target_os = "linux"))]
compile_error!("bsw-rs requires Linux (SocketCAN and POSIX real-time scheduling)");

/// Lifecycle operations every transport handle needs, independent of protocol.
pub(crate) trait Platform {
    /// Release the handle.
    fn close(handle: RawHandle) -> io::Result<()>;

    /// Shut down both directions of a connected handle.
    fn shutdown(handle: RawHandle) -> io::Result<()>;

    /// Switch between blocking and non-blocking I/O.
    fn set_nonblocking(handle: RawHandle, nonblocking: bool) -> io::Result<()>;

    /// Wait up to `timeout` for read readiness.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_readable(handle: RawHandle, timeout: Duration) -> io::Result<bool>;
}
