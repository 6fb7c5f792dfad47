//! Protocol-independent socket lifecycle.

use std::io;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{BswError, Result};
use crate::sys::{INVALID_HANDLE, Os, Platform, RawHandle};

/// Lifecycle state of a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    /// The OS resource was never obtained.
    #[default]
    Uninitialized,
    /// The handle is open but not yet bound or connected.
    Open,
    /// Bound to a local address or interface.
    Bound,
    /// Accepting connections.
    Listening,
    /// Connected to a peer.
    Connected,
    /// The handle has been released.
    Closed,
}

impl SocketState {
    /// Check if the state carries a valid OS handle.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SocketState::Open | SocketState::Bound | SocketState::Listening | SocketState::Connected
        )
    }

    /// Check if the handle has been released.
    pub fn is_closed(&self) -> bool {
        *self == SocketState::Closed
    }
}

/// Opens the OS resource for one transport protocol.
///
/// Each transport (CAN, TCP, ...) implements this once; [`Socket`] provides the
/// lifecycle around it.
pub trait Protocol {
    /// Name used in log output.
    const NAME: &'static str;

    /// Open a new OS handle for this protocol.
    fn create(&mut self) -> io::Result<RawHandle>;
}

/// An exclusively owned OS transport handle.
///
/// The handle is opened on construction and closed on drop. Operations never
/// panic; failures are returned as errors and the most recent OS error code is
/// kept for [`Socket::last_error`].
///
/// A socket is not synchronized. Sharing one between threads requires external
/// locking.
#[derive(Debug)]
pub struct Socket<P: Protocol> {
    handle: RawHandle,
    state: SocketState,
    last_error: i32,
    blocking: bool,
    failed: bool,
    protocol: P,
}

impl<P: Protocol> Socket<P> {
    /// Create a socket and open its OS handle.
    ///
    /// A failed open leaves the socket [`SocketState::Uninitialized`]; every
    /// dependent operation then fails with [`BswError::NotInitialized`].
    pub fn new(protocol: P) -> Self {
        let mut socket = Self::unopened(protocol);
        if let Err(e) = socket.initialize() {
            warn!(protocol = P::NAME, error = %e, "failed to open socket");
        }
        socket
    }

    /// A socket whose handle has not been opened yet.
    pub(crate) fn unopened(protocol: P) -> Self {
        Self {
            handle: INVALID_HANDLE,
            state: SocketState::Uninitialized,
            last_error: 0,
            blocking: true,
            failed: false,
            protocol,
        }
    }

    /// Open the OS handle through the protocol.
    ///
    /// Does nothing if the handle is already open. Neither a closed socket nor
    /// one whose open failed can be opened again; construct a new socket
    /// instead.
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            SocketState::Uninitialized if !self.failed => {}
            SocketState::Uninitialized | SocketState::Closed => {
                return Err(BswError::NotInitialized);
            }
            _ => return Ok(()),
        }

        match self.protocol.create() {
            Ok(handle) => {
                self.handle = handle;
                self.state = SocketState::Open;
                self.last_error = 0;
                self.blocking = true;
                trace!(protocol = P::NAME, handle, "socket opened");
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(self.record(e))
            }
        }
    }

    /// Shut down and release the handle.
    ///
    /// Closing a socket that holds no handle succeeds trivially.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_initialized() {
            debug!(protocol = P::NAME, "socket is closed already");
            return Ok(());
        }

        let handle = self.handle;
        // Fails for unconnected handles; only close() decides the outcome.
        let _ = Os::shutdown(handle);

        // Linux releases the descriptor even when close() reports an error.
        self.handle = INVALID_HANDLE;
        self.state = SocketState::Closed;

        match Os::close(handle) {
            Ok(()) => {
                trace!(protocol = P::NAME, handle, "socket closed");
                Ok(())
            }
            Err(e) => Err(self.record(e)),
        }
    }

    /// Switch the handle between blocking and non-blocking I/O.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        let handle = self.checked_handle()?;
        Os::set_nonblocking(handle, !blocking).map_err(|e| self.record(e))?;
        self.blocking = blocking;
        Ok(())
    }

    /// Check if the handle is in blocking mode.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Wait up to `timeout` for a pending connection or pending data.
    ///
    /// Returns `Ok(false)` on timeout. Closing the handle from another thread
    /// while waiting is not supported.
    pub fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        let handle = self.checked_handle()?;
        Os::wait_readable(handle, timeout).map_err(|e| self.record(e))
    }

    /// Adopt an externally obtained handle, e.g. one returned by `accept`.
    ///
    /// The previously held handle is not closed; if it was still open it is
    /// returned and the caller is responsible for closing it.
    #[must_use = "a displaced handle must be closed by the caller"]
    pub fn assign(&mut self, handle: RawHandle) -> Option<RawHandle> {
        let previous = self.is_initialized().then_some(self.handle);
        if let Some(previous) = previous {
            warn!(protocol = P::NAME, previous, handle, "assigning over an open handle");
        }

        self.handle = handle;
        self.state = SocketState::Connected;
        self.last_error = 0;
        self.blocking = true;
        previous
    }

    /// The most recent OS error code recorded on this socket (0 if none).
    pub fn last_error(&self) -> i32 {
        self.last_error
    }

    /// Check if the socket holds an open handle.
    pub fn is_initialized(&self) -> bool {
        self.state.is_open()
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Get the raw OS handle (`-1` when not open).
    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    /// Get the protocol implementation.
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub(crate) fn set_state(&mut self, state: SocketState) {
        self.state = state;
    }

    /// The open handle, or `NotInitialized` with `EBADF` recorded.
    pub(crate) fn checked_handle(&mut self) -> Result<RawHandle> {
        if self.is_initialized() {
            Ok(self.handle)
        } else {
            self.last_error = libc::EBADF;
            Err(BswError::NotInitialized)
        }
    }

    /// Store the OS error code and wrap the error.
    pub(crate) fn record(&mut self, err: io::Error) -> BswError {
        self.last_error = err.raw_os_error().unwrap_or(0);
        BswError::Io(err)
    }
}

impl<P: Protocol> Drop for Socket<P> {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(e) = self.close() {
                warn!(protocol = P::NAME, error = %e, "failed to close socket on drop");
            }
        }
    }
}
