//! Error types for transport, codec and task operations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the transports, the packet codec and the
/// real-time task scheduler.
#[derive(Error, Debug)]
pub enum BswError {
    /// I/O error reported by the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The socket was never opened or has already been closed.
    #[error("Socket is not initialized")]
    NotInitialized,

    /// The named network interface does not exist.
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// The string is not a dotted-quad IPv4 address.
    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),

    /// Attempt to send a frame without payload.
    #[error("Payload is empty")]
    EmptyPayload,

    /// No CAN frame layout can carry a payload of this length.
    #[error("Invalid CAN frame: {len} payload bytes")]
    InvalidFrame { len: usize },

    /// The socket delivered a CAN error frame instead of data.
    #[error("Received CAN error frame")]
    ErrorFrame,

    /// Not enough room left in the packet to write the value.
    #[error("Buffer overflow: {requested} bytes requested, {available} available")]
    BufferOverflow { requested: usize, available: usize },

    /// Not enough bytes left in the packet to read the value.
    #[error("Buffer underflow: {requested} bytes requested, {available} available")]
    BufferUnderflow { requested: usize, available: usize },

    /// The caller-provided destination cannot hold the decoded string.
    #[error("Destination too small: {required} bytes required, capacity is {capacity}")]
    DestinationTooSmall { required: usize, capacity: usize },

    /// Decoded string bytes are not valid UTF-8.
    #[error("Decoded string is not valid UTF-8")]
    InvalidUtf8,

    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Real-time priority outside of 1..=98.
    #[error("Invalid real-time priority {0}: expected 1..=98")]
    InvalidPriority(i32),

    /// Task period is zero or does not fit into a signed nanosecond count.
    #[error("Invalid task period: {0:?}")]
    InvalidPeriod(Duration),

    /// A real-time setup step failed inside the task thread.
    #[error("Real-time setup failed ({step}): {source}")]
    RealtimeSetup {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    /// The task's `pre()` hook refused to start.
    #[error("Task precondition failed")]
    PreconditionFailed,

    /// The task thread is already running.
    #[error("Task already started")]
    AlreadyStarted,

    /// The task thread was never started.
    #[error("Task not started")]
    NotStarted,

    /// The task thread panicked.
    #[error("Task thread panicked")]
    ThreadPanicked,
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, BswError>;

impl BswError {
    /// Create a real-time setup error for the given step.
    pub fn realtime(step: &'static str, source: io::Error) -> Self {
        Self::RealtimeSetup { step, source }
    }

    /// Check if this error is recoverable (transient).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted
        )
    }

    /// Raw OS error code carried by this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Io(e) | Self::RealtimeSetup { source: e, .. } => e.raw_os_error(),
            _ => None,
        }
    }
}

impl From<BswError> for io::Error {
    fn from(err: BswError) -> Self {
        match err {
            BswError::Io(e) => e,
            BswError::ConnectionClosed => io::Error::from(io::ErrorKind::UnexpectedEof),
            BswError::NotInitialized => io::Error::from(io::ErrorKind::NotConnected),
            other => io::Error::other(other),
        }
    }
}
