//! Basic software for embedded Linux control units.
//!
//! This crate provides the communication and timing building blocks of a
//! control application:
//!
//! # Features
//!
//! - CAN and CAN-FD frames over SocketCAN
//! - TCP client and single-connection server
//! - A fixed-capacity packet codec in network byte order
//! - Periodic tasks on real-time threads with drift-free absolute timing
//!
//! All transports share one socket lifecycle ([`transport::Socket`]): the OS
//! handle is opened on construction, closed on drop, and every failure is
//! returned as a [`BswError`] with the OS error code kept for diagnostics.
//!
//! # Example
//!
//! ```no_run
//! use bsw_rs::codec::Packet;
//! use bsw_rs::transport::{CanConfig, CanId, CanSocket};
//!
//! let mut can = CanSocket::open(CanConfig::new("vcan0"))?;
//!
//! let mut packet = Packet::<8>::new();
//! packet.append(0x1234u16)?.append(-2.56f32)?;
//! can.send(CanId::standard(0x123), packet.as_bytes(), packet.len())?;
//! # Ok::<(), bsw_rs::BswError>(())
//! ```
//!
//! # Platform
//!
//! Linux only: SocketCAN, `SCHED_RR` and `mlockall` have no portable
//! equivalent.

pub mod codec;
pub mod error;
mod sys;
pub mod task;
pub mod transport;

// Async modules (require tokio feature)
#[cfg(feature = "tokio")]
pub mod codec_async;

// Re-export commonly used types at the crate root
pub use codec::{Packet, WireValue};
pub use error::{BswError, Result};
pub use sys::RawHandle;
pub use task::{FnTask, PeriodicTask, RtTask, SchedPolicy, TaskConfig};
pub use transport::{
    CanConfig, CanFrame, CanId, CanSocket, IpAddress, Socket, SocketState, TcpClient, TcpServer,
    TcpSocket,
};
