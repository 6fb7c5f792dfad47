//! Socket transports.
//!
//! [`Socket`] owns an OS handle and its lifecycle; each protocol adds its own
//! operations on top:
//!
//! - [`can`]: raw SocketCAN frames, classic or CAN-FD
//! - [`tcp`]: IPv4 stream client and single-connection server

pub mod address;
pub mod can;
pub mod socket;
pub mod tcp;

pub use address::IpAddress;
pub use can::{CanConfig, CanFrame, CanId, CanSocket};
pub use socket::{Protocol, Socket, SocketState};
pub use tcp::{TcpClient, TcpServer, TcpSocket};
