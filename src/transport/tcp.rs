//! TCP stream transport: client and single-connection server.

use std::io::{self, Read, Write};
use std::time::Duration;

use tracing::{debug, warn};

use super::address::IpAddress;
use super::socket::{Protocol, Socket, SocketState};
use crate::error::Result;
use crate::sys::{self, RawHandle};

/// Pending-connection queue length passed to `listen`.
pub const BACKLOG: i32 = 10;

/// IPv4 stream protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tcp;

impl Protocol for Tcp {
    const NAME: &'static str = "TCP";

    fn create(&mut self) -> io::Result<RawHandle> {
        sys::socket(libc::AF_INET, libc::SOCK_STREAM, 0)
    }
}

/// A TCP stream handle.
pub type TcpSocket = Socket<Tcp>;

impl Socket<Tcp> {
    /// Send bytes on the connection, returning how many were written.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        let handle = self.checked_handle()?;
        sys::send(handle, buf).map_err(|e| self.record(e))
    }

    /// Receive up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` once the peer has closed the connection.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.checked_handle()?;
        sys::recv(handle, buf).map_err(|e| self.record(e))
    }

    /// Enable or disable Nagle's algorithm.
    pub fn set_nodelay(&mut self, nodelay: bool) -> Result<()> {
        let handle = self.checked_handle()?;
        sys::set_option(
            handle,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            nodelay as libc::c_int,
        )
        .map_err(|e| self.record(e))
    }
}

impl Read for Socket<Tcp> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.receive(buf).map_err(io::Error::from)
    }
}

impl Write for Socket<Tcp> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A TCP client owning one stream socket.
#[derive(Debug)]
pub struct TcpClient {
    socket: TcpSocket,
}

impl TcpClient {
    /// Create a client with an open, unconnected socket.
    pub fn new() -> Self {
        Self {
            socket: Socket::new(Tcp),
        }
    }

    /// Connect to a server.
    pub fn connect(&mut self, address: IpAddress, port: u16) -> Result<()> {
        let handle = self.socket.checked_handle()?;
        sys::connect_ipv4(handle, &address.to_sockaddr(port)).map_err(|e| self.socket.record(e))?;
        self.socket.set_state(SocketState::Connected);
        debug!(%address, port, "TCP client connected");
        Ok(())
    }

    /// Close the connection. The client cannot reconnect afterwards.
    pub fn disconnect(&mut self) -> Result<()> {
        self.socket.close()
    }

    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        self.socket.send(buf)
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.socket.receive(buf)
    }

    pub fn set_nodelay(&mut self, nodelay: bool) -> Result<()> {
        self.socket.set_nodelay(nodelay)
    }

    /// Get the underlying socket.
    pub fn socket(&self) -> &TcpSocket {
        &self.socket
    }

    /// Get a mutable reference to the underlying socket.
    pub fn socket_mut(&mut self) -> &mut TcpSocket {
        &mut self.socket
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A TCP server serving one connection at a time.
///
/// The server owns an acceptor socket and a data socket. Each accepted
/// connection replaces the previous one: the old data handle is closed before
/// the new one is adopted.
#[derive(Debug)]
pub struct TcpServer {
    acceptor: TcpSocket,
    data: TcpSocket,
}

impl TcpServer {
    pub fn new() -> Self {
        Self {
            acceptor: Socket::new(Tcp),
            data: Socket::new(Tcp),
        }
    }

    /// Allow rebinding a recently used local address.
    pub fn reuse_addr(&mut self) -> Result<()> {
        let handle = self.acceptor.checked_handle()?;
        sys::set_option(handle, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1 as libc::c_int)
            .map_err(|e| self.acceptor.record(e))
    }

    /// Bind to `address:port` and start listening.
    ///
    /// Port 0 binds an ephemeral port; see [`TcpServer::local_addr`].
    pub fn listen(&mut self, address: IpAddress, port: u16) -> Result<()> {
        let handle = self.acceptor.checked_handle()?;
        sys::bind_ipv4(handle, &address.to_sockaddr(port)).map_err(|e| self.acceptor.record(e))?;
        self.acceptor.set_state(SocketState::Bound);

        sys::listen(handle, BACKLOG).map_err(|e| self.acceptor.record(e))?;
        self.acceptor.set_state(SocketState::Listening);
        debug!(%address, port, "TCP server listening");
        Ok(())
    }

    /// Block until a client connects and make it the current data connection.
    ///
    /// Returns the peer address and port.
    pub fn accept(&mut self) -> Result<(IpAddress, u16)> {
        let handle = self.acceptor.checked_handle()?;
        let (fd, peer, port) = sys::accept(handle).map_err(|e| self.acceptor.record(e))?;

        if let Err(e) = self.data.close() {
            warn!(error = %e, "failed to close previous data connection");
        }
        // Closed above, so nothing is displaced.
        let _ = self.data.assign(fd);

        let peer = IpAddress::from_host_order(peer);
        debug!(%peer, port, "TCP server accepted connection");
        Ok((peer, port))
    }

    /// Wait up to `timeout` for a client and accept it.
    ///
    /// Returns `Ok(false)` if no client connected in time.
    pub fn accept_timeout(&mut self, timeout: Duration) -> Result<bool> {
        if !self.acceptor.wait_readable(timeout)? {
            return Ok(false);
        }
        self.accept()?;
        Ok(true)
    }

    /// Address and port the acceptor is bound to.
    pub fn local_addr(&mut self) -> Result<(IpAddress, u16)> {
        let handle = self.acceptor.checked_handle()?;
        let (address, port) = sys::local_ipv4(handle).map_err(|e| self.acceptor.record(e))?;
        Ok((IpAddress::from_host_order(address), port))
    }

    pub fn acceptor(&self) -> &TcpSocket {
        &self.acceptor
    }

    /// The current data connection.
    pub fn data(&self) -> &TcpSocket {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TcpSocket {
        &mut self.data
    }
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new()
    }
}
