//! SocketCAN raw transport with optional CAN-FD.
//!
//! The socket is opened and bound with the `socketcan` crate, then handed to
//! [`Socket`] as a raw handle so CAN shares the lifecycle of the other
//! transports. Once CAN-FD is negotiated on a socket, every frame is sent as
//! a 72-byte `canfd_frame`, including payloads of eight bytes or less.

use std::fmt;
use std::io;
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::time::Duration;

use socketcan::{
    CanAnyFrame, CanFdFrame, CanFdSocket, CanFrame as ClassicFrame, CanSocket as RawCanSocket,
    EmbeddedFrame, ExtendedId, Id, Socket as _, SocketOptions, StandardId,
};
use tracing::{debug, error, warn};

use super::socket::{Protocol, Socket, SocketState};
use crate::error::{BswError, Result};
use crate::sys::{self, RawHandle};

/// Maximum payload of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum payload of a CAN-FD frame.
pub const CANFD_MAX_DLEN: usize = 64;
/// Size of a classic frame on the wire.
pub const CAN_MTU: usize = 16;
/// Size of a CAN-FD frame on the wire.
pub const CANFD_MTU: usize = 72;

/// A CAN identifier, standard (11-bit) or extended (29-bit).
///
/// Stored in SocketCAN form: extended identifiers carry `CAN_EFF_FLAG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CanId(u32);

impl CanId {
    /// Standard identifier, masked to 11 bits.
    pub const fn standard(id: u16) -> Self {
        Self(id as u32 & libc::CAN_SFF_MASK)
    }

    /// Extended identifier, masked to 29 bits.
    pub const fn extended(id: u32) -> Self {
        Self((id & libc::CAN_EFF_MASK) | libc::CAN_EFF_FLAG)
    }

    /// Standard if `id` fits into 11 bits, extended otherwise.
    pub const fn new(id: u32) -> Self {
        if id <= libc::CAN_SFF_MASK {
            Self(id)
        } else {
            Self::extended(id)
        }
    }

    /// Build from the raw `can_id` field. RTR and error flags are dropped.
    pub const fn from_raw(raw: u32) -> Self {
        if raw & libc::CAN_EFF_FLAG != 0 {
            Self::extended(raw)
        } else {
            Self(raw & libc::CAN_SFF_MASK)
        }
    }

    /// The identifier without flags.
    pub const fn id(self) -> u32 {
        self.0 & libc::CAN_EFF_MASK
    }

    pub const fn is_extended(self) -> bool {
        self.0 & libc::CAN_EFF_FLAG != 0
    }

    /// The raw `can_id` field.
    pub const fn raw(self) -> u32 {
        self.0
    }

    fn to_socketcan(self) -> Option<Id> {
        if self.is_extended() {
            ExtendedId::new(self.id()).map(Id::Extended)
        } else {
            StandardId::new(self.id() as u16).map(Id::Standard)
        }
    }
}

impl From<Id> for CanId {
    fn from(id: Id) -> Self {
        match id {
            Id::Standard(id) => Self::standard(id.as_raw()),
            Id::Extended(id) => Self::extended(id.as_raw()),
        }
    }
}

impl From<u16> for CanId {
    fn from(id: u16) -> Self {
        Self::standard(id)
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended() {
            write!(f, "0x{:08X}", self.id())
        } else {
            write!(f, "0x{:03X}", self.id())
        }
    }
}

/// A CAN or CAN-FD frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: CanId,
    len: u8,
    data: [u8; CANFD_MAX_DLEN],
}

impl CanFrame {
    /// Create a frame; payloads beyond 64 bytes are truncated.
    pub fn new(id: CanId, payload: &[u8]) -> Self {
        let len = payload.len().min(CANFD_MAX_DLEN);
        let mut data = [0u8; CANFD_MAX_DLEN];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id,
            len: len as u8,
            data,
        }
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Check if the payload only fits a CAN-FD frame.
    pub fn is_fd(&self) -> bool {
        self.len() > CAN_MAX_DLEN
    }

    fn invalid(&self) -> BswError {
        BswError::InvalidFrame { len: self.len() }
    }

    /// Classic `can_frame`; fails for payloads beyond eight bytes.
    fn to_classic(&self) -> Result<ClassicFrame> {
        let id = self.id.to_socketcan().ok_or_else(|| self.invalid())?;
        ClassicFrame::new(id, self.data()).ok_or_else(|| self.invalid())
    }

    /// `canfd_frame`, used for every frame once FD is enabled.
    fn to_fd(&self) -> Result<CanFdFrame> {
        let id = self.id.to_socketcan().ok_or_else(|| self.invalid())?;
        CanFdFrame::new(id, self.data()).ok_or_else(|| self.invalid())
    }

    fn from_embedded<F: EmbeddedFrame>(frame: &F) -> Self {
        Self::new(CanId::from(frame.id()), frame.data())
    }

    fn from_classic(frame: ClassicFrame) -> Result<Self> {
        match frame {
            ClassicFrame::Error(_) => Err(BswError::ErrorFrame),
            frame => Ok(Self::from_embedded(&frame)),
        }
    }

    fn from_any(frame: CanAnyFrame) -> Result<Self> {
        match frame {
            CanAnyFrame::Normal(frame) => Ok(Self::from_embedded(&frame)),
            CanAnyFrame::Remote(frame) => Ok(Self::from_embedded(&frame)),
            CanAnyFrame::Fd(frame) => Ok(Self::from_embedded(&frame)),
            CanAnyFrame::Error(_) => Err(BswError::ErrorFrame),
        }
    }
}

/// Options for opening a CAN socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanConfig {
    /// Interface name, e.g. `can0` or `vcan0`.
    pub interface: String,
    /// Try to negotiate CAN-FD frames.
    pub fd_frames: bool,
    /// Local loopback of sent frames; `None` keeps the kernel default.
    pub loopback: Option<bool>,
    /// Receive frames sent by this socket; `None` keeps the kernel default.
    pub receive_own_messages: Option<bool>,
}

impl CanConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            fd_frames: false,
            loopback: None,
            receive_own_messages: None,
        }
    }

    pub fn with_fd_frames(mut self, enabled: bool) -> Self {
        self.fd_frames = enabled;
        self
    }

    pub fn with_loopback(mut self, enabled: bool) -> Self {
        self.loopback = Some(enabled);
        self
    }

    pub fn with_receive_own_messages(mut self, enabled: bool) -> Self {
        self.receive_own_messages = Some(enabled);
        self
    }
}

impl Default for CanConfig {
    fn default() -> Self {
        Self::new("can0")
    }
}

/// Raw CAN protocol bound to one interface.
#[derive(Debug, Clone)]
pub struct Can {
    config: CanConfig,
    ifindex: u32,
    fd_enabled: bool,
}

impl Can {
    pub fn new(config: CanConfig) -> Self {
        Self {
            config,
            ifindex: 0,
            fd_enabled: false,
        }
    }

    pub fn config(&self) -> &CanConfig {
        &self.config
    }

    /// Kernel index of the bound interface (0 before binding).
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn is_fd_enabled(&self) -> bool {
        self.fd_enabled
    }

    /// Bytes written per frame.
    pub fn mtu(&self) -> usize {
        if self.fd_enabled { CANFD_MTU } else { CAN_MTU }
    }

    /// Largest payload a frame may carry.
    pub fn max_payload(&self) -> usize {
        if self.fd_enabled {
            CANFD_MAX_DLEN
        } else {
            CAN_MAX_DLEN
        }
    }

    /// Check if the interface MTU allows FD frames. Failures only disable FD.
    fn supports_fd(&self, socket: &RawCanSocket) -> bool {
        let interface = self.config.interface.as_str();
        match sys::interface_mtu(socket.as_raw_fd(), interface) {
            Ok(CANFD_MTU) => true,
            Ok(mtu) => {
                debug!(interface, mtu, "interface does not support CAN-FD");
                false
            }
            Err(e) => {
                warn!(interface, error = %e, "failed to query interface MTU");
                false
            }
        }
    }

    /// Apply the configured raw socket options and give up ownership of the
    /// handle.
    fn configure<S: SocketOptions + IntoRawFd>(&self, socket: S) -> io::Result<RawHandle> {
        if let Some(enabled) = self.config.loopback {
            socket.set_loopback(enabled)?;
        }
        if let Some(enabled) = self.config.receive_own_messages {
            socket.set_recv_own_msgs(enabled)?;
        }
        Ok(socket.into_raw_fd())
    }

    /// Open a raw socket bound to the configured interface.
    fn open_bound(&mut self) -> io::Result<RawHandle> {
        let ifindex = sys::interface_index(&self.config.interface)?;
        self.ifindex = ifindex;

        let classic = RawCanSocket::open_iface(ifindex)?;
        if self.config.fd_frames && self.supports_fd(&classic) {
            match CanFdSocket::open_iface(ifindex) {
                Ok(socket) => {
                    self.fd_enabled = true;
                    return self.configure(socket);
                }
                Err(e) => warn!(
                    interface = %self.config.interface,
                    error = %e,
                    "failed to enable CAN-FD frames"
                ),
            }
        }
        self.configure(classic)
    }
}

impl Protocol for Can {
    const NAME: &'static str = "CAN";

    fn create(&mut self) -> io::Result<RawHandle> {
        self.ifindex = 0;
        self.fd_enabled = false;

        let handle = self.open_bound()?;
        debug!(
            interface = %self.config.interface,
            ifindex = self.ifindex,
            fd = self.fd_enabled,
            "CAN socket bound"
        );
        Ok(handle)
    }
}

/// A raw CAN socket.
pub type CanSocket = Socket<Can>;

/// Build the frame for a `send` request, clamping to the payload and the
/// frame capacity.
fn request_frame(id: CanId, payload: &[u8], len: usize, max: usize) -> Result<CanFrame> {
    let len = len.min(payload.len()).min(max);
    if len == 0 {
        return Err(BswError::EmptyPayload);
    }
    Ok(CanFrame::new(id, &payload[..len]))
}

/// View a handle owned by a [`Socket`] as a `socketcan` socket.
fn borrow_handle<S: FromRawFd>(handle: RawHandle) -> ManuallyDrop<S> {
    // ManuallyDrop keeps the handle open; the owning Socket closes it.
    ManuallyDrop::new(unsafe { S::from_raw_fd(handle) })
}

impl Socket<Can> {
    /// Open a socket bound to the configured interface.
    pub fn open(config: CanConfig) -> Result<Self> {
        let mut socket = Socket::unopened(Can::new(config));
        socket.bind()?;
        Ok(socket)
    }

    /// Open a socket bound to the configured interface, without failing.
    ///
    /// If the interface cannot be bound the socket stays
    /// [`SocketState::Uninitialized`] for good and every send or receive
    /// fails; check [`CanSocket::is_ready`].
    pub fn from_config(config: CanConfig) -> Self {
        let mut socket = Socket::unopened(Can::new(config));
        if let Err(e) = socket.bind() {
            warn!(
                interface = %socket.protocol().config.interface,
                error = %e,
                "CAN socket unusable"
            );
        }
        socket
    }

    fn bind(&mut self) -> Result<()> {
        match self.initialize() {
            Ok(()) => {
                self.set_state(SocketState::Bound);
                Ok(())
            }
            // Resolution failed before any socket existed.
            Err(_) if self.protocol().ifindex == 0 => Err(BswError::InterfaceNotFound(
                self.protocol().config.interface.clone(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Check if the socket is bound and can transfer frames.
    pub fn is_ready(&self) -> bool {
        self.state() == SocketState::Bound
    }

    /// Check if CAN-FD frames were negotiated.
    pub fn is_fd_enabled(&self) -> bool {
        self.protocol().is_fd_enabled()
    }

    /// Bytes written per frame: 16, or 72 with CAN-FD.
    pub fn mtu(&self) -> usize {
        self.protocol().mtu()
    }

    fn bound_handle(&self) -> Result<RawHandle> {
        if self.is_ready() {
            Ok(self.handle())
        } else {
            Err(BswError::NotInitialized)
        }
    }

    /// Send `len` bytes of `payload` as one frame.
    ///
    /// `len` is clamped to the payload length and to the frame capacity (8, or
    /// 64 with CAN-FD). Returns the number of bytes written to the socket,
    /// which is the frame size.
    pub fn send(&mut self, id: CanId, payload: &[u8], len: usize) -> Result<usize> {
        self.bound_handle()?;
        let frame = request_frame(id, payload, len, self.protocol().max_payload())?;
        self.send_frame(&frame)
    }

    /// Send a frame. Zero-length frames are allowed here; payloads beyond
    /// eight bytes need CAN-FD.
    pub fn send_frame(&mut self, frame: &CanFrame) -> Result<usize> {
        let handle = self.bound_handle()?;
        let written = if self.is_fd_enabled() {
            let raw = frame.to_fd()?;
            borrow_handle::<CanFdSocket>(handle).write_frame(&raw)
        } else {
            let raw = frame.to_classic()?;
            borrow_handle::<RawCanSocket>(handle).write_frame(&raw)
        };

        let mtu = self.mtu();
        written.map(|()| mtu).map_err(|e| {
            error!(id = %frame.id(), error = %e, "CAN write failed");
            self.record(e)
        })
    }

    /// Block until a frame arrives.
    ///
    /// Copies at most `payload.len()` bytes and returns the identifier with the
    /// frame's full payload length.
    pub fn receive(&mut self, payload: &mut [u8]) -> Result<(CanId, usize)> {
        let frame = self.receive_frame()?;
        Ok(copy_payload(&frame, payload))
    }

    /// Wait up to `timeout` for a frame.
    ///
    /// Returns `Ok(None)` on timeout. A frame with no payload is returned as
    /// `Some((id, 0))`.
    pub fn receive_timeout(
        &mut self,
        payload: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(CanId, usize)>> {
        Ok(self
            .receive_frame_timeout(timeout)?
            .map(|frame| copy_payload(&frame, payload)))
    }

    /// Block until a frame arrives.
    pub fn receive_frame(&mut self) -> Result<CanFrame> {
        let handle = self.bound_handle()?;
        let received = if self.is_fd_enabled() {
            borrow_handle::<CanFdSocket>(handle)
                .read_frame()
                .map(CanFrame::from_any)
        } else {
            borrow_handle::<RawCanSocket>(handle)
                .read_frame()
                .map(CanFrame::from_classic)
        };
        received.map_err(|e| self.record(e))?
    }

    /// Wait up to `timeout` for a frame.
    pub fn receive_frame_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>> {
        self.bound_handle()?;
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }
        self.receive_frame().map(Some)
    }
}

fn copy_payload(frame: &CanFrame, payload: &mut [u8]) -> (CanId, usize) {
    let n = frame.len().min(payload.len());
    payload[..n].copy_from_slice(&frame.data()[..n]);
    (frame.id(), frame.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_id() {
        let id = CanId::standard(0x123);
        assert!(!id.is_extended());
        assert_eq!(id.id(), 0x123);
        assert_eq!(id.raw(), 0x123);
        assert_eq!(id.to_string(), "0x123");

        let id = CanId::new(0x1234_5678);
        assert!(id.is_extended());
        assert_eq!(id.id(), 0x1234_5678);
        assert_eq!(id.raw(), 0x9234_5678);
        assert_eq!(id.to_string(), "0x12345678");

        assert_eq!(CanId::new(0x7FF), CanId::standard(0x7FF));
        assert_eq!(CanId::from_raw(0x9234_5678), id);
        assert_eq!(CanId::from(0x0FFFu16).id(), 0x7FF);
    }

    #[test]
    fn test_can_id_socketcan_conversion() {
        let standard = CanId::standard(0x123);
        assert_eq!(
            standard.to_socketcan(),
            Some(Id::Standard(StandardId::new(0x123).unwrap()))
        );
        assert_eq!(CanId::from(standard.to_socketcan().unwrap()), standard);

        // An extended id below 0x800 stays extended.
        let extended = CanId::extended(0x100);
        assert_eq!(
            extended.to_socketcan(),
            Some(Id::Extended(ExtendedId::new(0x100).unwrap()))
        );
        assert_eq!(CanId::from(extended.to_socketcan().unwrap()), extended);
    }

    #[test]
    fn test_classic_frame_conversion() {
        let frame = CanFrame::new(CanId::standard(0x123), &[0xAA, 0xBB]);
        let raw = frame.to_classic().unwrap();
        assert_eq!(raw.id(), Id::Standard(StandardId::new(0x123).unwrap()));
        assert_eq!(raw.data(), &[0xAA, 0xBB]);
        assert_eq!(CanFrame::from_classic(raw).unwrap(), frame);

        let empty = CanFrame::new(CanId::extended(0x1ABC), &[]);
        let raw = empty.to_classic().unwrap();
        assert!(raw.data().is_empty());
        assert_eq!(CanFrame::from_classic(raw).unwrap(), empty);
    }

    #[test]
    fn test_fd_frame_conversion() {
        let short = CanFrame::new(CanId::standard(0x42), &[0x01]);
        let raw = short.to_fd().unwrap();
        assert_eq!(raw.data(), &[0x01]);
        assert_eq!(
            CanFrame::from_any(CanAnyFrame::Fd(raw)).unwrap(),
            short
        );

        let payload: Vec<u8> = (0..12).collect();
        let long = CanFrame::new(CanId::standard(1), &payload);
        assert!(long.is_fd());
        assert_eq!(long.to_fd().unwrap().data(), payload.as_slice());
        assert!(matches!(
            long.to_classic(),
            Err(BswError::InvalidFrame { len: 12 })
        ));
    }

    #[test]
    fn test_frame_truncates_to_fd_capacity() {
        let payload = [0x5Au8; 80];
        let frame = CanFrame::new(CanId::standard(2), &payload);
        assert_eq!(frame.len(), CANFD_MAX_DLEN);
        assert_eq!(frame.data(), &payload[..CANFD_MAX_DLEN]);
    }

    #[test]
    fn test_request_frame_clamps() {
        let payload: Vec<u8> = (0..12).collect();
        let id = CanId::standard(0x10);

        let frame = request_frame(id, &payload, 20, CAN_MAX_DLEN).unwrap();
        assert_eq!(frame.data(), &payload[..8]);

        // Never reads past the caller's payload.
        let frame = request_frame(id, &payload[..3], 8, CAN_MAX_DLEN).unwrap();
        assert_eq!(frame.data(), &[0, 1, 2]);

        let frame = request_frame(id, &payload, 12, CANFD_MAX_DLEN).unwrap();
        assert_eq!(frame.len(), 12);
        assert!(frame.is_fd());

        assert!(matches!(
            request_frame(id, &payload, 0, CAN_MAX_DLEN),
            Err(BswError::EmptyPayload)
        ));
        assert!(matches!(
            request_frame(id, &[], 8, CAN_MAX_DLEN),
            Err(BswError::EmptyPayload)
        ));
    }

    #[test]
    fn test_copy_payload_reports_full_length() {
        let frame = CanFrame::new(CanId::standard(5), &[1, 2, 3, 4]);
        let mut small = [0u8; 2];
        assert_eq!(copy_payload(&frame, &mut small), (CanId::standard(5), 4));
        assert_eq!(small, [1, 2]);

        let empty = CanFrame::new(CanId::standard(5), &[]);
        assert!(empty.is_empty());
        assert_eq!(copy_payload(&empty, &mut small).1, 0);
    }

    #[test]
    fn test_config_builder() {
        let config = CanConfig::new("vcan0")
            .with_fd_frames(true)
            .with_loopback(true)
            .with_receive_own_messages(false);
        assert_eq!(config.interface, "vcan0");
        assert!(config.fd_frames);
        assert_eq!(config.loopback, Some(true));
        assert_eq!(config.receive_own_messages, Some(false));
        assert_eq!(CanConfig::default().interface, "can0");
    }

    #[test]
    fn test_missing_interface() {
        let mut socket = CanSocket::from_config(CanConfig::new("nosuchcan0"));
        assert!(!socket.is_ready());
        assert_eq!(socket.state(), SocketState::Uninitialized);
        assert_eq!(socket.handle(), -1);
        assert_eq!(socket.protocol().ifindex(), 0);
        assert_ne!(socket.last_error(), 0);
        assert!(matches!(
            socket.send(CanId::standard(1), &[1], 1),
            Err(BswError::NotInitialized)
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            socket.receive_timeout(&mut buf, Duration::from_millis(1)),
            Err(BswError::NotInitialized)
        ));

        // The failed construction is final.
        assert!(matches!(socket.initialize(), Err(BswError::NotInitialized)));
        assert!(!socket.is_ready());

        assert!(matches!(
            CanSocket::open(CanConfig::new("nosuchcan0")),
            Err(BswError::InterfaceNotFound(name)) if name == "nosuchcan0"
        ));
    }

    #[test]
    #[ignore = "requires a vcan0 interface"]
    fn test_vcan_round_trip() {
        let config = CanConfig::new("vcan0").with_receive_own_messages(true);
        let mut tx = CanSocket::open(config.clone()).unwrap();
        let mut rx = CanSocket::open(config).unwrap();
        assert_eq!(tx.mtu(), CAN_MTU);
        assert!(tx.protocol().ifindex() > 0);

        assert_eq!(tx.send(CanId::standard(0x123), &[0xAA, 0xBB], 2).unwrap(), CAN_MTU);

        let mut buf = [0u8; 8];
        let (id, len) = rx
            .receive_timeout(&mut buf, Duration::from_secs(1))
            .unwrap()
            .expect("frame");
        assert_eq!(id, CanId::standard(0x123));
        assert_eq!(&buf[..len], &[0xAA, 0xBB]);
    }

    #[test]
    #[ignore = "requires a vcan0 interface with CAN-FD MTU"]
    fn test_vcan_fd_frame_size() {
        let mut socket = CanSocket::open(CanConfig::new("vcan0").with_fd_frames(true)).unwrap();
        if socket.is_fd_enabled() {
            assert_eq!(socket.send(CanId::standard(0x1), &[0x01], 1).unwrap(), CANFD_MTU);
        }
    }
}
