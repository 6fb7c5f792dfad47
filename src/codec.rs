//! Fixed-capacity packet codec in network byte order.
//!
//! A [`Packet`] is a byte array with independent write and read cursors.
//! Values are appended at the write cursor and extracted at the read cursor,
//! most significant byte first regardless of host byte order.
//!
//! Strings and byte slices are encoded as a 4-byte length prefix followed by
//! the raw bytes:
//!
//! ```text
//! +----------------+-------------------+
//! | length (u32BE) | bytes (length)    |
//! +----------------+-------------------+
//! ```
//!
//! Every operation that does not fit the buffer fails without touching the
//! cursors or the contents.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes};

use crate::error::{BswError, Result};

/// Size of the length prefix in front of strings and byte slices.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// A value with a fixed-size network byte order encoding.
pub trait WireValue: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encode into `buf`, which is exactly `SIZE` bytes long.
    fn encode(self, buf: &mut [u8]);

    /// Decode from `buf`, which is exactly `SIZE` bytes long.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl WireValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(self, mut buf: &mut [u8]) {
                    buf.$put(self);
                }

                fn decode(mut buf: &[u8]) -> Self {
                    buf.$get()
                }
            }
        )*
    };
}

impl_wire_value! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    u16 => put_u16, get_u16;
    i16 => put_i16, get_i16;
    u32 => put_u32, get_u32;
    i32 => put_i32, get_i32;
    u64 => put_u64, get_u64;
    i64 => put_i64, get_i64;
    f32 => put_f32, get_f32;
    f64 => put_f64, get_f64;
}

// One byte, any non-zero value decodes as true.
impl WireValue for bool {
    const SIZE: usize = 1;

    fn encode(self, buf: &mut [u8]) {
        buf[0] = self as u8;
    }

    fn decode(buf: &[u8]) -> Self {
        buf[0] != 0
    }
}

/// A fixed-capacity encode/decode buffer.
///
/// Invariant: `write_position() <= N` and `read_position() <= N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<const N: usize> {
    buf: [u8; N],
    write: usize,
    read: usize,
}

impl<const N: usize> Packet<N> {
    /// Create an empty, zeroed packet.
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            write: 0,
            read: 0,
        }
    }

    /// Total capacity in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.write
    }

    pub fn is_empty(&self) -> bool {
        self.write == 0
    }

    pub fn write_position(&self) -> usize {
        self.write
    }

    pub fn read_position(&self) -> usize {
        self.read
    }

    /// Reset both cursors. The contents are left in place.
    pub fn clear(&mut self) {
        self.write = 0;
        self.read = 0;
    }

    /// Check if `n` more bytes fit at the write cursor. Zero is never writable.
    pub fn is_writable(&self, n: usize) -> bool {
        n > 0 && self.write.checked_add(n).is_some_and(|end| end <= N)
    }

    /// Check if `n` more bytes lie within the buffer at the read cursor.
    ///
    /// The bound is the capacity, not the write cursor, so bytes placed
    /// through [`Packet::data_mut`] can be decoded. Not reading past what was
    /// written is up to the caller.
    pub fn is_readable(&self, n: usize) -> bool {
        self.read.checked_add(n).is_some_and(|end| end <= N)
    }

    fn overflow(&self, requested: usize) -> BswError {
        BswError::BufferOverflow {
            requested,
            available: N - self.write,
        }
    }

    fn underflow(&self, requested: usize) -> BswError {
        BswError::BufferUnderflow {
            requested,
            available: N - self.read,
        }
    }

    /// Append a value at the write cursor.
    pub fn append<T: WireValue>(&mut self, value: T) -> Result<&mut Self> {
        if !self.is_writable(T::SIZE) {
            return Err(self.overflow(T::SIZE));
        }
        value.encode(&mut self.buf[self.write..self.write + T::SIZE]);
        self.write += T::SIZE;
        Ok(self)
    }

    /// Extract a value at the read cursor.
    pub fn extract<T: WireValue>(&mut self) -> Result<T> {
        if !self.is_readable(T::SIZE) {
            return Err(self.underflow(T::SIZE));
        }
        let value = T::decode(&self.buf[self.read..self.read + T::SIZE]);
        self.read += T::SIZE;
        Ok(value)
    }

    /// Append a length-prefixed byte slice.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let required = LENGTH_PREFIX_SIZE.saturating_add(bytes.len());
        let len = u32::try_from(bytes.len()).map_err(|_| self.overflow(required))?;
        if !self.is_writable(required) {
            return Err(self.overflow(required));
        }

        let start = self.write;
        len.encode(&mut self.buf[start..start + LENGTH_PREFIX_SIZE]);
        self.buf[start + LENGTH_PREFIX_SIZE..start + required].copy_from_slice(bytes);
        self.write += required;
        Ok(self)
    }

    /// Append a length-prefixed string.
    pub fn append_str(&mut self, s: &str) -> Result<&mut Self> {
        self.append_bytes(s.as_bytes())
    }

    /// Locate the length-prefixed bytes at the read cursor.
    ///
    /// Returns the payload range and the total encoded size.
    fn prefixed_range(&self) -> Result<(std::ops::Range<usize>, usize)> {
        if !self.is_readable(LENGTH_PREFIX_SIZE) {
            return Err(self.underflow(LENGTH_PREFIX_SIZE));
        }
        let len = u32::decode(&self.buf[self.read..self.read + LENGTH_PREFIX_SIZE]) as usize;
        let total = LENGTH_PREFIX_SIZE + len;
        if !self.is_readable(total) {
            return Err(self.underflow(total));
        }
        let start = self.read + LENGTH_PREFIX_SIZE;
        Ok((start..start + len, total))
    }

    /// Extract a length-prefixed string into `dest` followed by a NUL byte.
    ///
    /// Returns the string length. `dest` must hold the string plus the
    /// terminator; otherwise nothing is read.
    pub fn extract_str_into(&mut self, dest: &mut [u8]) -> Result<usize> {
        let (range, total) = self.prefixed_range()?;
        let len = range.len();
        if len + 1 > dest.len() {
            return Err(BswError::DestinationTooSmall {
                required: len + 1,
                capacity: dest.len(),
            });
        }

        dest[..len].copy_from_slice(&self.buf[range]);
        dest[len] = 0;
        self.read += total;
        Ok(len)
    }

    /// Extract a length-prefixed byte slice.
    pub fn extract_bytes(&mut self) -> Result<Vec<u8>> {
        let (range, total) = self.prefixed_range()?;
        let bytes = self.buf[range].to_vec();
        self.read += total;
        Ok(bytes)
    }

    /// Extract a length-prefixed UTF-8 string.
    pub fn extract_string(&mut self) -> Result<String> {
        let (range, total) = self.prefixed_range()?;
        let s = std::str::from_utf8(&self.buf[range])
            .map_err(|_| BswError::InvalidUtf8)?
            .to_owned();
        self.read += total;
        Ok(s)
    }

    /// Decode a value at `pos` without moving either cursor.
    pub fn peek<T: WireValue>(&self, pos: usize) -> Result<T> {
        match pos.checked_add(T::SIZE) {
            Some(end) if end <= N => Ok(T::decode(&self.buf[pos..end])),
            _ => Err(BswError::BufferUnderflow {
                requested: T::SIZE,
                available: N.saturating_sub(pos),
            }),
        }
    }

    /// Encode a value at `pos` without moving either cursor.
    pub fn store<T: WireValue>(&mut self, pos: usize, value: T) -> Result<()> {
        match pos.checked_add(T::SIZE) {
            Some(end) if end <= N => {
                value.encode(&mut self.buf[pos..end]);
                Ok(())
            }
            _ => Err(BswError::BufferOverflow {
                requested: T::SIZE,
                available: N.saturating_sub(pos),
            }),
        }
    }

    /// Advance the read cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if !self.is_readable(n) {
            return Err(self.underflow(n));
        }
        self.read += n;
        Ok(())
    }

    /// The whole buffer, including bytes past the write cursor.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// The whole buffer, e.g. as a receive target.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// The written region.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.write]
    }

    /// Replace the contents with `bytes` and rewind the read cursor.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > N {
            return Err(BswError::BufferOverflow {
                requested: bytes.len(),
                available: N,
            });
        }
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.write = bytes.len();
        self.read = 0;
        Ok(())
    }

    /// Copy the written region into a [`Bytes`].
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl<const N: usize> Default for Packet<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AsRef<[u8]> for Packet<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Write the written region of a packet to a stream.
pub fn write_packet<W: Write, const N: usize>(writer: &mut W, packet: &Packet<N>) -> Result<()> {
    writer.write_all(packet.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read exactly `len` bytes from a stream into a packet.
///
/// The packet is rewound and holds the received bytes.
pub fn read_packet<R: Read, const N: usize>(
    reader: &mut R,
    packet: &mut Packet<N>,
    len: usize,
) -> Result<()> {
    if len > N {
        return Err(BswError::BufferOverflow {
            requested: len,
            available: N,
        });
    }

    packet.clear();
    match reader.read_exact(&mut packet.data_mut()[..len]) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(BswError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }
    packet.write = len;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_network_order() {
        let mut packet = Packet::<2>::new();
        packet.append(0x1234u16).unwrap();
        assert_eq!(packet.as_bytes(), &[0x12, 0x34]);
        assert_eq!(packet.extract::<u16>().unwrap(), 0x1234);
    }

    #[test]
    fn test_i8() {
        let mut packet = Packet::<1>::new();
        packet.append(-120i8).unwrap();
        assert_eq!(packet.as_bytes(), &[0x88]);
        assert_eq!(packet.extract::<i8>().unwrap(), -120);
    }

    #[test]
    fn test_mixed_values() {
        let mut packet = Packet::<64>::new();
        packet
            .append(-23000i16)
            .unwrap()
            .append(0x1234_5678u32)
            .unwrap()
            .append(-1_012_397i32)
            .unwrap()
            .append(0x1234_5678_1177_6688u64)
            .unwrap()
            .append(i64::MIN)
            .unwrap()
            .append(-2.56f32)
            .unwrap()
            .append(-90.66f64)
            .unwrap()
            .append(true)
            .unwrap()
            .append(u8::MAX)
            .unwrap();
        assert_eq!(packet.len(), 2 + 4 + 4 + 8 + 8 + 4 + 8 + 1 + 1);
        assert_eq!(&packet.as_bytes()[2..6], &[0x12, 0x34, 0x56, 0x78]);

        assert_eq!(packet.extract::<i16>().unwrap(), -23000);
        assert_eq!(packet.extract::<u32>().unwrap(), 0x1234_5678);
        assert_eq!(packet.extract::<i32>().unwrap(), -1_012_397);
        assert_eq!(packet.extract::<u64>().unwrap(), 0x1234_5678_1177_6688);
        assert_eq!(packet.extract::<i64>().unwrap(), i64::MIN);
        assert_eq!(packet.extract::<f32>().unwrap(), -2.56f32);
        assert_eq!(packet.extract::<f64>().unwrap(), -90.66f64);
        assert!(packet.extract::<bool>().unwrap());
        assert_eq!(packet.extract::<u8>().unwrap(), u8::MAX);
        assert_eq!(packet.read_position(), packet.write_position());
    }

    /// Append `value` alone, check its bytes, then read it back.
    fn assert_wire<T: WireValue + PartialEq + std::fmt::Debug>(value: T, expected: &[u8]) {
        let mut packet = Packet::<8>::new();
        packet.append(value).unwrap();
        assert_eq!(packet.len(), T::SIZE);
        assert_eq!(packet.as_bytes(), expected, "encoding of {value:?}");
        assert_eq!(packet.extract::<T>().unwrap(), value);
        assert_eq!(packet.read_position(), T::SIZE);
    }

    #[test]
    fn test_unsigned_widths() {
        for value in [0u8, 1, 0x7F, 0x80, u8::MAX] {
            assert_wire(value, &[value]);
        }
        for value in [0u16, 1, 0x1234, 0x8000, u16::MAX] {
            assert_wire(value, &value.to_be_bytes());
        }
        for value in [0u32, 1, 0x1234_5678, 0x8000_0000, u32::MAX] {
            assert_wire(value, &value.to_be_bytes());
        }
        for value in [0u64, 1, 0x1234_5678_1177_6688, 1 << 63, u64::MAX] {
            assert_wire(value, &value.to_be_bytes());
        }
    }

    #[test]
    fn test_signed_widths() {
        for value in [i8::MIN, -1, 0, 1, i8::MAX] {
            assert_wire(value, &value.to_be_bytes());
        }
        for value in [i16::MIN, -23000, -1, 0, i16::MAX] {
            assert_wire(value, &value.to_be_bytes());
        }
        for value in [i32::MIN, -1_012_397, -1, 0, i32::MAX] {
            assert_wire(value, &value.to_be_bytes());
        }
        for value in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert_wire(value, &value.to_be_bytes());
        }
    }

    #[test]
    fn test_big_endian_layout() {
        assert_wire(0x0102u16, &[0x01, 0x02]);
        assert_wire(-2i16, &[0xFF, 0xFE]);
        assert_wire(0x0102_0304u32, &[0x01, 0x02, 0x03, 0x04]);
        assert_wire(i32::MIN, &[0x80, 0, 0, 0]);
        assert_wire(
            0x0102_0304_0506_0708u64,
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
        );
        assert_wire(-2i64, &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);
        assert_wire(1.0f32, &[0x3F, 0x80, 0x00, 0x00]);
        assert_wire(-2.0f64, &[0xC0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_bool() {
        assert_wire(true, &[1]);
        assert_wire(false, &[0]);

        let mut packet = Packet::<1>::new();
        packet.data_mut()[0] = 0x7F;
        assert!(packet.extract::<bool>().unwrap());
    }

    #[test]
    fn test_float_extremes() {
        for value in [
            0.0f32,
            f32::MIN,
            f32::MAX,
            f32::MIN_POSITIVE,
            f32::EPSILON,
            f32::INFINITY,
            f32::NEG_INFINITY,
            -2.56,
        ] {
            assert_wire(value, &value.to_be_bytes());
        }
        for value in [
            0.0f64,
            f64::MIN,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            f64::INFINITY,
            f64::NEG_INFINITY,
            -90.66,
        ] {
            assert_wire(value, &value.to_be_bytes());
        }

        // The sign of zero survives even though -0.0 == 0.0.
        assert_wire(-0.0f32, &[0x80, 0, 0, 0]);
        let mut packet = Packet::<8>::new();
        packet.append(-0.0f64).unwrap();
        assert!(packet.extract::<f64>().unwrap().is_sign_negative());

        // NaN payloads are carried bit for bit.
        let nan = f64::from_bits(0x7FF8_0000_0000_1234);
        packet.clear();
        packet.append(nan).unwrap();
        assert_eq!(packet.extract::<f64>().unwrap().to_bits(), nan.to_bits());
    }

    #[test]
    fn test_string() {
        let mut packet = Packet::<11>::new();
        packet.append_str("packet").unwrap();
        assert_eq!(packet.len(), 10);
        assert_eq!(&packet.as_bytes()[..4], &[0, 0, 0, 6]);

        let mut dest = [0xFFu8; 7];
        assert_eq!(packet.extract_str_into(&mut dest).unwrap(), 6);
        assert_eq!(&dest, b"packet\0");
    }

    #[test]
    fn test_string_destination_too_small() {
        let mut packet = Packet::<11>::new();
        packet.append_str("packet").unwrap();

        let mut dest = [0u8; 6];
        assert!(matches!(
            packet.extract_str_into(&mut dest),
            Err(BswError::DestinationTooSmall {
                required: 7,
                capacity: 6
            })
        ));
        assert_eq!(dest, [0u8; 6]);
        assert_eq!(packet.read_position(), 0);
        assert_eq!(packet.extract_string().unwrap(), "packet");
    }

    #[test]
    fn test_corrupt_length_prefix() {
        let mut packet = Packet::<8>::new();
        packet.append(u32::MAX).unwrap();
        assert!(matches!(
            packet.extract_bytes(),
            Err(BswError::BufferUnderflow { .. })
        ));
        assert_eq!(packet.read_position(), 0);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut packet = Packet::<8>::new();
        packet.append_bytes(&[0xFF, 0xFE]).unwrap();
        assert!(matches!(packet.extract_string(), Err(BswError::InvalidUtf8)));
        assert_eq!(packet.read_position(), 0);
        assert_eq!(packet.extract_bytes().unwrap(), vec![0xFF, 0xFE]);
    }

    #[test]
    fn test_overflow_leaves_packet_unchanged() {
        let mut packet = Packet::<3>::new();
        packet.append(0xABCDu16).unwrap();
        let before = packet.clone();

        assert!(matches!(
            packet.append(1u16),
            Err(BswError::BufferOverflow {
                requested: 2,
                available: 1
            })
        ));
        assert!(packet.append_str("ab").is_err());
        assert_eq!(packet, before);

        packet.append(7u8).unwrap();
        assert!(!packet.is_writable(1));
    }

    #[test]
    fn test_underflow_leaves_cursor_unchanged() {
        let mut packet = Packet::<2>::new();
        assert!(matches!(
            packet.extract::<u32>(),
            Err(BswError::BufferUnderflow {
                requested: 4,
                available: 2
            })
        ));
        assert_eq!(packet.read_position(), 0);
        assert!(packet.skip(3).is_err());
        packet.skip(2).unwrap();
        assert!(!packet.is_readable(1));
    }

    #[test]
    fn test_bounds_checks() {
        let packet = Packet::<4>::new();
        assert!(!packet.is_writable(0));
        assert!(packet.is_writable(4));
        assert!(!packet.is_writable(5));
        assert!(!packet.is_writable(usize::MAX));
        assert!(packet.is_readable(4));
        assert!(!packet.is_readable(usize::MAX));
    }

    #[test]
    fn test_clear_keeps_contents() {
        let mut packet = Packet::<4>::new();
        packet.append(0xDEAD_BEEFu32).unwrap();
        packet.extract::<u16>().unwrap();
        packet.clear();
        assert_eq!(packet.write_position(), 0);
        assert_eq!(packet.read_position(), 0);
        assert_eq!(packet.data(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(packet.as_bytes().is_empty());
    }

    #[test]
    fn test_peek_and_store() {
        let mut packet = Packet::<8>::new();
        packet.append(0u16).unwrap().append(0xCAFEu16).unwrap();
        packet.store(0, 4u16).unwrap();
        assert_eq!(packet.peek::<u16>(0).unwrap(), 4);
        assert_eq!(packet.peek::<u16>(2).unwrap(), 0xCAFE);
        assert_eq!(packet.write_position(), 4);
        assert_eq!(packet.read_position(), 0);

        assert!(packet.peek::<u32>(6).is_err());
        assert!(packet.store(7, 1u16).is_err());
        assert!(packet.peek::<u8>(usize::MAX).is_err());
    }

    #[test]
    fn test_raw_receive_buffer() {
        let mut packet = Packet::<4>::new();
        packet.data_mut()[..2].copy_from_slice(&[0x01, 0x02]);
        assert_eq!(packet.extract::<u16>().unwrap(), 0x0102);

        packet.load(&[0x00, 0x2A]).unwrap();
        assert_eq!(packet.len(), 2);
        assert_eq!(packet.extract::<u16>().unwrap(), 42);
        assert_eq!(packet.to_bytes(), Bytes::from_static(&[0x00, 0x2A]));
        assert!(packet.load(&[0; 5]).is_err());
    }

    #[test]
    fn test_stream_framing() {
        let mut packet = Packet::<16>::new();
        packet.append(0x0102_0304u32).unwrap().append_str("hi").unwrap();

        let mut wire = Vec::new();
        write_packet(&mut wire, &packet).unwrap();
        assert_eq!(wire.len(), 10);

        let mut received = Packet::<16>::new();
        read_packet(&mut io::Cursor::new(&wire), &mut received, wire.len()).unwrap();
        assert_eq!(received.extract::<u32>().unwrap(), 0x0102_0304);
        assert_eq!(received.extract_string().unwrap(), "hi");

        let err = read_packet(&mut io::Cursor::new(&wire[..3]), &mut received, 4).unwrap_err();
        assert!(matches!(err, BswError::ConnectionClosed));
        let err = read_packet(&mut io::Cursor::new(&wire), &mut received, 17).unwrap_err();
        assert!(matches!(err, BswError::BufferOverflow { .. }));
    }

    #[test]
    fn test_packet_over_tcp() {
        use crate::transport::{IpAddress, TcpClient, TcpServer};

        let mut server = TcpServer::new();
        server.listen(IpAddress::LOCALHOST, 0).unwrap();
        let (_, port) = server.local_addr().unwrap();

        let sender = std::thread::spawn(move || {
            let mut client = TcpClient::new();
            client.connect(IpAddress::LOCALHOST, port).unwrap();
            let mut packet = Packet::<12>::new();
            packet.append(-2.56f32).unwrap().append_str("SOS").unwrap();
            write_packet(client.socket_mut(), &packet).unwrap();
        });

        server.accept().unwrap();
        let mut packet = Packet::<12>::new();
        read_packet(server.data_mut(), &mut packet, 11).unwrap();
        assert_eq!(packet.extract::<f32>().unwrap(), -2.56f32);
        assert_eq!(packet.extract_string().unwrap(), "SOS");
        sender.join().unwrap();
    }
}
