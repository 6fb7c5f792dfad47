//! Async packet framing for use with tokio.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::Packet;
use crate::error::{BswError, Result};

/// Write the written region of a packet to an async stream.
pub async fn write_packet_async<W: AsyncWrite + Unpin, const N: usize>(
    writer: &mut W,
    packet: &Packet<N>,
) -> Result<()> {
    writer.write_all(packet.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly `len` bytes from an async stream into a packet.
pub async fn read_packet_async<R: AsyncRead + Unpin, const N: usize>(
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

    let mut buf = [0u8; N];
    match reader.read_exact(&mut buf[..len]).await {
        Ok(_) => packet.load(&buf[..len]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(BswError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}
