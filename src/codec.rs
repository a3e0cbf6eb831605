//! Wire framing.
//!
//! Each frame is `[kind: 1 byte][length: 2 bytes big-endian][payload]`, where
//! the payload is the packet data after the session's encoder chain. The
//! 16-bit length field is a hard cap: a payload that exceeds 65535 bytes
//! after encoding is rejected with a protocol error, never fragmented.

use crate::encoder::EncoderChain;
use crate::error::{Result, TunError};
use crate::packet::{Packet, PacketKind};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame header: kind tag plus 16-bit payload length.
const HEADER_LEN: usize = 3;

/// Largest encoded payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Encode, frame and write one packet.
pub async fn write_packet<W>(writer: &mut W, chain: &EncoderChain, packet: &Packet) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = chain.encode(&packet.data)?;
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(TunError::Protocol(format!(
            "encoded payload is {} bytes, frame limit is {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(packet.kind.as_byte());
    frame.put_u16(payload.len() as u16);
    frame.extend_from_slice(&payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it back into a packet.
///
/// Reads exactly `HEADER_LEN` header bytes and then exactly the declared
/// payload length; EOF or any I/O failure part way through either read
/// surfaces as a transport error.
pub async fn read_packet<R>(reader: &mut R, chain: &EncoderChain) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let kind = PacketKind::from_byte(header[0]);
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let data = chain.decode(&payload)?;
    Ok(Packet { kind, data })
}
