use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transport::error::{handshake_error, io_error, TransportResult};

/// Upper bound on any length prefix read off the wire; anything larger is
/// treated as a malformed stream rather than an allocation request.
const MAX_SEGMENT_LEN: u32 = 16 * 1024 * 1024;
const MAX_HANDSHAKE_LEN: u32 = 4 * 1024;

/// One encrypted unit on the wire: length-prefixed ciphertext, IV and
/// authentication tag. All length prefixes are unsigned 32-bit big-endian.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct HandshakeRecord {
    device_id: String,
}

/// Writes the plaintext handshake that identifies the sending device.
pub async fn write_handshake<W>(writer: &mut W, device_id: &str) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let record = HandshakeRecord {
        device_id: device_id.to_string(),
    };
    let encoded = serde_json::to_vec(&record)
        .map_err(|err| handshake_error(format!("failed to encode handshake: {}", err)))?;

    let mut buf = BytesMut::with_capacity(4 + encoded.len());
    buf.put_u32(encoded.len() as u32);
    buf.put_slice(&encoded);
    writer.write_all(&buf).await?;
    Ok(())
}

/// Reads and decodes the handshake, yielding the sender's device id.
pub async fn read_handshake<R>(reader: &mut R) -> TransportResult<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;
    if len == 0 || len > MAX_HANDSHAKE_LEN {
        return Err(handshake_error(format!("unreasonable handshake length {}", len)));
    }

    let mut encoded = vec![0u8; len as usize];
    reader.read_exact(&mut encoded).await?;
    let record: HandshakeRecord = serde_json::from_slice(&encoded)
        .map_err(|err| handshake_error(format!("malformed handshake: {}", err)))?;
    Ok(record.device_id)
}

/// Writes one encrypted frame as three length-prefixed segments.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf =
        BytesMut::with_capacity(12 + frame.ciphertext.len() + frame.iv.len() + frame.tag.len());
    buf.put_u32(frame.ciphertext.len() as u32);
    buf.put_slice(&frame.ciphertext);
    buf.put_u32(frame.iv.len() as u32);
    buf.put_slice(&frame.iv);
    buf.put_u32(frame.tag.len() as u32);
    buf.put_slice(&frame.tag);
    writer.write_all(&buf).await?;
    Ok(())
}

/// Writes the end-of-stream marker: a single zero length.
pub async fn write_terminator<W>(writer: &mut W) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(0).await?;
    Ok(())
}

/// Reads the next frame, or `None` when the terminator arrives.
pub async fn read_frame<R>(reader: &mut R) -> TransportResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let ct_len = reader.read_u32().await?;
    if ct_len == 0 {
        return Ok(None);
    }

    let ciphertext = read_segment(reader, ct_len).await?;
    let iv_len = reader.read_u32().await?;
    let iv = read_segment(reader, iv_len).await?;
    let tag_len = reader.read_u32().await?;
    let tag = read_segment(reader, tag_len).await?;

    Ok(Some(Frame { ciphertext, iv, tag }))
}

async fn read_segment<R>(reader: &mut R, len: u32) -> TransportResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    if len > MAX_SEGMENT_LEN {
        return Err(io_error(format!("unreasonable segment length {}", len)));
    }
    let mut segment = vec![0u8; len as usize];
    reader.read_exact(&mut segment).await?;
    Ok(segment)
}
