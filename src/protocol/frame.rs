//! Length-prefixed framing
//!
//! Client frames: `[LEN:u32 BE][UTF-8 TEXT]`.
//! Replication frames carry a leading kind byte: `[KIND:u8][LEN:u32 BE][UTF-8 TEXT]`.
//! A clean end of stream at a frame boundary reads as `None`; anything cut
//! short inside a frame is a protocol error.

use crate::common::{Error, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body, guards allocation from a bogus prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Kind byte of a replication frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// UTF-8 command text
    Text = 0x01,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameKind::Text),
            other => Err(Error::Protocol(format!("unknown frame kind: {:#04x}", other))),
        }
    }
}

/// Fill `buf` completely. Returns false on EOF before the first byte.
async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::Protocol(format!(
                "stream ended after {} of {} bytes",
                filled,
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(true)
}

/// Read a big-endian u32, `None` on clean EOF.
pub async fn read_u32<R>(reader: &mut R) -> Result<Option<u32>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut buf).await? {
        return Ok(None);
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

/// Write a big-endian u32.
pub async fn write_u32<W>(writer: &mut W, value: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.to_be_bytes()).await?;
    Ok(())
}

async fn read_body<R>(reader: &mut R, len: u32) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = len as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Protocol(format!("frame body truncated (expected {} bytes)", len))
        } else {
            Error::Io(e)
        }
    })?;
    String::from_utf8(body).map_err(|_| Error::InvalidText)
}

/// Read one client frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    match read_u32(reader).await? {
        Some(len) => Ok(Some(read_body(reader, len).await?)),
        None => Ok(None),
    }
}

/// Read one replication frame (kind byte first).
pub async fn read_tagged_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut kind = [0u8; 1];
    if !read_exact_or_eof(reader, &mut kind).await? {
        return Ok(None);
    }
    FrameKind::try_from(kind[0])?;
    match read_u32(reader).await? {
        Some(len) => Ok(Some(read_body(reader, len).await?)),
        None => Err(Error::Protocol("stream ended after frame kind".into())),
    }
}

fn body_len(text: &str) -> Result<u32> {
    if text.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(text.len()));
    }
    Ok(text.len() as u32)
}

/// Append a client frame to `buf`.
pub fn encode_frame(buf: &mut BytesMut, text: &str) -> Result<()> {
    let len = body_len(text)?;
    buf.reserve(4 + text.len());
    buf.put_u32(len);
    buf.put_slice(text.as_bytes());
    Ok(())
}

/// Append a replication frame to `buf`.
pub fn encode_tagged_frame(buf: &mut BytesMut, text: &str) -> Result<()> {
    let len = body_len(text)?;
    buf.reserve(5 + text.len());
    buf.put_u8(FrameKind::Text as u8);
    buf.put_u32(len);
    buf.put_slice(text.as_bytes());
    Ok(())
}

/// Write one client frame.
pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, text)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one replication frame.
pub async fn write_tagged_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_tagged_frame(&mut buf, text)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
