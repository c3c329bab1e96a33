//! Wire protocol utilities
//!
//! Length-prefixed framing over a byte stream. Reads go through a single
//! buffer so a frame split across TCP segments, or several frames arriving
//! together, are handled the same way.

use bytes::{Buf, BytesMut};
use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, trace};

use super::handshake::HANDSHAKE_LEN;
use super::{Handshake, Message};
use crate::error::TorrentError;

/// Largest frame body accepted from a peer (1 MiB)
pub const MAX_FRAME_LEN: usize = 1 << 20;

const READ_CHUNK: usize = 16 * 1024;

/// Pull one complete frame out of `buf`.
///
/// Returns `Ok(None)` until the whole frame (`4 + length` bytes) is buffered.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Message>> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > MAX_FRAME_LEN {
        error!("Peer sent oversized frame: {} bytes", length);
        return Err(TorrentError::transfer_error_with_source(
            "Frame exceeds maximum length",
            format!("{} > {}", length, MAX_FRAME_LEN),
        )
        .into());
    }

    if buf.len() < 4 + length {
        buf.reserve(4 + length - buf.len());
        return Ok(None);
    }

    buf.advance(4);
    let body = buf.split_to(length).freeze();
    Message::decode_body(body).map(Some)
}

/// Append a framed message to `buf`
pub fn encode_frame(buf: &mut BytesMut, message: &Message) {
    message.encode(buf);
}

/// Buffered message stream over any async byte transport
pub struct PeerWire<S> {
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> PeerWire<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Write a handshake to the stream
    pub async fn write_handshake(&mut self, handshake: &Handshake) -> Result<()> {
        self.stream.write_all(&handshake.serialize()).await.map_err(TorrentError::from)?;
        self.stream.flush().await.map_err(TorrentError::from)?;
        Ok(())
    }

    /// Read exactly one 68-byte handshake; trailing bytes stay buffered
    pub async fn read_handshake(&mut self) -> Result<Handshake> {
        while self.read_buf.len() < HANDSHAKE_LEN {
            self.fill_buf().await.map_err(|e| {
                TorrentError::handshake_failed(format!(
                    "connection ended after {} of {} handshake bytes: {}",
                    self.read_buf.len(),
                    HANDSHAKE_LEN,
                    e
                ))
            })?;
        }
        let raw = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::deserialize(&raw)
    }

    /// Write a message to the stream
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write_buf.clear();
        encode_frame(&mut self.write_buf, message);
        trace!("Writing {} byte frame", self.write_buf.len());
        self.stream.write_all(&self.write_buf).await.map_err(TorrentError::from)?;
        self.stream.flush().await.map_err(TorrentError::from)?;
        Ok(())
    }

    /// Read a complete message, waiting for more bytes as needed.
    ///
    /// Safe to cancel: partially received frames stay in the buffer.
    pub async fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = decode_frame(&mut self.read_buf)? {
                return Ok(message);
            }
            self.fill_buf().await?;
        }
    }

    /// Shut down the write half of the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(TorrentError::from)?;
        Ok(())
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn fill_buf(&mut self) -> Result<()> {
        self.read_buf.reserve(READ_CHUNK);
        let n = self.stream.read_buf(&mut self.read_buf).await.map_err(TorrentError::from)?;
        if n == 0 {
            return Err(TorrentError::transfer_error("Peer closed the connection").into());
        }
        trace!("Received {} bytes ({} buffered)", n, self.read_buf.len());
        Ok(())
    }
}
