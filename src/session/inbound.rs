use std::slice;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{Decoder, Packet, ProtocolLevel};
use crate::utils::error::{DecodeError, SessionError};

pub(crate) const READ_CHUNK: usize = 8 * 1024;

/// Turns the inbound byte stream into packets.
///
/// Reads accumulate in one growable buffer. A packet is decoded only once
/// the length announced by its fixed header has arrived, and is then split
/// off and frozen so its payload is shared rather than copied.
pub(crate) struct PacketReader<R> {
    io: R,
    buffer: BytesMut,
    decoder: Decoder,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub(crate) fn new(io: R, max_packet_size: usize) -> Self {
        Self {
            io,
            buffer: BytesMut::new(),
            decoder: Decoder::new(ProtocolLevel::V3_1_1, max_packet_size),
        }
    }

    pub(crate) fn set_level(&mut self, level: ProtocolLevel) {
        self.decoder.set_level(level);
    }

    /// Next packet, or `None` on a clean end of stream between packets.
    ///
    /// Cancel safe: bytes are only taken from the transport in the poll that
    /// completes a read.
    pub(crate) async fn next_packet(&mut self) -> Result<Option<Packet>, SessionError> {
        loop {
            match self.decoder.frame_len(&self.buffer)? {
                Some(total) if self.buffer.len() >= total => {
                    let frame = self.buffer.split_to(total).freeze();
                    let (packet, _) = self
                        .decoder
                        .decode(slice::from_ref(&frame))?
                        .ok_or(DecodeError::Truncated)?;
                    return Ok(Some(packet));
                }
                Some(total) => self.buffer.reserve(total - self.buffer.len()),
                None if self.buffer.len() == self.buffer.capacity() => {
                    self.buffer.reserve(READ_CHUNK)
                }
                None => {}
            }

            if self.io.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
        }
    }

    /// Bytes the read buffer can hold without reallocating.
    #[cfg(test)]
    pub(crate) fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }
}
