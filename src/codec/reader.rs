//! Cursor over a byte sequence that may be split into several
//! non-contiguous segments.
//!
//! Network input arrives in arbitrary chunks, so every read here works the
//! same whether a field sits inside one segment or straddles several.

use std::ops::Range;

use bytes::{Bytes, BytesMut};

use crate::utils::error::DecodeError;

/// A chunk of input the decoder can read from.
///
/// `share` lets reference-counted buffers hand out fields without copying.
pub trait Segment: AsRef<[u8]> {
    fn share(&self, range: Range<usize>) -> Bytes {
        Bytes::copy_from_slice(&self.as_ref()[range])
    }
}

impl Segment for &[u8] {}

impl Segment for Vec<u8> {}

impl Segment for Bytes {
    fn share(&self, range: Range<usize>) -> Bytes {
        self.slice(range)
    }
}

/// Reads primitives from a window over `segments`.
///
/// Running past the window yields [`DecodeError::Truncated`]; the caller
/// decides whether that means "wait for more bytes" or "malformed".
#[derive(Debug)]
pub(crate) struct SegmentReader<'a, S> {
    segments: &'a [S],
    index: usize,
    offset: usize,
    remaining: usize,
}

impl<'a, S: Segment> SegmentReader<'a, S> {
    pub(crate) fn new(segments: &'a [S]) -> Self {
        let remaining = segments.iter().map(|s| s.as_ref().len()).sum();
        Self {
            segments,
            index: 0,
            offset: 0,
            remaining,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    /// A reader over the next `len` bytes. The caller advances `self`
    /// separately once the bounded reader is done.
    pub(crate) fn window(&self, len: usize) -> Self {
        Self {
            segments: self.segments,
            index: self.index,
            offset: self.offset,
            remaining: len.min(self.remaining),
        }
    }

    fn current(&mut self) -> Result<&'a [u8], DecodeError> {
        let segments = self.segments;
        loop {
            let seg = segments
                .get(self.index)
                .ok_or(DecodeError::Truncated)?
                .as_ref();
            if self.offset < seg.len() {
                return Ok(&seg[self.offset..]);
            }
            self.index += 1;
            self.offset = 0;
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.remaining == 0 {
            return Err(DecodeError::Truncated);
        }
        let byte = self.current()?[0];
        self.offset += 1;
        self.remaining -= 1;
        Ok(byte)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        for slot in &mut buf {
            *slot = self.read_u8()?;
        }
        Ok(u32::from_be_bytes(buf))
    }

    /// Variable byte integer: 7 bits per byte, least significant first.
    pub(crate) fn read_varint(&mut self) -> Result<u32, DecodeError> {
        let mut value = 0u32;
        for shift in (0..28).step_by(7) {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::MalformedRemainingLength)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        if len > self.remaining {
            return Err(DecodeError::Truncated);
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let head = self.current()?;
        if len <= head.len() {
            let start = self.offset;
            let shared = self.segments[self.index].share(start..start + len);
            self.offset += len;
            self.remaining -= len;
            return Ok(shared);
        }

        let mut out = BytesMut::with_capacity(len);
        let mut left = len;
        while left > 0 {
            let chunk = self.current()?;
            let take = left.min(chunk.len());
            out.extend_from_slice(&chunk[..take]);
            self.offset += take;
            left -= take;
        }
        self.remaining -= len;
        Ok(out.freeze())
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        if len > self.remaining {
            return Err(DecodeError::Truncated);
        }
        let mut left = len;
        while left > 0 {
            let chunk = self.current()?;
            let take = left.min(chunk.len());
            self.offset += take;
            left -= take;
        }
        self.remaining -= len;
        Ok(())
    }

    /// Length-prefixed binary data.
    pub(crate) fn read_binary(&mut self) -> Result<Bytes, DecodeError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    /// Length-prefixed UTF-8 string, kept as raw bytes.
    pub(crate) fn read_utf8(&mut self) -> Result<Bytes, DecodeError> {
        let raw = self.read_binary()?;
        std::str::from_utf8(&raw).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(raw)
    }

    pub(crate) fn read_string(&mut self) -> Result<String, DecodeError> {
        let raw = self.read_binary()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}
