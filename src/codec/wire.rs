//! Write-side primitives: variable byte integers and length-prefixed fields.

use bytes::BufMut;

use crate::utils::error::EncodeError;

/// Largest value a four-byte variable byte integer can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Largest length-prefixed string or binary field.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Number of bytes the remaining length `len` occupies on the wire.
pub fn length_byte_count(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub(crate) fn put_varint<B: BufMut>(out: &mut B, mut value: usize) -> Result<usize, EncodeError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge(value));
    }
    let mut written = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        written += 1;
        if value == 0 {
            return Ok(written);
        }
    }
}

pub(crate) fn binary_len(field: &[u8]) -> usize {
    2 + field.len()
}

pub(crate) fn put_binary<B: BufMut>(out: &mut B, field: &[u8]) -> Result<(), EncodeError> {
    if field.len() > MAX_FIELD_LEN {
        return Err(EncodeError::FieldTooLong(field.len()));
    }
    out.put_u16(field.len() as u16);
    out.put_slice(field);
    Ok(())
}
