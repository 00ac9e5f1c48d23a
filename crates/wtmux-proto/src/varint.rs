//! QUIC variable-length integers (RFC 9000, Section 16)
//!
//! The two high bits of the first byte select the encoded length:
//! - `00`: 1 byte, 6-bit value
//! - `01`: 2 bytes, 14-bit value
//! - `10`: 4 bytes, 30-bit value
//! - `11`: 8 bytes, 62-bit value

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Largest value that can be encoded (2^62 - 1)
pub const MAX: u64 = (1 << 62) - 1;

/// Number of bytes needed to encode `value`
pub fn encoded_len(value: u64) -> Result<usize, ProtocolError> {
    match value {
        0..=0x3f => Ok(1),
        0x40..=0x3fff => Ok(2),
        0x4000..=0x3fff_ffff => Ok(4),
        0x4000_0000..=MAX => Ok(8),
        _ => Err(ProtocolError::VarintOverflow(value)),
    }
}

/// Total encoded length announced by the first byte of a varint
pub fn len_from_first_byte(first: u8) -> usize {
    1 << (first >> 6)
}

/// Append `value` to `dst` in its shortest encoding
pub fn encode<B: BufMut>(value: u64, dst: &mut B) -> Result<(), ProtocolError> {
    match encoded_len(value)? {
        1 => dst.put_u8(value as u8),
        2 => dst.put_u16(0x4000 | value as u16),
        4 => dst.put_u32(0x8000_0000 | value as u32),
        _ => dst.put_u64(0xc000_0000_0000_0000 | value),
    }
    Ok(())
}

/// Decode a varint from the front of `src`
///
/// Returns `None` without consuming anything if `src` does not yet hold the
/// whole integer.
pub fn decode<B: Buf>(src: &mut B) -> Option<u64> {
    if !src.has_remaining() {
        return None;
    }
    let len = len_from_first_byte(src.chunk()[0]);
    if src.remaining() < len {
        return None;
    }

    let value = match len {
        1 => u64::from(src.get_u8() & 0x3f),
        2 => u64::from(src.get_u16() & 0x3fff),
        4 => u64::from(src.get_u32() & 0x3fff_ffff),
        _ => src.get_u64() & MAX,
    };
    Some(value)
}

/// Decode a varint from a complete byte slice, reporting how many bytes it used
pub fn decode_slice(data: &[u8]) -> Option<(u64, usize)> {
    let mut buf = data;
    let value = decode(&mut buf)?;
    Some((value, data.len() - buf.len()))
}
