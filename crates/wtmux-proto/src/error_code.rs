//! Error code spaces and their HTTP/3 embedding
//!
//! WebTransport applications reset streams with a small application code.
//! On the wire that code lives inside a dedicated slice of the HTTP/3 error
//! code space, skipping the reserved code points HTTP/3 sets aside for
//! greasing (`0x1f * N + 0x21`). Mapping in either direction is exact for
//! every application code.

use crate::error::ProtocolError;

/// Application error code carried by a stream reset
pub type StreamErrorCode = u8;

/// Application error code carried by a session close
pub type SessionErrorCode = u32;

/// First HTTP/3 error code reserved for WebTransport application codes
pub const FIRST_STREAM_ERROR_CODE: u64 = 0x52e4_a40f_a8db;

/// Last HTTP/3 error code reserved for WebTransport application codes
pub const LAST_STREAM_ERROR_CODE: u64 = 0x52e4_a40f_a9e2;

/// Reset code used on every stream when its session goes away
pub const SESSION_GONE_ERROR_CODE: u64 = 0x170d_7b68;

/// Reset code for a stream whose session never got established in time
pub const BUFFERED_STREAM_REJECTED_ERROR_CODE: u64 = 0x3994_bd84;

/// HTTP/3 H3_NO_ERROR
pub const H3_NO_ERROR: u64 = 0x100;

/// HTTP/3 H3_GENERAL_PROTOCOL_ERROR
pub const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x101;

/// Embed an application stream error code into the HTTP/3 code space
pub fn to_http_code(code: StreamErrorCode) -> u64 {
    let code = u64::from(code);
    FIRST_STREAM_ERROR_CODE + code + code / 0x1e
}

/// Recover the application stream error code from an HTTP/3 code
pub fn from_http_code(native: u64) -> Result<StreamErrorCode, ProtocolError> {
    if !(FIRST_STREAM_ERROR_CODE..=LAST_STREAM_ERROR_CODE).contains(&native) {
        return Err(ProtocolError::ErrorCodeOutOfRange(native));
    }
    if (native - 0x21) % 0x1f == 0 {
        return Err(ProtocolError::ReservedErrorCode(native));
    }

    let shifted = native - FIRST_STREAM_ERROR_CODE;
    let code = shifted - shifted / 0x1f;
    StreamErrorCode::try_from(code).map_err(|_| ProtocolError::ErrorCodeOutOfRange(native))
}
