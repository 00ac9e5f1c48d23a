//! Tokio codec for HTTP capsules on a session's control stream
//!
//! A capsule (RFC 9297) is framed as:
//! - capsule_type: varint
//! - length: varint
//! - payload: `length` bytes
//!
//! WebTransport uses it to signal session close; other capsule types are
//! decoded and left to the caller to skip.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::error_code::SessionErrorCode;
use crate::varint;

/// Capsule type for CLOSE_WEBTRANSPORT_SESSION
pub const CLOSE_WEBTRANSPORT_SESSION: u64 = 0x2843;

/// Default maximum capsule payload accepted by the decoder (64 KiB)
pub const MAX_CAPSULE_SIZE: usize = 64 * 1024;

/// Size of the error code field at the start of a close capsule
const CLOSE_CODE_LEN: usize = 4;

/// A decoded capsule: its type and raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capsule {
    /// Capsule type
    pub capsule_type: u64,
    /// Capsule payload
    pub payload: Bytes,
}

impl Capsule {
    /// Create a new capsule
    pub fn new(capsule_type: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            capsule_type,
            payload: payload.into(),
        }
    }
}

/// Payload of a CLOSE_WEBTRANSPORT_SESSION capsule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSession {
    /// Application error code
    pub error_code: SessionErrorCode,
    /// Human-readable reason
    pub message: String,
}

impl CloseSession {
    /// Create a new close payload
    pub fn new(error_code: SessionErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
        }
    }

    /// Wrap this payload into a capsule
    ///
    /// The message is not length-prefixed; it runs to the end of the capsule.
    pub fn to_capsule(&self) -> Capsule {
        let mut payload = BytesMut::with_capacity(CLOSE_CODE_LEN + self.message.len());
        payload.put_u32(self.error_code);
        payload.extend_from_slice(self.message.as_bytes());
        Capsule::new(CLOSE_WEBTRANSPORT_SESSION, payload.freeze())
    }

    /// Parse the payload of a close capsule
    pub fn from_payload(mut payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.len() < CLOSE_CODE_LEN {
            return Err(ProtocolError::TruncatedCapsule {
                expected: CLOSE_CODE_LEN,
                actual: payload.len(),
            });
        }
        let error_code = payload.get_u32();
        let message = String::from_utf8_lossy(&payload).into_owned();
        Ok(Self { error_code, message })
    }
}

/// Codec for encoding/decoding capsules
#[derive(Debug)]
pub struct CapsuleCodec {
    /// Type and length of the capsule being decoded (if its prefix is in)
    pending: Option<(u64, usize)>,
    /// Largest payload the decoder accepts
    max_size: usize,
}

impl CapsuleCodec {
    /// Create a new codec with the default size limit
    pub fn new() -> Self {
        Self::with_max_size(MAX_CAPSULE_SIZE)
    }

    /// Create a new codec with a custom size limit
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            pending: None,
            max_size,
        }
    }

    fn decode_prefix(&self, src: &mut BytesMut) -> Result<Option<(u64, usize)>, ProtocolError> {
        let Some((capsule_type, type_len)) = varint::decode_slice(&src[..]) else {
            return Ok(None);
        };
        let Some((length, length_len)) = varint::decode_slice(&src[type_len..]) else {
            return Ok(None);
        };

        if length > self.max_size as u64 {
            tracing::warn!(capsule_type, length, max = self.max_size, "capsule exceeds size limit");
            return Err(ProtocolError::CapsuleTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        src.advance(type_len + length_len);
        Ok(Some((capsule_type, length as usize)))
    }
}

impl Default for CapsuleCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CapsuleCodec {
    type Item = Capsule;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (capsule_type, length) = match self.pending.take() {
            Some(prefix) => prefix,
            None => match self.decode_prefix(src)? {
                Some(prefix) => prefix,
                None => return Ok(None),
            },
        };

        if src.len() < length {
            // Save prefix and wait for more data
            self.pending = Some((capsule_type, length));
            src.reserve(length - src.len());
            return Ok(None);
        }

        let payload = src.split_to(length).freeze();
        Ok(Some(Capsule {
            capsule_type,
            payload,
        }))
    }
}

impl Encoder<Capsule> for CapsuleCodec {
    type Error = ProtocolError;

    fn encode(&mut self, capsule: Capsule, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = capsule.payload.len() as u64;
        let prefix = varint::encoded_len(capsule.capsule_type)? + varint::encoded_len(length)?;
        dst.reserve(prefix + capsule.payload.len());
        varint::encode(capsule.capsule_type, dst)?;
        varint::encode(length, dst)?;
        dst.extend_from_slice(&capsule.payload);
        Ok(())
    }
}
