//! Local stream header encoding/decoding
//!
//! Every stream a peer opens on behalf of a WebTransport session starts with
//! a header binding it to that session:
//! - stream type: varint (0x41 for bidirectional, 0x54 for unidirectional)
//! - session_id: varint
//!
//! The header precedes any payload and is written exactly once.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::session::SessionId;
use crate::varint;

/// Frame type announcing a WebTransport bidirectional stream
pub const WEBTRANSPORT_FRAME_TYPE: u64 = 0x41;

/// Stream type announcing a WebTransport unidirectional stream
pub const WEBTRANSPORT_UNI_STREAM_TYPE: u64 = 0x54;

/// Direction of a WebTransport stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Bidirectional stream
    Bidirectional,
    /// Unidirectional stream
    Unidirectional,
}

impl StreamKind {
    /// Wire value of the type tag
    pub fn type_tag(&self) -> u64 {
        match self {
            StreamKind::Bidirectional => WEBTRANSPORT_FRAME_TYPE,
            StreamKind::Unidirectional => WEBTRANSPORT_UNI_STREAM_TYPE,
        }
    }

    /// Map a wire type tag back to a stream kind
    pub fn from_type_tag(tag: u64) -> Option<Self> {
        match tag {
            WEBTRANSPORT_FRAME_TYPE => Some(StreamKind::Bidirectional),
            WEBTRANSPORT_UNI_STREAM_TYPE => Some(StreamKind::Unidirectional),
            _ => None,
        }
    }
}

/// Header written at the start of every locally opened stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// Direction of the stream
    pub kind: StreamKind,
    /// Session this stream belongs to
    pub session_id: SessionId,
}

impl StreamHeader {
    /// Create a new stream header
    pub fn new(kind: StreamKind, session_id: SessionId) -> Self {
        Self { kind, session_id }
    }

    /// Number of bytes this header occupies on the wire
    pub fn encoded_len(&self) -> Result<usize, ProtocolError> {
        Ok(varint::encoded_len(self.kind.type_tag())?
            + varint::encoded_len(self.session_id.as_u64())?)
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(self.encoded_len()?);
        varint::encode(self.kind.type_tag(), dst)?;
        varint::encode(self.session_id.as_u64(), dst)?;
        Ok(())
    }

    /// Encode the header into a standalone buffer
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer; nothing is
    /// consumed in that case. Returns Err if the stream type is unknown.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some((tag, tag_len)) = varint::decode_slice(&src[..]) else {
            return Ok(None);
        };
        let kind = StreamKind::from_type_tag(tag).ok_or(ProtocolError::UnexpectedStreamType(tag))?;

        let Some((session_id, id_len)) = varint::decode_slice(&src[tag_len..]) else {
            return Ok(None);
        };

        let _ = src.split_to(tag_len + id_len);
        Ok(Some(Self::new(kind, SessionId::new(session_id))))
    }
}
