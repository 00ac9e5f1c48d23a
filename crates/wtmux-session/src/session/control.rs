//! Control stream handling
//!
//! The control stream carries capsules. The only one acted upon is
//! CLOSE_WEBTRANSPORT_SESSION; anything else is drained without being
//! buffered. The session ends
//! when a close capsule arrives, when the stream fails or finishes, or when
//! the connection underneath goes away.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use wtmux_core::{io, Connection, ConnectionError, MuxError, RawRecvStream, RawSendStream};
use wtmux_proto::{varint, CapsuleCodec, CloseSession, SessionErrorCode, CLOSE_WEBTRANSPORT_SESSION};

use super::SessionInner;

/// Bytes requested from the control stream per read
const READ_CHUNK: usize = 4096;

/// Longest close message put on the wire
pub(crate) const MAX_CLOSE_MESSAGE_LEN: usize = 1024;

/// Read the control stream until the session ends, then tear it down
pub(super) async fn run<C: Connection>(inner: Arc<SessionInner<C>>, max_capsule_size: usize) {
    let connection = inner.conn.context();

    let reason = tokio::select! {
        reason = read_close_reason(&inner.control, max_capsule_size) => {
            if reason.remote {
                // Answer the peer's close by finishing our side too
                let _ = inner.control.close();
            }
            reason
        }
        _ = connection.cancelled() => {
            tracing::debug!("{}: connection closed underneath the session", inner.id);
            ConnectionError::remote_unspecified()
        }
    };

    inner.shutdown(reason);
}

async fn read_close_reason<S: RawRecvStream>(
    control: &S,
    max_capsule_size: usize,
) -> ConnectionError {
    match next_close_capsule(control, max_capsule_size).await {
        Ok(Some(close)) => ConnectionError::remote(close.error_code, close.message),
        Ok(None) => {
            tracing::debug!("Control stream finished without a close capsule");
            ConnectionError::remote_unspecified()
        }
        Err(MuxError::Protocol(err)) => {
            tracing::warn!("Malformed capsule on control stream: {}", err);
            ConnectionError::remote_unspecified()
        }
        Err(err) => {
            tracing::debug!("Control stream read ended: {}", err);
            ConnectionError::remote_unspecified()
        }
    }
}

/// Read capsules until a close capsule or the end of the stream
///
/// Capsules of other types are drained as they arrive, whatever their size.
/// A close payload is kept up to `max_capsule_size` bytes; the rest of a
/// longer message is dropped.
async fn next_close_capsule<S: RawRecvStream>(
    control: &S,
    max_capsule_size: usize,
) -> Result<Option<CloseSession>, MuxError> {
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut skipping: u64 = 0;

    loop {
        if skipping > 0 {
            let n = skipping.min(buffer.len() as u64);
            buffer.advance(n as usize);
            skipping -= n;
        }

        if skipping == 0 {
            if let Some((capsule_type, length, prefix_len)) = capsule_prefix(&buffer) {
                if capsule_type != CLOSE_WEBTRANSPORT_SESSION {
                    tracing::trace!("Skipping capsule type {:#x} ({} bytes)", capsule_type, length);
                    buffer.advance(prefix_len);
                    skipping = length;
                    continue;
                }

                let kept = length.min(max_capsule_size as u64) as usize;
                if buffer.len() >= prefix_len + kept {
                    if (kept as u64) < length {
                        tracing::debug!("Close capsule of {} bytes cut to {}", length, kept);
                    }
                    buffer.advance(prefix_len);
                    let payload = buffer.split_to(kept).freeze();
                    return Ok(Some(CloseSession::from_payload(payload)?));
                }
            }
        }

        let n = control.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Type, payload length and prefix size of the capsule at the front of `buf`
fn capsule_prefix(buf: &[u8]) -> Option<(u64, u64, usize)> {
    let (capsule_type, type_len) = varint::decode_slice(buf)?;
    let (length, length_len) = varint::decode_slice(&buf[type_len..])?;
    Some((capsule_type, length, type_len + length_len))
}

/// Write a close capsule to the control stream
pub(super) async fn send_close<S: RawSendStream>(
    control: &S,
    error_code: SessionErrorCode,
    message: &str,
) -> Result<(), MuxError> {
    let close = CloseSession::new(error_code, truncate_message(message));
    let mut buf = BytesMut::new();
    CapsuleCodec::new().encode(close.to_capsule(), &mut buf)?;
    io::write_all(control, &buf).await?;
    Ok(())
}

/// Cut a close message to the wire limit on a character boundary
fn truncate_message(message: &str) -> &str {
    if message.len() <= MAX_CLOSE_MESSAGE_LEN {
        return message;
    }
    let mut end = MAX_CLOSE_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
