//! Convenience I/O over raw streams

use wtmux_proto::varint;

use crate::error::TransportError;
use crate::traits::{RawRecvStream, RawSendStream};

/// Write the whole buffer, looping over short writes
pub async fn write_all<S: RawSendStream + ?Sized>(
    stream: &S,
    mut buf: &[u8],
) -> Result<(), TransportError> {
    while !buf.is_empty() {
        let n = stream.write(buf).await?;
        buf = &buf[n..];
    }
    Ok(())
}

/// Fill the whole buffer, failing if the stream ends first
pub async fn read_exact<S: RawRecvStream + ?Sized>(
    stream: &S,
    buf: &mut [u8],
) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TransportError::UnexpectedEnd);
        }
        filled += n;
    }
    Ok(())
}

/// Read one QUIC varint off the front of a stream
///
/// Reads exactly as many bytes as the integer occupies, so the payload that
/// follows stays in the stream.
pub async fn read_varint<S: RawRecvStream + ?Sized>(stream: &S) -> Result<u64, TransportError> {
    let mut buf = [0u8; 8];
    read_exact(stream, &mut buf[..1]).await?;
    let len = varint::len_from_first_byte(buf[0]);
    read_exact(stream, &mut buf[1..len]).await?;

    // A complete varint of `len` bytes always decodes
    let (value, _) = varint::decode_slice(&buf[..len]).ok_or(TransportError::UnexpectedEnd)?;
    Ok(value)
}
