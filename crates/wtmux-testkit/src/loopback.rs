//! Loopback HTTP/3 stand-in over the in-memory transport
//!
//! A session is requested by opening a bidirectional stream that starts with
//! an HTTP/3 HEADERS frame type; the stream's ID becomes the session ID.
//! Every other stream must start with a WebTransport stream type and is
//! handed to the registry.

use std::sync::Arc;

use tokio::sync::mpsc;
use wtmux_core::{io, Connection, MuxError, RawRecvStream, RawSendStream, StreamHandle};
use wtmux_proto::error_code::H3_GENERAL_PROTOCOL_ERROR;
use wtmux_proto::frame::{WEBTRANSPORT_FRAME_TYPE, WEBTRANSPORT_UNI_STREAM_TYPE};
use wtmux_proto::SessionId;
use wtmux_session::{Session, SessionRegistry};

use crate::{MemConnection, MemStream};

/// HTTP/3 HEADERS frame type, standing in for an extended CONNECT request
pub const HEADERS_FRAME: u8 = 0x01;

pub type LoopbackSession = Session<MemConnection>;
pub type LoopbackRegistry = SessionRegistry<MemConnection>;

/// Route every stream the peer opens on `conn`
///
/// Returns the sessions the peer requests, in the order they are established.
/// Once the connection stops delivering streams its entries are dropped from
/// the registry.
pub fn serve(
    conn: &MemConnection,
    registry: &LoopbackRegistry,
) -> mpsc::UnboundedReceiver<LoopbackSession> {
    let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();

    let (bidi_conn, bidi_registry) = (conn.clone(), registry.clone());
    tokio::spawn(async move {
        while let Some(stream) = bidi_conn.accept_stream().await {
            let conn = bidi_conn.clone();
            let registry = bidi_registry.clone();
            let sessions_tx = sessions_tx.clone();
            tokio::spawn(async move {
                if let Some(session) = route_bidi(conn, &registry, stream).await {
                    let _ = sessions_tx.send(session);
                }
            });
        }
        tracing::debug!("Loopback connection {} stopped accepting streams", bidi_conn.id());
        bidi_registry.remove_connection(bidi_conn.id());
    });

    let (uni_conn, uni_registry) = (conn.clone(), registry.clone());
    tokio::spawn(async move {
        while let Some(stream) = uni_conn.accept_uni_stream().await {
            let conn = uni_conn.clone();
            let registry = uni_registry.clone();
            tokio::spawn(async move {
                match io::read_varint(&stream).await {
                    Ok(WEBTRANSPORT_UNI_STREAM_TYPE) => {
                        registry.register_incoming_uni_stream(&conn, stream).await
                    }
                    Ok(other) => {
                        tracing::debug!("Unexpected uni stream type {:#x}", other);
                        stream.cancel_read(H3_GENERAL_PROTOCOL_ERROR);
                    }
                    Err(_) => stream.cancel_read(H3_GENERAL_PROTOCOL_ERROR),
                }
            });
        }
    });

    sessions_rx
}

async fn route_bidi(
    conn: MemConnection,
    registry: &LoopbackRegistry,
    stream: MemStream,
) -> Option<LoopbackSession> {
    let frame_type = io::read_varint(&stream).await.ok()?;

    if frame_type == WEBTRANSPORT_FRAME_TYPE {
        let id = io::read_varint(&stream).await.ok()?;
        registry.register_incoming_bidi_stream(&conn, stream, SessionId::new(id));
        return None;
    }

    if frame_type == u64::from(HEADERS_FRAME) {
        let id = SessionId::from(stream.stream_id());
        return match registry.create_session(Arc::new(conn), id, stream) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("Failed to create session {}: {}", id, e);
                None
            }
        };
    }

    tracing::debug!("Unexpected bidi stream type {:#x}", frame_type);
    stream.cancel_read(H3_GENERAL_PROTOCOL_ERROR);
    stream.cancel_write(H3_GENERAL_PROTOCOL_ERROR);
    None
}

/// Open a control stream on `conn` without announcing it yet
///
/// The session exists locally right away; the peer only learns about it once
/// [`announce`] writes the request.
pub async fn dial_unannounced(
    conn: &MemConnection,
    registry: &LoopbackRegistry,
) -> Result<(LoopbackSession, MemStream), MuxError> {
    let control = conn.open_stream_sync().await?;
    let id = SessionId::from(control.stream_id());
    let session = registry.create_session(Arc::new(conn.clone()), id, control.clone())?;
    Ok((session, control))
}

/// Send the session request on a control stream from [`dial_unannounced`]
pub async fn announce(control: &MemStream) -> Result<(), MuxError> {
    io::write_all(control, &[HEADERS_FRAME]).await?;
    Ok(())
}

/// Request a session on `conn`
pub async fn dial(
    conn: &MemConnection,
    registry: &LoopbackRegistry,
) -> Result<LoopbackSession, MuxError> {
    let (session, control) = dial_unannounced(conn, registry).await?;
    announce(&control).await?;
    Ok(session)
}
